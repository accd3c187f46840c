use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Error, Result};
use chrono::{NaiveDate, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::models::metrics::{DeliveryPath, PathStats, QueueStats};
use crate::queue::orchestrator::{FASTPATH_PREFIX, NOTIFICATIONS_QUEUE};
use crate::queue::store::{JobStore, KvStore};

pub fn metrics_key(path: DeliveryPath, day: NaiveDate) -> String {
    format!("metrics:{}:{}", path.as_str(), day.format("%Y-%m-%d"))
}

enum MetricsMessage {
    Record {
        path: DeliveryPath,
        duration_ms: u64,
        success: bool,
    },
    Flush(oneshot::Sender<()>),
}

/// Day-bucketed delivery counters. `record` is fire-and-forget: updates
/// flow over a channel to a background task, and a failed write is
/// logged and dropped so metrics can never delay or fail a delivery.
#[derive(Clone)]
pub struct MetricsCollector {
    tx: mpsc::UnboundedSender<MetricsMessage>,
}

impl MetricsCollector {
    pub fn new<K: KvStore>(kv: Arc<K>, retention: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    MetricsMessage::Record {
                        path,
                        duration_ms,
                        success,
                    } => {
                        if let Err(e) = write_record(&kv, path, duration_ms, success, retention).await
                        {
                            warn!(path = %path, error = %e, "Failed to record delivery metrics");
                        }
                    }
                    MetricsMessage::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });

        Self { tx }
    }

    pub fn record(&self, path: DeliveryPath, duration_ms: u64, success: bool) {
        let _ = self.tx.send(MetricsMessage::Record {
            path,
            duration_ms,
            success,
        });
    }

    /// Waits until every previously recorded update has been applied.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(MetricsMessage::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn write_record<K: KvStore>(
    kv: &Arc<K>,
    path: DeliveryPath,
    duration_ms: u64,
    success: bool,
    retention: Duration,
) -> Result<(), Error> {
    let key = metrics_key(path, Utc::now().date_naive());

    // total first: concurrent readers must never see success + failed
    // exceed it
    kv.hash_incr(&key, "total", 1, retention).await?;
    let outcome = if success { "success" } else { "failed" };
    kv.hash_incr(&key, outcome, 1, retention).await?;
    kv.hash_incr(&key, "total_duration_ms", duration_ms as i64, retention)
        .await?;

    Ok(())
}

pub async fn get_stats<S, K>(store: &S, kv: &K) -> Result<QueueStats, Error>
where
    S: JobStore,
    K: KvStore,
{
    let today = Utc::now().date_naive();
    let mut paths = HashMap::new();

    for path in DeliveryPath::ALL {
        let fields = kv.hash_get_all(&metrics_key(path, today)).await?;
        let read = |name: &str| fields.get(name).copied().unwrap_or(0).max(0) as u64;

        let total = read("total");
        let success = read("success");
        let failed = read("failed");
        let finished = success + failed;
        let avg_duration_ms = if finished > 0 {
            read("total_duration_ms") / finished
        } else {
            0
        };

        let pending = match path {
            DeliveryPath::Fast => kv.scan_prefix(FASTPATH_PREFIX).await?.len() as u64,
            DeliveryPath::Durable => store.pending_count(NOTIFICATIONS_QUEUE).await?,
        };

        paths.insert(
            path.as_str().to_string(),
            PathStats {
                pending,
                total,
                success,
                failed,
                avg_duration_ms,
            },
        );
    }

    Ok(QueueStats { paths })
}
