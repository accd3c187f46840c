use std::sync::Arc;
use std::time::Duration;

use anyhow::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::DeliveryError;
use crate::models::job::{BroadcastEnvelope, DeliveryRequest, Job, NewJob};
use crate::queue::lock::completed_key;
use crate::queue::orchestrator::{FASTPATH_PREFIX, NOTIFICATIONS_QUEUE};
use crate::queue::store::{JobStore, KvStore};
use crate::queue::worker::JobHandler;

/// Priority above any routing-derived value: recovered jobs already lost
/// their fast path and have waited out the staleness threshold.
const RESUBMIT_PRIORITY: i32 = 100;

/// Finds urgent jobs that were published but never confirmed (consumer
/// down, channel message lost) and re-injects them into the durable
/// store. Bounds the worst-case delay of a lost broadcast to staleness
/// threshold + sweep interval.
pub struct OverflowSweeper<S, K> {
    store: Arc<S>,
    kv: Arc<K>,
    staleness: Duration,
}

impl<S, K> OverflowSweeper<S, K>
where
    S: JobStore,
    K: KvStore,
{
    pub fn new(store: Arc<S>, kv: Arc<K>, staleness: Duration) -> Self {
        Self {
            store,
            kv,
            staleness,
        }
    }

    /// Returns how many jobs were recovered. Idempotent: a swept record
    /// is deleted, and the singleton key loses against any still-pending
    /// durable job for the same id.
    pub async fn sweep(&self) -> Result<u32, Error> {
        let staleness = chrono::Duration::from_std(self.staleness)?;
        let records = self.kv.scan_prefix(FASTPATH_PREFIX).await?;
        let mut recovered = 0;

        for (key, raw) in records {
            let envelope: BroadcastEnvelope = match serde_json::from_str(&raw) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(key = %key, error = %e, "Dropping undecodable fast-path record");
                    self.kv.del(&key).await?;
                    continue;
                }
            };

            if Utc::now() - envelope.published_at < staleness {
                continue;
            }

            let completed = self
                .kv
                .get(&completed_key(&envelope.job_id))
                .await?
                .is_some();
            if completed {
                // Delivered; only the record cleanup was missed.
                self.kv.del(&key).await?;
                continue;
            }

            let request = DeliveryRequest {
                job_id: envelope.job_id.clone(),
                payload: envelope.payload,
            };
            let job = NewJob::new(serde_json::to_value(&request)?)
                .with_priority(RESUBMIT_PRIORITY)
                .with_singleton_key(envelope.job_id.clone());

            match self.store.enqueue(NOTIFICATIONS_QUEUE, job).await? {
                Some(_) => {
                    info!(job_id = %envelope.job_id, "Stale fast-path job re-enqueued durably");
                    recovered += 1;
                }
                None => {
                    debug!(job_id = %envelope.job_id, "Durable job already pending for stale record");
                }
            }

            self.kv.del(&key).await?;
        }

        Ok(recovered)
    }
}

/// Runs the sweep as a durable scheduled job, so the sweep itself is
/// crash-safe and never overlaps its previous run.
pub struct SweepHandler<S, K> {
    sweeper: OverflowSweeper<S, K>,
}

impl<S, K> SweepHandler<S, K> {
    pub fn new(sweeper: OverflowSweeper<S, K>) -> Self {
        Self { sweeper }
    }
}

#[async_trait]
impl<S, K> JobHandler for SweepHandler<S, K>
where
    S: JobStore,
    K: KvStore,
{
    async fn handle(&self, _job: &Job) -> Result<(), DeliveryError> {
        let recovered = self
            .sweeper
            .sweep()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        if recovered > 0 {
            info!(recovered, "Overflow sweep recovered lost fast-path jobs");
        }
        Ok(())
    }
}
