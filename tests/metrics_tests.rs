use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use alert_queue::{
    clients::memory::{MemoryJobStore, MemoryKv},
    models::{
        job::NewJob,
        metrics::DeliveryPath,
    },
    queue::{
        metrics::{MetricsCollector, get_stats, metrics_key},
        orchestrator::NOTIFICATIONS_QUEUE,
        store::{JobStore, KvStore},
    },
};
use chrono::Utc;
use serde_json::json;

/// Test: Recorded outcomes aggregate into per-path daily stats.
#[tokio::test]
async fn test_recorded_outcomes_aggregate_per_path() -> Result<()> {
    let store = MemoryJobStore::new();
    let kv = Arc::new(MemoryKv::new());
    let collector = MetricsCollector::new(Arc::clone(&kv), Duration::from_secs(3600));

    collector.record(DeliveryPath::Fast, 10, true);
    collector.record(DeliveryPath::Fast, 30, false);
    collector.record(DeliveryPath::Durable, 20, true);
    collector.flush().await;

    let stats = get_stats(&store, kv.as_ref()).await?;

    let fast = &stats.paths["fast"];
    assert_eq!(fast.total, 2);
    assert_eq!(fast.success, 1);
    assert_eq!(fast.failed, 1);
    assert_eq!(fast.avg_duration_ms, 20);

    let durable = &stats.paths["durable"];
    assert_eq!(durable.total, 1);
    assert_eq!(durable.success, 1);
    assert_eq!(durable.failed, 0);
    assert_eq!(durable.avg_duration_ms, 20);

    Ok(())
}

/// Test: The total counter never trails the outcome counters, even
/// while a burst of updates is being applied.
#[tokio::test]
async fn test_total_never_undercounts_outcomes() -> Result<()> {
    let kv = Arc::new(MemoryKv::new());
    let collector = MetricsCollector::new(Arc::clone(&kv), Duration::from_secs(3600));
    let key = metrics_key(DeliveryPath::Fast, Utc::now().date_naive());

    for i in 0..200 {
        collector.record(DeliveryPath::Fast, 5, i % 3 != 0);

        let fields = kv.hash_get_all(&key).await?;
        let read = |name: &str| fields.get(name).copied().unwrap_or(0);
        assert!(
            read("total") >= read("success") + read("failed"),
            "total must lead the outcome counters"
        );
    }

    collector.flush().await;
    let fields = kv.hash_get_all(&key).await?;
    let read = |name: &str| fields.get(name).copied().unwrap_or(0);
    assert_eq!(read("total"), 200);
    assert_eq!(read("success") + read("failed"), 200);
    assert_eq!(read("failed"), 67, "Every third outcome was a failure");

    Ok(())
}

/// Test: Pending comes from live state, not from counters.
#[tokio::test]
async fn test_pending_counts_reflect_live_state() -> Result<()> {
    let store = MemoryJobStore::new();
    let kv = MemoryKv::new();

    store.enqueue(NOTIFICATIONS_QUEUE, NewJob::new(json!({}))).await?;
    store.enqueue(NOTIFICATIONS_QUEUE, NewJob::new(json!({}))).await?;
    kv.set_ex("fastpath:job-1", "{}", Duration::from_secs(60)).await?;

    let stats = get_stats(&store, &kv).await?;
    assert_eq!(stats.paths["durable"].pending, 2);
    assert_eq!(stats.paths["fast"].pending, 1);

    Ok(())
}

/// Test: Stats read cleanly when nothing was ever recorded.
#[tokio::test]
async fn test_stats_are_zeroed_without_activity() -> Result<()> {
    let store = MemoryJobStore::new();
    let kv = MemoryKv::new();

    let stats = get_stats(&store, &kv).await?;
    for path in ["fast", "durable"] {
        let path_stats = &stats.paths[path];
        assert_eq!(path_stats.total, 0);
        assert_eq!(path_stats.avg_duration_ms, 0);
        assert_eq!(path_stats.pending, 0);
    }

    Ok(())
}
