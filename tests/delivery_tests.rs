use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use alert_queue::{
    clients::memory::MemoryKv,
    error::DeliveryError,
    models::{
        job::{DeliveryRequest, NotificationPayload},
        metrics::DeliveryPath,
    },
    queue::{
        lock::{DeliveryLock, lock_key},
        store::KvStore,
    },
};
use futures_util::future::join_all;
use tokio::time::sleep;

use crate::common::{CountingSender, test_config, test_queue, test_queue_with, urgent_push};

fn push_request(job_id: &str) -> DeliveryRequest {
    DeliveryRequest {
        job_id: job_id.to_string(),
        payload: NotificationPayload::Push {
            alert_id: "alert-1".to_string(),
            recipient_id: "nurse-1".to_string(),
        },
    }
}

/// Test: When the lock store is unreachable, nothing is sent.
#[tokio::test]
async fn test_delivery_fails_closed_without_lock_store() -> Result<()> {
    let t = test_queue();
    let request = push_request("job-1");

    t.kv.set_unavailable(true);
    let result = t.queue.deliver(DeliveryPath::Fast, &request).await;
    assert!(matches!(
        result,
        Err(DeliveryError::StoreUnavailable { store: "lock", .. })
    ));
    assert_eq!(t.sender.sent_count(), 0, "No lock, no send");

    t.kv.set_unavailable(false);
    t.queue.deliver(DeliveryPath::Fast, &request).await?;
    assert_eq!(t.sender.sent_count(), 1);

    // Completion marker now short-circuits any further attempt.
    t.queue.deliver(DeliveryPath::Durable, &request).await?;
    assert_eq!(t.sender.sent_count(), 1);

    Ok(())
}

/// Test: An urgent job submitted during a lock-store outage is still
/// delivered once by the insurance path after the store recovers.
#[tokio::test]
async fn test_outage_recovery_through_insurance_path() -> Result<()> {
    let mut config = test_config();
    config.push_retry_limit = 10;

    let t = test_queue_with(Arc::new(CountingSender::new()), config);
    let _consumer = t.queue.spawn_fast_path_consumer();
    let _workers = t.queue.spawn_queue_workers();
    sleep(Duration::from_millis(30)).await;

    t.kv.set_unavailable(true);
    t.queue.submit(urgent_push("alert-1")).await?;

    sleep(Duration::from_millis(150)).await;
    assert_eq!(t.sender.sent_count(), 0, "Outage must block every path");

    t.kv.set_unavailable(false);
    sleep(Duration::from_millis(400)).await;
    assert_eq!(t.sender.sent_count(), 1, "Insurance retries deliver exactly once");

    Ok(())
}

/// Test: Concurrent deliveries of the same job agree on one winner.
#[tokio::test]
async fn test_concurrent_deliveries_have_single_winner() -> Result<()> {
    let sender = Arc::new(CountingSender::with_delay(Duration::from_millis(50)));
    let t = test_queue_with(Arc::clone(&sender), test_config());
    let request = push_request("job-2");

    let attempts = (0..10).map(|_| {
        let queue = Arc::clone(&t.queue);
        let request = request.clone();
        tokio::spawn(async move { queue.deliver(DeliveryPath::Fast, &request).await })
    });

    let results = join_all(attempts).await;
    for result in results {
        assert!(result?.is_ok(), "Losers walk away clean");
    }
    assert_eq!(t.sender.sent_count(), 1);

    Ok(())
}

/// Test: A sender that outlives its timeout fails the attempt and
/// releases the lock for the next path.
#[tokio::test]
async fn test_slow_sender_times_out_and_releases_lock() -> Result<()> {
    let mut config = test_config();
    config.sender_timeout = Duration::from_millis(60);

    let sender = Arc::new(CountingSender::with_delay(Duration::from_millis(300)));
    let t = test_queue_with(sender, config);
    let request = push_request("job-3");

    let result = t.queue.deliver(DeliveryPath::Durable, &request).await;
    assert!(matches!(result, Err(DeliveryError::Transient(_))));
    assert_eq!(t.sender.sent_count(), 0);
    assert!(
        t.kv.get(&lock_key("job-3")).await?.is_none(),
        "Failed attempt must release the lock"
    );

    Ok(())
}

/// Test: The lock hands out one claim at a time, and the completion
/// marker keeps blocking claims after the lock itself is released.
#[tokio::test]
async fn test_lock_claim_and_completion_marker_contract() -> Result<()> {
    let kv = Arc::new(MemoryKv::new());
    let lock = DeliveryLock::new(
        Arc::clone(&kv),
        Duration::from_secs(30),
        Duration::from_secs(3600),
    );

    lock.acquire("job-9", "fast").await?;
    assert!(matches!(
        lock.acquire("job-9", "durable").await,
        Err(DeliveryError::LockContention)
    ));
    assert!(!lock.is_completed("job-9").await?);

    lock.mark_completed("job-9").await?;
    lock.release("job-9").await?;

    assert!(lock.is_completed("job-9").await?);
    assert!(
        matches!(
            lock.acquire("job-9", "durable").await,
            Err(DeliveryError::LockContention)
        ),
        "Marker must block fresh claims once the lock is gone"
    );

    Ok(())
}
