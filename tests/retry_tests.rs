use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};
use std::time::Duration;

use anyhow::{Result, anyhow};
use alert_queue::{
    clients::memory::MemoryJobStore,
    models::{
        job::{FailOutcome, JobState, NewJob, backoff_delay},
        retry::RetryConfig,
    },
    queue::store::JobStore,
    utils::retry_with_backoff,
};
use serde_json::json;
use tokio::time::sleep;

use crate::common::{test_config, test_queue_with, urgent_push, CountingSender};

/// Test: Each reschedule doubles the delay and bumps the attempt
/// counter, and the budget allows retry_limit + 1 attempts in total.
#[tokio::test]
async fn test_failed_job_backs_off_then_dead_letters() -> Result<()> {
    let store = MemoryJobStore::new();
    let job = NewJob::new(json!({"n": 1}))
        .with_retry_limit(2)
        .with_retry_delay(Duration::from_millis(5));
    let id = store
        .enqueue("work", job)
        .await?
        .expect("enqueue should succeed");

    let claimed = store.fetch_next("work").await?.expect("job should be due");
    assert_eq!(claimed.attempts, 1);

    let outcome = store.fail("work", &id, "boom", true).await?;
    let first_delay = match outcome {
        FailOutcome::Retrying { attempts, delay } => {
            assert_eq!(attempts, 2);
            delay
        }
        FailOutcome::DeadLettered => panic!("first failure should reschedule"),
    };

    let stored = store.find("work", &id).expect("job should persist");
    assert_eq!(stored.state, JobState::Pending);
    assert_eq!(stored.attempts, 2);
    assert_eq!(stored.last_error.as_deref(), Some("boom"));

    sleep(Duration::from_millis(20)).await;
    store.fetch_next("work").await?.expect("retry should be due");
    let outcome = store.fail("work", &id, "boom", true).await?;
    match outcome {
        FailOutcome::Retrying { attempts, delay } => {
            assert_eq!(attempts, 3);
            assert!(delay > first_delay, "Backoff must grow between attempts");
        }
        FailOutcome::DeadLettered => panic!("second failure should reschedule"),
    }

    sleep(Duration::from_millis(40)).await;
    store.fetch_next("work").await?.expect("final attempt due");
    let outcome = store.fail("work", &id, "boom", true).await?;
    assert!(matches!(outcome, FailOutcome::DeadLettered));

    let stored = store.find("work", &id).expect("job should persist");
    assert_eq!(stored.state, JobState::DeadLetter);
    assert!(store.fetch_next("work").await?.is_none());
    assert_eq!(store.pending_count("work").await?, 0);

    Ok(())
}

/// Test: A non-retryable failure skips the backoff schedule entirely.
#[tokio::test]
async fn test_permanent_failure_dead_letters_immediately() -> Result<()> {
    let store = MemoryJobStore::new();
    let id = store
        .enqueue("work", NewJob::new(json!({})).with_retry_limit(5))
        .await?
        .expect("enqueue should succeed");

    store.fetch_next("work").await?.expect("job should be due");
    let outcome = store.fail("work", &id, "bad payload", false).await?;
    assert!(matches!(outcome, FailOutcome::DeadLettered));

    Ok(())
}

/// Test: Replay puts a dead-lettered job back with a fresh budget, and
/// is a no-op for anything not dead-lettered.
#[tokio::test]
async fn test_replay_restores_dead_lettered_job() -> Result<()> {
    let store = MemoryJobStore::new();
    let id = store
        .enqueue("work", NewJob::new(json!({})).with_retry_limit(0))
        .await?
        .expect("enqueue should succeed");

    assert!(!store.replay("work", &id).await?, "Pending jobs cannot be replayed");

    store.fetch_next("work").await?.expect("job should be due");
    store.fail("work", &id, "boom", true).await?;

    assert!(store.replay("work", &id).await?);
    let job = store.fetch_next("work").await?.expect("replayed job is due");
    assert_eq!(job.attempts, 1);
    assert!(job.last_error.is_none());

    Ok(())
}

/// Test: A singleton key admits one live job at a time.
#[tokio::test]
async fn test_singleton_key_suppresses_duplicates() -> Result<()> {
    let store = MemoryJobStore::new();
    let make = || NewJob::new(json!({})).with_singleton_key("only-one".to_string());

    let first = store.enqueue("work", make()).await?;
    assert!(first.is_some());
    assert!(store.enqueue("work", make()).await?.is_none());

    let claimed = store.fetch_next("work").await?.expect("job should be due");
    assert!(
        store.enqueue("work", make()).await?.is_none(),
        "Active jobs still hold the key"
    );

    store.complete("work", &claimed.id).await?;
    assert!(store.enqueue("work", make()).await?.is_some());

    Ok(())
}

/// Test: Cancel removes a pending singleton job and reports whether it
/// found one.
#[tokio::test]
async fn test_cancel_removes_pending_singleton() -> Result<()> {
    let store = MemoryJobStore::new();
    store
        .enqueue(
            "work",
            NewJob::new(json!({})).with_singleton_key("victim".to_string()),
        )
        .await?;

    assert!(store.cancel("work", "victim").await?);
    assert!(!store.cancel("work", "victim").await?);
    assert_eq!(store.pending_count("work").await?, 0);

    Ok(())
}

/// Test: Backoff doubles per attempt and never overflows.
#[tokio::test]
async fn test_backoff_delay_doubles_and_saturates() -> Result<()> {
    let base = Duration::from_secs(1);
    assert_eq!(backoff_delay(base, 1), Duration::from_secs(1));
    assert_eq!(backoff_delay(base, 2), Duration::from_secs(2));
    assert_eq!(backoff_delay(base, 3), Duration::from_secs(4));
    assert_eq!(backoff_delay(base, 5), Duration::from_secs(16));

    // Deep attempt counts clamp instead of overflowing the shift.
    assert_eq!(backoff_delay(base, 40), backoff_delay(base, 17));

    Ok(())
}

/// Test: A sender that keeps failing burns the whole budget and the
/// job dead-letters without a single successful send.
#[tokio::test]
async fn test_exhausted_delivery_dead_letters_through_worker() -> Result<()> {
    let sender = Arc::new(CountingSender::new());
    sender.fail_next(usize::MAX);

    let mut config = test_config();
    config.insurance_delay = Duration::ZERO;
    config.push_retry_limit = 1;

    let t = test_queue_with(Arc::clone(&sender), config);
    let _workers = t.queue.spawn_queue_workers();

    let job_id = t.queue.submit(urgent_push("alert-1")).await?;
    sleep(Duration::from_millis(400)).await;

    assert_eq!(t.sender.sent_count(), 0);
    let job = t
        .store
        .find("notifications", &job_id)
        .expect("job should persist");
    assert_eq!(job.state, JobState::DeadLetter);
    assert_eq!(job.attempts, 2, "retry_limit 1 allows two attempts");

    Ok(())
}

/// Test: Client-level retries stop on first success.
#[tokio::test]
async fn test_retry_with_backoff_stops_on_success() -> Result<()> {
    let config = RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 10,
        max_delay_ms: 100,
        backoff_multiplier: 2,
    };

    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff(&config, || {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 1 {
                Err(anyhow!("flaky"))
            } else {
                Ok("recovered")
            }
        }
    })
    .await?;

    assert_eq!(result, "recovered");
    assert_eq!(attempt_count.load(Ordering::SeqCst), 2);

    Ok(())
}

/// Test: Client-level retries give up after max_attempts.
#[tokio::test]
async fn test_retry_with_backoff_exhausts_attempts() -> Result<()> {
    let config = RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 10,
        max_delay_ms: 100,
        backoff_multiplier: 2,
    };

    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result: Result<()> = retry_with_backoff(&config, || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("always down"))
        }
    })
    .await;

    assert!(result.is_err());
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);

    Ok(())
}
