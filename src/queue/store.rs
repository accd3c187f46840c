use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Error, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::job::{FailOutcome, Job, NewJob};

/// Durable at-least-once queue. A job leaves the pending set only after
/// its handler returns without error; backends own retry bookkeeping.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Returns `None` when a singleton key suppressed the enqueue because
    /// a job with the same key is already pending or active.
    async fn enqueue(&self, queue: &str, job: NewJob) -> Result<Option<String>, Error>;

    /// Atomically claims the next due job, if any.
    async fn fetch_next(&self, queue: &str) -> Result<Option<Job>, Error>;

    async fn complete(&self, queue: &str, id: &str) -> Result<(), Error>;

    /// Reschedules with backoff, or dead-letters once retries are
    /// exhausted or the failure is not retryable.
    async fn fail(
        &self,
        queue: &str,
        id: &str,
        error: &str,
        retryable: bool,
    ) -> Result<FailOutcome, Error>;

    /// Best-effort removal of a pending job by singleton key. A cancel
    /// racing an in-flight execution is allowed to lose.
    async fn cancel(&self, queue: &str, singleton_key: &str) -> Result<bool, Error>;

    /// Manual operator replay of a dead-lettered job.
    async fn replay(&self, queue: &str, id: &str) -> Result<bool, Error>;

    async fn pending_count(&self, queue: &str) -> Result<u64, Error>;
}

/// Plain key/TTL storage used for locks, completion markers, fast-path
/// bookkeeping and metrics counters. May or may not be the same physical
/// store as the durable queue; callers treat it as independently failing.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Atomic set-if-not-exists with TTL. Returns whether the key was set.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, Error>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Error>;

    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    async fn del(&self, key: &str) -> Result<(), Error>;

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, Error>;

    async fn hash_incr(&self, key: &str, field: &str, by: i64, ttl: Duration)
    -> Result<i64, Error>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, i64>, Error>;
}

/// Fire-and-forget pub/sub used only for the urgent fast path. Messages
/// reach live subscribers or are lost; durability is the insurance job's.
#[async_trait]
pub trait Broadcast: Send + Sync + 'static {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), Error>;

    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<String>, Error>;
}
