use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::DeliveryError;
use crate::queue::store::KvStore;

pub fn lock_key(job_id: &str) -> String {
    format!("lock:{}", job_id)
}

pub fn completed_key(job_id: &str) -> String {
    format!("completed:{}", job_id)
}

/// Short-lived exclusive claim on a job id. The TTL is the self-healing
/// boundary: a crashed holder stops blocking retries once it expires.
/// The completion marker is separate because lock absence is ambiguous
/// (never attempted, succeeded, or expired mid-flight).
pub struct DeliveryLock<K> {
    kv: Arc<K>,
    lock_ttl: Duration,
    completed_ttl: Duration,
}

impl<K: KvStore> DeliveryLock<K> {
    pub fn new(kv: Arc<K>, lock_ttl: Duration, completed_ttl: Duration) -> Self {
        Self {
            kv,
            lock_ttl,
            completed_ttl,
        }
    }

    /// Claims the job for `owner`. `LockContention` means another path
    /// already owns or already finished it; `StoreUnavailable` means the
    /// caller must fail closed and not deliver.
    pub async fn acquire(&self, job_id: &str, owner: &str) -> Result<(), DeliveryError> {
        let completed = self
            .kv
            .get(&completed_key(job_id))
            .await
            .map_err(store_unavailable)?;
        if completed.is_some() {
            return Err(DeliveryError::LockContention);
        }

        let acquired = self
            .kv
            .set_nx(&lock_key(job_id), owner, self.lock_ttl)
            .await
            .map_err(store_unavailable)?;
        if !acquired {
            return Err(DeliveryError::LockContention);
        }

        Ok(())
    }

    /// Written before release so a racing path sees the success record
    /// rather than an ambiguous free lock.
    pub async fn mark_completed(&self, job_id: &str) -> Result<(), DeliveryError> {
        self.kv
            .set_ex(
                &completed_key(job_id),
                &Utc::now().to_rfc3339(),
                self.completed_ttl,
            )
            .await
            .map_err(store_unavailable)
    }

    pub async fn release(&self, job_id: &str) -> Result<(), DeliveryError> {
        self.kv
            .del(&lock_key(job_id))
            .await
            .map_err(store_unavailable)
    }

    pub async fn is_completed(&self, job_id: &str) -> Result<bool, DeliveryError> {
        let marker = self
            .kv
            .get(&completed_key(job_id))
            .await
            .map_err(store_unavailable)?;
        Ok(marker.is_some())
    }
}

fn store_unavailable(e: anyhow::Error) -> DeliveryError {
    DeliveryError::StoreUnavailable {
        store: "lock",
        reason: e.to_string(),
    }
}
