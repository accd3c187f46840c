use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use crate::models::job::{FailOutcome, Job, JobState, NewJob, backoff_delay};
use crate::queue::store::{Broadcast, JobStore, KvStore};

/// In-process job record, observable through [`MemoryJobStore::find`].
#[derive(Debug, Clone)]
pub struct StoredJob {
    pub id: String,
    pub payload: JsonValue,
    pub state: JobState,
    pub priority: i32,
    pub attempts: u32,
    pub retry_limit: u32,
    pub retry_delay: Duration,
    pub singleton_key: Option<String>,
    pub start_after: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Durable-store contract over a mutex-guarded map. Used by tests and
/// single-process deployments; the bookkeeping mirrors the Postgres
/// backend exactly.
#[derive(Default)]
pub struct MemoryJobStore {
    queues: Mutex<HashMap<String, HashMap<String, StoredJob>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, queue: &str, id: &str) -> Option<StoredJob> {
        let queues = self.queues.lock().expect("job store lock poisoned");
        queues.get(queue).and_then(|jobs| jobs.get(id)).cloned()
    }

    pub fn jobs_in_state(&self, queue: &str, state: JobState) -> Vec<StoredJob> {
        let queues = self.queues.lock().expect("job store lock poisoned");
        queues
            .get(queue)
            .map(|jobs| {
                jobs.values()
                    .filter(|job| job.state == state)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, queue: &str, job: NewJob) -> Result<Option<String>, Error> {
        let mut queues = self.queues.lock().expect("job store lock poisoned");
        let jobs = queues.entry(queue.to_string()).or_default();

        if let Some(key) = &job.singleton_key {
            let blocked = jobs.values().any(|existing| {
                existing.singleton_key.as_deref() == Some(key.as_str())
                    && matches!(existing.state, JobState::Pending | JobState::Active)
            });
            if blocked {
                return Ok(None);
            }
        }

        if jobs.contains_key(&job.id) {
            return Err(anyhow!("job {} already exists in queue {}", job.id, queue));
        }

        let now = Utc::now();
        let id = job.id.clone();
        jobs.insert(
            id.clone(),
            StoredJob {
                id: id.clone(),
                payload: job.payload,
                state: JobState::Pending,
                priority: job.priority,
                attempts: 1,
                retry_limit: job.retry_limit,
                retry_delay: job.retry_delay,
                singleton_key: job.singleton_key,
                start_after: now + chrono::Duration::from_std(job.start_after)?,
                created_at: now,
                processed_at: None,
                last_error: None,
            },
        );

        Ok(Some(id))
    }

    async fn fetch_next(&self, queue: &str) -> Result<Option<Job>, Error> {
        let mut queues = self.queues.lock().expect("job store lock poisoned");
        let Some(jobs) = queues.get_mut(queue) else {
            return Ok(None);
        };

        let now = Utc::now();
        let next_id = jobs
            .values()
            .filter(|job| job.state == JobState::Pending && job.start_after <= now)
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(b.created_at.cmp(&a.created_at))
            })
            .map(|job| job.id.clone());

        let Some(id) = next_id else {
            return Ok(None);
        };

        let job = jobs.get_mut(&id).expect("claimed job vanished");
        job.state = JobState::Active;

        Ok(Some(Job {
            id: job.id.clone(),
            queue: queue.to_string(),
            payload: job.payload.clone(),
            attempts: job.attempts,
            retry_limit: job.retry_limit,
            retry_delay: job.retry_delay,
            created_at: job.created_at,
            last_error: job.last_error.clone(),
        }))
    }

    async fn complete(&self, queue: &str, id: &str) -> Result<(), Error> {
        let mut queues = self.queues.lock().expect("job store lock poisoned");
        let job = queues
            .get_mut(queue)
            .and_then(|jobs| jobs.get_mut(id))
            .ok_or_else(|| anyhow!("job {} not found in queue {}", id, queue))?;

        job.state = JobState::Completed;
        job.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn fail(
        &self,
        queue: &str,
        id: &str,
        error: &str,
        retryable: bool,
    ) -> Result<FailOutcome, Error> {
        let mut queues = self.queues.lock().expect("job store lock poisoned");
        let job = queues
            .get_mut(queue)
            .and_then(|jobs| jobs.get_mut(id))
            .ok_or_else(|| anyhow!("job {} not found in queue {}", id, queue))?;

        job.last_error = Some(error.to_string());

        if !retryable || job.attempts >= job.retry_limit + 1 {
            job.state = JobState::DeadLetter;
            job.processed_at = Some(Utc::now());
            return Ok(FailOutcome::DeadLettered);
        }

        let delay = backoff_delay(job.retry_delay, job.attempts);
        job.attempts += 1;
        job.state = JobState::Pending;
        job.start_after = Utc::now() + chrono::Duration::from_std(delay)?;

        Ok(FailOutcome::Retrying {
            attempts: job.attempts,
            delay,
        })
    }

    async fn cancel(&self, queue: &str, singleton_key: &str) -> Result<bool, Error> {
        let mut queues = self.queues.lock().expect("job store lock poisoned");
        let Some(jobs) = queues.get_mut(queue) else {
            return Ok(false);
        };

        let target = jobs
            .values()
            .find(|job| {
                job.singleton_key.as_deref() == Some(singleton_key)
                    && job.state == JobState::Pending
            })
            .map(|job| job.id.clone());

        match target {
            Some(id) => {
                jobs.remove(&id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn replay(&self, queue: &str, id: &str) -> Result<bool, Error> {
        let mut queues = self.queues.lock().expect("job store lock poisoned");
        let Some(job) = queues.get_mut(queue).and_then(|jobs| jobs.get_mut(id)) else {
            return Ok(false);
        };

        if job.state != JobState::DeadLetter {
            return Ok(false);
        }

        job.state = JobState::Pending;
        job.attempts = 1;
        job.start_after = Utc::now();
        job.processed_at = None;
        job.last_error = None;
        Ok(true)
    }

    async fn pending_count(&self, queue: &str) -> Result<u64, Error> {
        let queues = self.queues.lock().expect("job store lock poisoned");
        let count = queues
            .get(queue)
            .map(|jobs| {
                jobs.values()
                    .filter(|job| matches!(job.state, JobState::Pending | JobState::Active))
                    .count()
            })
            .unwrap_or(0);
        Ok(count as u64)
    }
}

struct KvEntry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl KvEntry {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct KvInner {
    values: HashMap<String, KvEntry>,
    hashes: HashMap<String, HashMap<String, i64>>,
}

/// Key/TTL store over a map. The `set_unavailable` switch simulates a
/// store outage so fail-closed behavior can be exercised in tests.
#[derive(Default)]
pub struct MemoryKv {
    inner: Mutex<KvInner>,
    unavailable: AtomicBool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("kv store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, Error> {
        self.check_available()?;
        let mut inner = self.inner.lock().expect("kv lock poisoned");
        let now = Utc::now();

        let occupied = inner
            .values
            .get(key)
            .is_some_and(|entry| !entry.expired(now));
        if occupied {
            return Ok(false);
        }

        inner.values.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: Some(now + chrono::Duration::from_std(ttl)?),
            },
        );
        Ok(true)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Error> {
        self.check_available()?;
        let mut inner = self.inner.lock().expect("kv lock poisoned");
        inner.values.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: Some(Utc::now() + chrono::Duration::from_std(ttl)?),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        self.check_available()?;
        let inner = self.inner.lock().expect("kv lock poisoned");
        let now = Utc::now();
        Ok(inner
            .values
            .get(key)
            .filter(|entry| !entry.expired(now))
            .map(|entry| entry.value.clone()))
    }

    async fn del(&self, key: &str) -> Result<(), Error> {
        self.check_available()?;
        let mut inner = self.inner.lock().expect("kv lock poisoned");
        inner.values.remove(key);
        inner.hashes.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, Error> {
        self.check_available()?;
        let inner = self.inner.lock().expect("kv lock poisoned");
        let now = Utc::now();
        Ok(inner
            .values
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.expired(now))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect())
    }

    async fn hash_incr(
        &self,
        key: &str,
        field: &str,
        by: i64,
        _ttl: Duration,
    ) -> Result<i64, Error> {
        self.check_available()?;
        let mut inner = self.inner.lock().expect("kv lock poisoned");
        let fields = inner.hashes.entry(key.to_string()).or_default();
        let counter = fields.entry(field.to_string()).or_insert(0);
        *counter += by;
        Ok(*counter)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, i64>, Error> {
        self.check_available()?;
        let inner = self.inner.lock().expect("kv lock poisoned");
        Ok(inner.hashes.get(key).cloned().unwrap_or_default())
    }
}

/// In-process pub/sub: every live subscriber of a channel receives every
/// published payload, nothing is retained.
#[derive(Default)]
pub struct MemoryBroadcast {
    channels: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<String>>>>,
}

impl MemoryBroadcast {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Broadcast for MemoryBroadcast {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), Error> {
        let mut channels = self.channels.lock().expect("broadcast lock poisoned");
        if let Some(senders) = channels.get_mut(channel) {
            senders.retain(|tx| tx.send(payload.to_string()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<String>, Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut channels = self.channels.lock().expect("broadcast lock poisoned");
        channels.entry(channel.to_string()).or_default().push(tx);
        Ok(rx)
    }
}
