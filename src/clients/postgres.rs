use std::sync::Arc;
use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio_postgres::{Client, NoTls};
use tracing::{error, info};
use uuid::Uuid;

use crate::models::job::{FailOutcome, Job, NewJob, backoff_delay};
use crate::queue::store::JobStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id UUID PRIMARY KEY,
    queue TEXT NOT NULL,
    payload JSONB NOT NULL,
    state TEXT NOT NULL DEFAULT 'pending',
    priority INT NOT NULL DEFAULT 0,
    attempts INT NOT NULL DEFAULT 1,
    retry_limit INT NOT NULL DEFAULT 3,
    retry_delay_ms BIGINT NOT NULL DEFAULT 1000,
    singleton_key TEXT,
    start_after TIMESTAMPTZ NOT NULL DEFAULT now(),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    processed_at TIMESTAMPTZ,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS jobs_fetch_idx
    ON jobs (queue, priority DESC, created_at)
    WHERE state = 'pending';

CREATE UNIQUE INDEX IF NOT EXISTS jobs_singleton_idx
    ON jobs (queue, singleton_key)
    WHERE singleton_key IS NOT NULL AND state IN ('pending', 'active');
"#;

/// Durable store on a relational table. Claims use `FOR UPDATE SKIP
/// LOCKED` so any number of workers can poll the same queue without
/// double-claiming, and the singleton guarantee is a partial unique
/// index rather than application bookkeeping.
pub struct PgJobStore {
    client: Arc<Client>,
}

impl PgJobStore {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection terminated");
            }
        });

        let store = Self {
            client: Arc::new(client),
        };
        store.ensure_schema().await?;

        info!("PostgreSQL connection established");
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), Error> {
        self.client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| anyhow!("Failed to create jobs schema: {}", e))?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), Error> {
        self.client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;
        Ok(())
    }

    fn job_id(id: &str) -> Result<Uuid, Error> {
        Uuid::parse_str(id).map_err(|e| anyhow!("Invalid job id {}: {}", id, e))
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, queue: &str, job: NewJob) -> Result<Option<String>, Error> {
        let id = Self::job_id(&job.id)?;
        let start_after_ms = job.start_after.as_millis() as i64;
        let retry_delay_ms = job.retry_delay.as_millis() as i64;

        let inserted = self
            .client
            .execute(
                r#"
                INSERT INTO jobs (id, queue, payload, state, priority, attempts,
                                  retry_limit, retry_delay_ms, singleton_key, start_after)
                VALUES ($1, $2, $3, 'pending', $4, 1, $5, $6, $7,
                        now() + $8::bigint * interval '1 millisecond')
                ON CONFLICT (queue, singleton_key)
                    WHERE singleton_key IS NOT NULL AND state IN ('pending', 'active')
                    DO NOTHING
                "#,
                &[
                    &id,
                    &queue,
                    &job.payload,
                    &job.priority,
                    &(job.retry_limit as i32),
                    &retry_delay_ms,
                    &job.singleton_key,
                    &start_after_ms,
                ],
            )
            .await
            .map_err(|e| anyhow!("Failed to enqueue job: {}", e))?;

        if inserted == 0 {
            return Ok(None);
        }
        Ok(Some(job.id))
    }

    async fn fetch_next(&self, queue: &str) -> Result<Option<Job>, Error> {
        let row = self
            .client
            .query_opt(
                r#"
                UPDATE jobs
                SET state = 'active'
                WHERE id = (
                    SELECT id FROM jobs
                    WHERE queue = $1 AND state = 'pending' AND start_after <= now()
                    ORDER BY priority DESC, created_at ASC
                    LIMIT 1
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING id, payload, attempts, retry_limit, retry_delay_ms,
                          created_at, last_error
                "#,
                &[&queue],
            )
            .await
            .map_err(|e| anyhow!("Failed to claim job: {}", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: Uuid = row.get(0);
        let payload: JsonValue = row.get(1);
        let attempts: i32 = row.get(2);
        let retry_limit: i32 = row.get(3);
        let retry_delay_ms: i64 = row.get(4);
        let created_at: DateTime<Utc> = row.get(5);
        let last_error: Option<String> = row.get(6);

        Ok(Some(Job {
            id: id.to_string(),
            queue: queue.to_string(),
            payload,
            attempts: attempts as u32,
            retry_limit: retry_limit as u32,
            retry_delay: Duration::from_millis(retry_delay_ms as u64),
            created_at,
            last_error,
        }))
    }

    async fn complete(&self, queue: &str, id: &str) -> Result<(), Error> {
        let id = Self::job_id(id)?;
        self.client
            .execute(
                "UPDATE jobs SET state = 'completed', processed_at = now()
                 WHERE queue = $1 AND id = $2",
                &[&queue, &id],
            )
            .await
            .map_err(|e| anyhow!("Failed to complete job: {}", e))?;
        Ok(())
    }

    async fn fail(
        &self,
        queue: &str,
        id: &str,
        error: &str,
        retryable: bool,
    ) -> Result<FailOutcome, Error> {
        let job_id = Self::job_id(id)?;

        let row = self
            .client
            .query_opt(
                "SELECT attempts, retry_limit, retry_delay_ms FROM jobs
                 WHERE queue = $1 AND id = $2 AND state = 'active'",
                &[&queue, &job_id],
            )
            .await
            .map_err(|e| anyhow!("Failed to read job for failure handling: {}", e))?
            .ok_or_else(|| anyhow!("Active job {} not found in queue {}", id, queue))?;

        let attempts: i32 = row.get(0);
        let retry_limit: i32 = row.get(1);
        let retry_delay_ms: i64 = row.get(2);

        if !retryable || attempts >= retry_limit + 1 {
            self.client
                .execute(
                    "UPDATE jobs SET state = 'dead_letter', processed_at = now(),
                            last_error = $3
                     WHERE queue = $1 AND id = $2",
                    &[&queue, &job_id, &error],
                )
                .await
                .map_err(|e| anyhow!("Failed to dead-letter job: {}", e))?;
            return Ok(FailOutcome::DeadLettered);
        }

        let delay = backoff_delay(
            Duration::from_millis(retry_delay_ms as u64),
            attempts as u32,
        );
        let delay_ms = delay.as_millis() as i64;

        self.client
            .execute(
                "UPDATE jobs
                 SET state = 'pending', attempts = attempts + 1, last_error = $4,
                     start_after = now() + $3::bigint * interval '1 millisecond'
                 WHERE queue = $1 AND id = $2",
                &[&queue, &job_id, &delay_ms, &error],
            )
            .await
            .map_err(|e| anyhow!("Failed to reschedule job: {}", e))?;

        Ok(FailOutcome::Retrying {
            attempts: attempts as u32 + 1,
            delay,
        })
    }

    async fn cancel(&self, queue: &str, singleton_key: &str) -> Result<bool, Error> {
        let removed = self
            .client
            .execute(
                "DELETE FROM jobs
                 WHERE queue = $1 AND singleton_key = $2 AND state = 'pending'",
                &[&queue, &singleton_key],
            )
            .await
            .map_err(|e| anyhow!("Failed to cancel job: {}", e))?;
        Ok(removed > 0)
    }

    async fn replay(&self, queue: &str, id: &str) -> Result<bool, Error> {
        let job_id = Self::job_id(id)?;
        let replayed = self
            .client
            .execute(
                "UPDATE jobs
                 SET state = 'pending', attempts = 1, start_after = now(),
                     processed_at = NULL, last_error = NULL
                 WHERE queue = $1 AND id = $2 AND state = 'dead_letter'",
                &[&queue, &job_id],
            )
            .await
            .map_err(|e| anyhow!("Failed to replay job: {}", e))?;
        Ok(replayed > 0)
    }

    async fn pending_count(&self, queue: &str) -> Result<u64, Error> {
        let row = self
            .client
            .query_one(
                "SELECT count(*) FROM jobs
                 WHERE queue = $1 AND state IN ('pending', 'active')",
                &[&queue],
            )
            .await
            .map_err(|e| anyhow!("Failed to count pending jobs: {}", e))?;
        let count: i64 = row.get(0);
        Ok(count as u64)
    }
}
