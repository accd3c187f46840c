use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::DeliveryError;
use crate::models::job::{FailOutcome, Job};
use crate::queue::store::JobStore;

#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &Job) -> Result<(), DeliveryError>;
}

/// Spawns `concurrency` independent polling workers for one queue. The
/// handler outcome drives the store transition: success completes,
/// retryable errors reschedule with backoff, everything else
/// dead-letters. Lock contention is a no-op success by contract.
pub fn spawn_workers<S, H>(
    store: Arc<S>,
    queue: &str,
    handler: Arc<H>,
    concurrency: usize,
    poll_interval: Duration,
) -> Vec<JoinHandle<()>>
where
    S: JobStore,
    H: JobHandler,
{
    (0..concurrency)
        .map(|worker| {
            let store = Arc::clone(&store);
            let handler = Arc::clone(&handler);
            let queue = queue.to_string();

            tokio::spawn(async move {
                debug!(queue = %queue, worker, "Worker started");
                run_worker(store, queue, handler, poll_interval).await;
            })
        })
        .collect()
}

async fn run_worker<S, H>(store: Arc<S>, queue: String, handler: Arc<H>, poll_interval: Duration)
where
    S: JobStore,
    H: JobHandler,
{
    loop {
        let job = match store.fetch_next(&queue).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                sleep(poll_interval).await;
                continue;
            }
            Err(e) => {
                warn!(queue = %queue, error = %e, "Failed to fetch next job");
                sleep(poll_interval).await;
                continue;
            }
        };

        match handler.handle(&job).await {
            Ok(()) | Err(DeliveryError::LockContention) => {
                if let Err(e) = store.complete(&queue, &job.id).await {
                    warn!(queue = %queue, job_id = %job.id, error = %e, "Failed to mark job completed");
                }
            }
            Err(e) => {
                let retryable = e.is_retryable();
                match store.fail(&queue, &job.id, &e.to_string(), retryable).await {
                    Ok(FailOutcome::Retrying { attempts, delay }) => {
                        debug!(
                            queue = %queue,
                            job_id = %job.id,
                            attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Job rescheduled with backoff"
                        );
                    }
                    Ok(FailOutcome::DeadLettered) => {
                        warn!(
                            queue = %queue,
                            job_id = %job.id,
                            attempts = job.attempts,
                            error = %e,
                            "Job dead-lettered, manual replay required"
                        );
                    }
                    Err(store_err) => {
                        warn!(
                            queue = %queue,
                            job_id = %job.id,
                            error = %store_err,
                            "Failed to record job failure"
                        );
                    }
                }
            }
        }
    }
}
