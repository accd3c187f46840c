use std::sync::Arc;
use std::time::Duration;

use anyhow::Error;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::{DeliveryError, SubmitError};
use crate::events::AlertEventBus;
use crate::models::job::{
    BroadcastEnvelope, DeliveryRequest, EscalationRequest, Job, NewJob, NotificationKind,
    NotificationPayload,
};
use crate::models::metrics::{DeliveryPath, QueueStats};
use crate::queue::lock::DeliveryLock;
use crate::queue::metrics::{MetricsCollector, get_stats};
use crate::queue::store::{Broadcast, JobStore, KvStore};
use crate::queue::sweeper::{OverflowSweeper, SweepHandler};
use crate::queue::worker::{JobHandler, spawn_workers};
use crate::sender::NotificationSender;

pub const NOTIFICATIONS_QUEUE: &str = "notifications";
pub const ESCALATIONS_QUEUE: &str = "escalations";
pub const MAINTENANCE_QUEUE: &str = "maintenance";
pub const URGENT_CHANNEL: &str = "urgent-notifications";
pub const FASTPATH_PREFIX: &str = "fastpath:";

pub fn fastpath_key(job_id: &str) -> String {
    format!("{}{}", FASTPATH_PREFIX, job_id)
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub alert_id: String,
    pub kind: NotificationKind,
    pub recipient_id: String,
    #[serde(default)]
    pub recipient_address: Option<String>,
    pub urgent: bool,
}

/// The hybrid queue façade. Urgent jobs get a hot pub/sub path plus a
/// delayed durable insurance job; normal jobs go durable only. The
/// delivery lock, not the routing, is what guarantees a job's side
/// effect happens once.
pub struct HybridQueue<S, K, B> {
    store: Arc<S>,
    kv: Arc<K>,
    broadcast: Arc<B>,
    lock: DeliveryLock<K>,
    sender: Arc<dyn NotificationSender>,
    metrics: MetricsCollector,
    events: Arc<AlertEventBus>,
    config: QueueConfig,
}

impl<S, K, B> HybridQueue<S, K, B>
where
    S: JobStore,
    K: KvStore,
    B: Broadcast,
{
    pub fn new(
        store: Arc<S>,
        kv: Arc<K>,
        broadcast: Arc<B>,
        sender: Arc<dyn NotificationSender>,
        events: Arc<AlertEventBus>,
        config: QueueConfig,
    ) -> Self {
        let lock = DeliveryLock::new(Arc::clone(&kv), config.lock_ttl, config.completed_ttl);
        let metrics = MetricsCollector::new(Arc::clone(&kv), config.metrics_retention);

        Self {
            store,
            kv,
            broadcast,
            lock,
            sender,
            metrics,
            events,
            config,
        }
    }

    /// Accepts a notification for processing. The caller sees either an
    /// accepted job id or an immediate rejection; delivery outcomes are
    /// asynchronous.
    pub async fn submit(&self, request: SubmitRequest) -> Result<String, SubmitError> {
        let payload = build_payload(&request)?;
        let job_id = uuid::Uuid::new_v4().to_string();

        if !request.urgent {
            self.enqueue_durable(&job_id, &payload, Duration::ZERO, false)
                .await
                .map_err(|e| SubmitError::Unavailable(e.to_string()))?;

            info!(job_id = %job_id, kind = %payload.kind(), "Notification queued on durable path");
            return Ok(job_id);
        }

        let envelope = BroadcastEnvelope {
            job_id: job_id.clone(),
            payload: payload.clone(),
            published_at: Utc::now(),
        };
        let raw = serde_json::to_string(&envelope)
            .map_err(|e| SubmitError::InvalidPayload(e.to_string()))?;

        // Bookkeeping record the sweeper uses to spot lost broadcasts.
        // Losing this write only disables sweep recovery for the job;
        // the insurance enqueue below still covers it.
        if let Err(e) = self
            .kv
            .set_ex(&fastpath_key(&job_id), &raw, self.config.fastpath_record_ttl)
            .await
        {
            warn!(job_id = %job_id, error = %e, "Failed to write fast-path record");
        }

        let published = self.broadcast.publish(URGENT_CHANNEL, &raw).await;
        let insured = self
            .enqueue_durable(&job_id, &payload, self.config.insurance_delay, true)
            .await;

        match (published, insured) {
            (Err(publish_err), Err(insure_err)) => {
                // The record must not outlive the rejection, or the
                // sweeper would later deliver a job the caller was told
                // failed.
                if let Err(e) = self.kv.del(&fastpath_key(&job_id)).await {
                    warn!(job_id = %job_id, error = %e, "Failed to remove fast-path record of rejected job");
                }
                Err(SubmitError::Unavailable(format!(
                    "fast path: {}; durable path: {}",
                    publish_err, insure_err
                )))
            }
            (Err(e), Ok(())) => {
                warn!(job_id = %job_id, error = %e, "Fast-path publish failed, insurance job will deliver");
                Ok(job_id)
            }
            (Ok(()), Err(e)) => {
                warn!(job_id = %job_id, error = %e, "Insurance enqueue failed, fast path only");
                Ok(job_id)
            }
            (Ok(()), Ok(())) => {
                info!(job_id = %job_id, kind = %payload.kind(), "Urgent notification routed to both paths");
                Ok(job_id)
            }
        }
    }

    async fn enqueue_durable(
        &self,
        job_id: &str,
        payload: &NotificationPayload,
        delay: Duration,
        insurance: bool,
    ) -> Result<(), Error> {
        let request = DeliveryRequest {
            job_id: job_id.to_string(),
            payload: payload.clone(),
        };

        let mut job = NewJob::new(serde_json::to_value(&request)?)
            .with_id(job_id.to_string())
            .with_priority(self.priority_for(payload.kind(), insurance))
            .with_retry_limit(self.retry_limit_for(payload.kind()))
            .with_retry_delay(self.config.retry_delay)
            .with_start_after(delay);

        if insurance {
            // Singleton key = job id: a sweeper re-submission can never
            // coexist with a still-pending insurance job.
            job = job.with_singleton_key(job_id.to_string());
        }

        if self.store.enqueue(NOTIFICATIONS_QUEUE, job).await?.is_none() {
            debug!(job_id = %job_id, "Durable enqueue suppressed by singleton key");
        }
        Ok(())
    }

    fn retry_limit_for(&self, kind: NotificationKind) -> u32 {
        // Push failures are often permanent (unregistered devices), so
        // push gets the smallest budget.
        match kind {
            NotificationKind::Email => self.config.email_retry_limit,
            NotificationKind::Push => self.config.push_retry_limit,
            NotificationKind::Sms => self.config.sms_retry_limit,
        }
    }

    fn priority_for(&self, kind: NotificationKind, insurance: bool) -> i32 {
        let base = match kind {
            NotificationKind::Push | NotificationKind::Sms => 10,
            NotificationKind::Email => 5,
        };
        if insurance { base + 40 } else { base }
    }

    /// Shared delivery path. Exactly one caller per job id gets past the
    /// lock; everyone else sees contention and walks away.
    pub async fn deliver(
        &self,
        path: DeliveryPath,
        request: &DeliveryRequest,
    ) -> Result<(), DeliveryError> {
        match self.lock.acquire(&request.job_id, path.as_str()).await {
            Ok(()) => {}
            Err(DeliveryError::LockContention) => {
                debug!(job_id = %request.job_id, path = %path, "Job already owned by another path");
                return Ok(());
            }
            Err(e) => {
                // Fail closed: no lock, no delivery.
                warn!(job_id = %request.job_id, path = %path, error = %e, "Lock store unreachable, refusing to deliver");
                return Err(e);
            }
        }

        let started = Instant::now();
        let outcome = match timeout(
            self.config.sender_timeout,
            self.sender.send(&request.payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Transient(format!(
                "sender timed out after {}ms",
                self.config.sender_timeout.as_millis()
            ))),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                self.finish_success(path, &request.job_id).await;
                self.metrics.record(path, duration_ms, true);
                info!(
                    job_id = %request.job_id,
                    path = %path,
                    duration_ms,
                    kind = %request.payload.kind(),
                    "Notification delivered"
                );
                Ok(())
            }
            Err(e) => {
                // No completion marker: the other path may retry fresh.
                if let Err(release_err) = self.lock.release(&request.job_id).await {
                    warn!(job_id = %request.job_id, error = %release_err, "Failed to release delivery lock");
                }
                self.metrics.record(path, duration_ms, false);
                warn!(job_id = %request.job_id, path = %path, error = %e, "Notification delivery failed");
                Err(e)
            }
        }
    }

    async fn finish_success(&self, path: DeliveryPath, job_id: &str) {
        if let Err(e) = self.lock.mark_completed(job_id).await {
            // Delivered, but the dedup window is now open until the
            // insurance path hits lock contention or cancellation.
            warn!(job_id = %job_id, error = %e, "Delivered but completion marker write failed");
        }

        if let Err(e) = self.kv.del(&fastpath_key(job_id)).await {
            debug!(job_id = %job_id, error = %e, "Failed to drop fast-path record");
        }

        if let Err(e) = self.lock.release(job_id).await {
            debug!(job_id = %job_id, error = %e, "Failed to release delivery lock");
        }

        if path == DeliveryPath::Fast {
            // Best effort: if cancellation loses the race, the lock
            // already protects against a second send.
            match self.store.cancel(NOTIFICATIONS_QUEUE, job_id).await {
                Ok(true) => debug!(job_id = %job_id, "Insurance job cancelled"),
                Ok(false) => {}
                Err(e) => debug!(job_id = %job_id, error = %e, "Insurance cancellation failed"),
            }
        }
    }

    /// Consumes the urgent channel. Any number of consumer processes may
    /// run this; the lock arbitrates between them.
    pub fn spawn_fast_path_consumer(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                let mut receiver = match queue.broadcast.subscribe(URGENT_CHANNEL).await {
                    Ok(receiver) => receiver,
                    Err(e) => {
                        warn!(error = %e, "Fast-path subscribe failed, retrying");
                        sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };

                info!(channel = URGENT_CHANNEL, "Fast-path consumer subscribed");

                while let Some(raw) = receiver.recv().await {
                    let envelope: BroadcastEnvelope = match serde_json::from_str(&raw) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            warn!(error = %e, "Discarding malformed broadcast envelope");
                            continue;
                        }
                    };

                    let request = DeliveryRequest {
                        job_id: envelope.job_id,
                        payload: envelope.payload,
                    };

                    if let Err(e) = queue.deliver(DeliveryPath::Fast, &request).await {
                        debug!(
                            job_id = %request.job_id,
                            error = %e,
                            "Fast-path delivery failed, insurance job will retry"
                        );
                    }
                }

                warn!("Fast-path subscription closed, resubscribing");
            }
        })
    }

    /// Workers for all three durable queues: deliveries, escalations and
    /// the scheduled maintenance sweep.
    pub fn spawn_queue_workers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = spawn_workers(
            Arc::clone(&self.store),
            NOTIFICATIONS_QUEUE,
            Arc::new(DurableDeliveryHandler {
                queue: Arc::clone(self),
            }),
            self.config.worker_concurrency,
            self.config.poll_interval,
        );

        handles.extend(spawn_workers(
            Arc::clone(&self.store),
            ESCALATIONS_QUEUE,
            Arc::new(EscalationHandler {
                events: Arc::clone(&self.events),
            }),
            1,
            self.config.poll_interval,
        ));

        let sweeper = OverflowSweeper::new(
            Arc::clone(&self.store),
            Arc::clone(&self.kv),
            self.config.staleness_threshold,
        );
        handles.extend(spawn_workers(
            Arc::clone(&self.store),
            MAINTENANCE_QUEUE,
            Arc::new(SweepHandler::new(sweeper)),
            1,
            self.config.poll_interval,
        ));

        handles
    }

    /// Schedules a delayed escalation for an unacknowledged alert. The
    /// singleton key collapses repeat calls within the window into one
    /// job; which staff a tier maps to is the sender collaborator's
    /// policy, so the handler only emits the escalation event.
    pub async fn schedule_escalation(
        &self,
        alert_id: &str,
        hospital_id: &str,
        tier: u32,
    ) -> Result<Option<String>, Error> {
        let request = EscalationRequest {
            alert_id: alert_id.to_string(),
            hospital_id: hospital_id.to_string(),
            tier,
        };

        let job = NewJob::new(serde_json::to_value(&request)?)
            .with_singleton_key(format!("escalate:{}", alert_id))
            .with_start_after(self.config.escalation_delay)
            .with_retry_delay(self.config.retry_delay);

        let enqueued = self.store.enqueue(ESCALATIONS_QUEUE, job).await?;
        match &enqueued {
            Some(job_id) => {
                info!(alert_id = %alert_id, tier, job_id = %job_id, "Escalation scheduled")
            }
            None => debug!(alert_id = %alert_id, "Escalation already pending for alert"),
        }
        Ok(enqueued)
    }

    pub async fn stats(&self) -> Result<QueueStats, Error> {
        get_stats(self.store.as_ref(), self.kv.as_ref()).await
    }

    pub fn events(&self) -> &Arc<AlertEventBus> {
        &self.events
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

fn build_payload(request: &SubmitRequest) -> Result<NotificationPayload, SubmitError> {
    let address = || {
        request
            .recipient_address
            .clone()
            .filter(|address| !address.is_empty())
            .ok_or_else(|| {
                SubmitError::InvalidPayload(format!(
                    "recipient_address is required for {} notifications",
                    request.kind
                ))
            })
    };

    Ok(match request.kind {
        NotificationKind::Email => NotificationPayload::Email {
            alert_id: request.alert_id.clone(),
            recipient_id: request.recipient_id.clone(),
            recipient_address: address()?,
        },
        NotificationKind::Push => NotificationPayload::Push {
            alert_id: request.alert_id.clone(),
            recipient_id: request.recipient_id.clone(),
        },
        NotificationKind::Sms => NotificationPayload::Sms {
            alert_id: request.alert_id.clone(),
            recipient_id: request.recipient_id.clone(),
            recipient_address: address()?,
        },
    })
}

struct DurableDeliveryHandler<S, K, B> {
    queue: Arc<HybridQueue<S, K, B>>,
}

#[async_trait]
impl<S, K, B> JobHandler for DurableDeliveryHandler<S, K, B>
where
    S: JobStore,
    K: KvStore,
    B: Broadcast,
{
    async fn handle(&self, job: &Job) -> Result<(), DeliveryError> {
        let request: DeliveryRequest = serde_json::from_value(job.payload.clone())
            .map_err(|e| DeliveryError::Permanent(format!("undecodable job payload: {}", e)))?;

        self.queue.deliver(DeliveryPath::Durable, &request).await
    }
}

struct EscalationHandler {
    events: Arc<AlertEventBus>,
}

#[async_trait]
impl JobHandler for EscalationHandler {
    async fn handle(&self, job: &Job) -> Result<(), DeliveryError> {
        let request: EscalationRequest = serde_json::from_value(job.payload.clone())
            .map_err(|e| DeliveryError::Permanent(format!("undecodable job payload: {}", e)))?;

        self.events.alert_escalated(
            &request.alert_id,
            &request.hospital_id,
            serde_json::json!({ "tier": request.tier }),
        );

        info!(alert_id = %request.alert_id, tier = request.tier, "Alert escalated");
        Ok(())
    }
}
