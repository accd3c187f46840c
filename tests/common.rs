use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use alert_queue::{
    clients::memory::{MemoryBroadcast, MemoryJobStore, MemoryKv},
    config::QueueConfig,
    error::DeliveryError,
    events::AlertEventBus,
    models::job::{NotificationKind, NotificationPayload},
    queue::orchestrator::{HybridQueue, SubmitRequest},
    sender::NotificationSender,
};
use async_trait::async_trait;
use tokio::time::sleep;

/// Sender double that counts successful sends and can be told to fail
/// or stall before answering.
pub struct CountingSender {
    sent: AtomicUsize,
    failures_remaining: AtomicUsize,
    delay: Duration,
}

impl CountingSender {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            sent: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSender for CountingSender {
    async fn send(&self, _payload: &NotificationPayload) -> Result<(), DeliveryError> {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        if self.failures_remaining.load(Ordering::SeqCst) > 0 {
            self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(DeliveryError::Transient("injected failure".to_string()));
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct TestQueue {
    pub store: Arc<MemoryJobStore>,
    pub kv: Arc<MemoryKv>,
    pub broadcast: Arc<MemoryBroadcast>,
    pub sender: Arc<CountingSender>,
    pub events: Arc<AlertEventBus>,
    pub queue: Arc<HybridQueue<MemoryJobStore, MemoryKv, MemoryBroadcast>>,
}

pub fn test_config() -> QueueConfig {
    QueueConfig {
        insurance_delay: Duration::from_millis(80),
        lock_ttl: Duration::from_secs(30),
        completed_ttl: Duration::from_secs(3600),
        fastpath_record_ttl: Duration::from_secs(3600),
        staleness_threshold: Duration::from_millis(60),
        sender_timeout: Duration::from_millis(250),
        escalation_delay: Duration::from_millis(40),
        worker_concurrency: 2,
        poll_interval: Duration::from_millis(20),
        email_retry_limit: 2,
        push_retry_limit: 2,
        sms_retry_limit: 2,
        retry_delay: Duration::from_millis(10),
        metrics_retention: Duration::from_secs(3600),
    }
}

pub fn test_queue() -> TestQueue {
    test_queue_with(Arc::new(CountingSender::new()), test_config())
}

pub fn test_queue_with(sender: Arc<CountingSender>, config: QueueConfig) -> TestQueue {
    let store = Arc::new(MemoryJobStore::new());
    let kv = Arc::new(MemoryKv::new());
    let broadcast = Arc::new(MemoryBroadcast::new());
    let events = Arc::new(AlertEventBus::new());

    let queue = Arc::new(HybridQueue::new(
        Arc::clone(&store),
        Arc::clone(&kv),
        Arc::clone(&broadcast),
        Arc::clone(&sender) as Arc<dyn NotificationSender>,
        Arc::clone(&events),
        config,
    ));

    TestQueue {
        store,
        kv,
        broadcast,
        sender,
        events,
        queue,
    }
}

pub fn urgent_push(alert_id: &str) -> SubmitRequest {
    SubmitRequest {
        alert_id: alert_id.to_string(),
        kind: NotificationKind::Push,
        recipient_id: "nurse-1".to_string(),
        recipient_address: None,
        urgent: true,
    }
}

pub fn normal_email(alert_id: &str) -> SubmitRequest {
    SubmitRequest {
        alert_id: alert_id.to_string(),
        kind: NotificationKind::Email,
        recipient_id: "nurse-1".to_string(),
        recipient_address: Some("nurse-1@ward.example".to_string()),
        urgent: false,
    }
}
