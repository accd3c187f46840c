use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::debug;

use crate::models::event::{AlertEvent, AlertEventType, Scope};

type Subscribers = HashMap<Scope, HashMap<u64, mpsc::UnboundedSender<AlertEvent>>>;

/// Process-wide relay for alert lifecycle transitions. Owns no durable
/// state: an event reaches whoever is subscribed at emit time, and
/// persistence is the audit log collaborator's job.
pub struct AlertEventBus {
    subscribers: Mutex<Subscribers>,
    next_subscriber_id: AtomicU64,
    next_event_id: AtomicU64,
}

impl AlertEventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(0),
            next_event_id: AtomicU64::new(0),
        }
    }

    /// Fans one event out to the alert, hospital and global scopes,
    /// synchronously within the emitting call. Dead receivers are
    /// pruned as they are found.
    pub fn emit(
        &self,
        event_type: AlertEventType,
        alert_id: &str,
        hospital_id: &str,
        data: JsonValue,
    ) -> AlertEvent {
        let event = AlertEvent {
            id: self.next_event_id.fetch_add(1, Ordering::SeqCst) + 1,
            event_type,
            alert_id: alert_id.to_string(),
            hospital_id: hospital_id.to_string(),
            data,
            timestamp: Utc::now(),
        };

        let scopes = [
            Scope::Alert(alert_id.to_string()),
            Scope::Hospital(hospital_id.to_string()),
            Scope::Global,
        ];

        let mut subscribers = self.subscribers.lock().expect("event bus lock poisoned");
        for scope in scopes {
            if let Some(listeners) = subscribers.get_mut(&scope) {
                listeners.retain(|_, tx| tx.send(event.clone()).is_ok());
                if listeners.is_empty() {
                    subscribers.remove(&scope);
                }
            }
        }

        debug!(
            event_id = event.id,
            event_type = %event.event_type,
            alert_id = %event.alert_id,
            "Alert event emitted"
        );
        event
    }

    pub fn subscribe(self: &Arc<Self>, scope: Scope) -> Subscription {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut subscribers = self.subscribers.lock().expect("event bus lock poisoned");
        subscribers.entry(scope.clone()).or_default().insert(id, tx);

        Subscription {
            bus: Arc::clone(self),
            scope,
            id,
            receiver: rx,
            last_event_id: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        let subscribers = self.subscribers.lock().expect("event bus lock poisoned");
        subscribers.values().map(HashMap::len).sum()
    }

    fn remove(&self, scope: &Scope, id: u64) {
        let mut subscribers = self.subscribers.lock().expect("event bus lock poisoned");
        if let Some(listeners) = subscribers.get_mut(scope) {
            listeners.remove(&id);
            if listeners.is_empty() {
                subscribers.remove(scope);
            }
        }
    }

    pub fn alert_created(&self, alert_id: &str, hospital_id: &str, data: JsonValue) -> AlertEvent {
        self.emit(AlertEventType::Created, alert_id, hospital_id, data)
    }

    pub fn alert_acknowledged(
        &self,
        alert_id: &str,
        hospital_id: &str,
        data: JsonValue,
    ) -> AlertEvent {
        self.emit(AlertEventType::Acknowledged, alert_id, hospital_id, data)
    }

    pub fn alert_resolved(&self, alert_id: &str, hospital_id: &str, data: JsonValue) -> AlertEvent {
        self.emit(AlertEventType::Resolved, alert_id, hospital_id, data)
    }

    pub fn alert_escalated(
        &self,
        alert_id: &str,
        hospital_id: &str,
        data: JsonValue,
    ) -> AlertEvent {
        self.emit(AlertEventType::Escalated, alert_id, hospital_id, data)
    }

    pub fn alert_updated(&self, alert_id: &str, hospital_id: &str, data: JsonValue) -> AlertEvent {
        self.emit(AlertEventType::Updated, alert_id, hospital_id, data)
    }
}

impl Default for AlertEventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Live subscription handle. Explicitly removable, and removal is
/// idempotent; dropping the handle unsubscribes as well, so an
/// abandoned subscriber cannot leak its listener slot.
pub struct Subscription {
    bus: Arc<AlertEventBus>,
    scope: Scope,
    id: u64,
    receiver: mpsc::UnboundedReceiver<AlertEvent>,
    last_event_id: u64,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<AlertEvent> {
        let event = self.receiver.recv().await?;
        self.last_event_id = event.id;
        Some(event)
    }

    pub fn try_recv(&mut self) -> Option<AlertEvent> {
        let event = self.receiver.try_recv().ok()?;
        self.last_event_id = event.id;
        Some(event)
    }

    /// Cursor for requesting a backlog from the audit log collaborator
    /// after a reconnect. The bus itself does not replay.
    pub fn last_event_id(&self) -> u64 {
        self.last_event_id
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn unsubscribe(&self) {
        self.bus.remove(&self.scope, self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.remove(&self.scope, self.id);
    }
}
