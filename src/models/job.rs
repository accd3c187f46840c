use std::fmt::{Display, Formatter, Result};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Email,
    Push,
    Sms,
}

impl Display for NotificationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            NotificationKind::Email => write!(f, "email"),
            NotificationKind::Push => write!(f, "push"),
            NotificationKind::Sms => write!(f, "sms"),
        }
    }
}

/// Closed payload union. Each variant carries only the fields its
/// transport needs, discriminated by `kind` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NotificationPayload {
    Email {
        alert_id: String,
        recipient_id: String,
        recipient_address: String,
    },
    Push {
        alert_id: String,
        recipient_id: String,
    },
    Sms {
        alert_id: String,
        recipient_id: String,
        recipient_address: String,
    },
}

impl NotificationPayload {
    pub fn kind(&self) -> NotificationKind {
        match self {
            NotificationPayload::Email { .. } => NotificationKind::Email,
            NotificationPayload::Push { .. } => NotificationKind::Push,
            NotificationPayload::Sms { .. } => NotificationKind::Sms,
        }
    }

    pub fn alert_id(&self) -> &str {
        match self {
            NotificationPayload::Email { alert_id, .. }
            | NotificationPayload::Push { alert_id, .. }
            | NotificationPayload::Sms { alert_id, .. } => alert_id,
        }
    }

    pub fn recipient_id(&self) -> &str {
        match self {
            NotificationPayload::Email { recipient_id, .. }
            | NotificationPayload::Push { recipient_id, .. }
            | NotificationPayload::Sms { recipient_id, .. } => recipient_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Active,
    Completed,
    DeadLetter,
}

/// A job submitted to the durable store.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub payload: JsonValue,
    pub priority: i32,
    pub retry_limit: u32,
    pub retry_delay: Duration,
    pub start_after: Duration,
    pub singleton_key: Option<String>,
}

impl NewJob {
    pub fn new(payload: JsonValue) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            priority: 0,
            retry_limit: 3,
            retry_delay: Duration::from_secs(1),
            start_after: Duration::ZERO,
            singleton_key: None,
        }
    }

    pub fn with_id(mut self, id: String) -> Self {
        self.id = id;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_start_after(mut self, start_after: Duration) -> Self {
        self.start_after = start_after;
        self
    }

    pub fn with_singleton_key(mut self, key: String) -> Self {
        self.singleton_key = Some(key);
        self
    }
}

/// A claimed job handed to a worker.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub payload: JsonValue,
    pub attempts: u32,
    pub retry_limit: u32,
    pub retry_delay: Duration,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    Retrying { attempts: u32, delay: Duration },
    DeadLettered,
}

/// Exponential backoff for the attempt that just failed (1-based).
pub fn backoff_delay(retry_delay: Duration, attempt: u32) -> Duration {
    let doublings = attempt.saturating_sub(1).min(16);
    retry_delay.saturating_mul(1u32 << doublings)
}

/// Message carried on the urgent pub/sub channel. Not durable; its only
/// persistent trace is the `fastpath:<jobId>` record and, after delivery,
/// the `completed:<jobId>` marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastEnvelope {
    pub job_id: String,
    pub payload: NotificationPayload,
    pub published_at: DateTime<Utc>,
}

/// Durable payload for the notifications queue. Keeps the notification's
/// own job id, which stays the lock and dedup key even when the sweeper
/// re-enqueues under a fresh row id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub job_id: String,
    pub payload: NotificationPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRequest {
    pub alert_id: String,
    pub hospital_id: String,
    pub tier: u32,
}
