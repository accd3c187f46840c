use std::fmt::{Display, Formatter, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertEventType {
    Created,
    Acknowledged,
    Resolved,
    Escalated,
    Updated,
}

impl Display for AlertEventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            AlertEventType::Created => write!(f, "created"),
            AlertEventType::Acknowledged => write!(f, "acknowledged"),
            AlertEventType::Resolved => write!(f, "resolved"),
            AlertEventType::Escalated => write!(f, "escalated"),
            AlertEventType::Updated => write!(f, "updated"),
        }
    }
}

/// Subscription scope. Typed rather than a raw channel string so a
/// malformed key is a parse error at the edge, not a silent dead channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Hospital(String),
    Alert(String),
    Global,
}

impl Scope {
    pub fn parse(key: &str) -> Option<Self> {
        if key == "*" {
            return Some(Scope::Global);
        }
        if let Some(id) = key.strip_prefix("hospital:") {
            if !id.is_empty() {
                return Some(Scope::Hospital(id.to_string()));
            }
        }
        if let Some(id) = key.strip_prefix("alert:") {
            if !id.is_empty() {
                return Some(Scope::Alert(id.to_string()));
            }
        }
        None
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Scope::Hospital(id) => write!(f, "hospital:{}", id),
            Scope::Alert(id) => write!(f, "alert:{}", id),
            Scope::Global => write!(f, "*"),
        }
    }
}

/// Immutable once emitted. `id` is monotonic per process and can be used
/// as a cursor when requesting a backlog from the audit log collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub id: u64,
    #[serde(rename = "type")]
    pub event_type: AlertEventType,
    pub alert_id: String,
    pub hospital_id: String,
    pub data: JsonValue,
    pub timestamp: DateTime<Utc>,
}
