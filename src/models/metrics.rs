use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryPath {
    Fast,
    Durable,
}

impl DeliveryPath {
    pub const ALL: [DeliveryPath; 2] = [DeliveryPath::Fast, DeliveryPath::Durable];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryPath::Fast => "fast",
            DeliveryPath::Durable => "durable",
        }
    }
}

impl Display for DeliveryPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PathStats {
    pub pending: u64,
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub avg_duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub paths: HashMap<String, PathStats>,
}
