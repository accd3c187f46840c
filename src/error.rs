use thiserror::Error;

/// Failure modes of a single delivery attempt.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("permanent delivery failure: {0}")]
    Permanent(String),

    /// Another delivery path already owns this job. Not a failure.
    #[error("job already claimed by another delivery path")]
    LockContention,

    #[error("{store} store unavailable: {reason}")]
    StoreUnavailable { store: &'static str, reason: String },
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeliveryError::Transient(_) | DeliveryError::StoreUnavailable { .. }
        )
    }
}

/// Rejection returned synchronously from `submit`. Everything after
/// acceptance is observed through the event bus or a status query.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("all delivery paths unavailable: {0}")]
    Unavailable(String),
}
