use async_trait::async_trait;
use tracing::info;

use crate::error::DeliveryError;
use crate::models::job::NotificationPayload;

/// The transport collaborator. The queue never knows how email, push or
/// SMS are actually transmitted; it only needs the error taxonomy back
/// so it can decide between retry and dead-letter.
#[async_trait]
pub trait NotificationSender: Send + Sync + 'static {
    async fn send(&self, payload: &NotificationPayload) -> Result<(), DeliveryError>;
}

/// Stand-in sender used until a real transport is wired. Logs and
/// succeeds.
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(&self, payload: &NotificationPayload) -> Result<(), DeliveryError> {
        info!(
            kind = %payload.kind(),
            alert_id = %payload.alert_id(),
            recipient_id = %payload.recipient_id(),
            "Notification handed to transport"
        );
        Ok(())
    }
}
