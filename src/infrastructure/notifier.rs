use crate::domain::ports::{Notification, Notifier};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use tracing::info;

/// Emits each notification as a structured log line. Delivery channels
/// (push, SMS, email) subscribe downstream of the log stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let payload = serde_json::to_string(notification)
            .map_err(|e| EngineError::NotificationError(e.to_string()))?;
        info!(
            user_id = %notification.user_id(),
            notification = %payload,
            "Notification triggered"
        );
        Ok(())
    }
}
