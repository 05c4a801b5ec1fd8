use async_trait::async_trait;
use tracing::error;

/// Receives alerts for failed high-priority jobs.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn alert(&self, title: &str, message: &str);
}

/// Writes alerts to the log at ERROR level.
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    async fn alert(&self, title: &str, message: &str) {
        error!(%title, %message, "job alert");
    }
}
