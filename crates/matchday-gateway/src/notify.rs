use async_trait::async_trait;
use chrono::Utc;
use matchday_scheduler::NotificationSink;
use serde_json::json;
use tracing::{debug, error, warn};

/// Posts job alerts to a webhook as `{title, message, timestamp}`.
///
/// Alerts are also logged at ERROR level, so nothing is lost when the
/// webhook is unreachable.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn alert(&self, title: &str, message: &str) {
        error!(%title, %message, "job alert");
        let body = json!({
            "title": title,
            "message": message,
            "timestamp": Utc::now().to_rfc3339(),
        });
        match self.client.post(&self.url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => debug!("alert delivered to webhook"),
            Ok(resp) => warn!(status = resp.status().as_u16(), "alert webhook rejected delivery"),
            Err(e) => warn!(error = %e, "alert webhook unreachable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_title_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/alerts"))
            .and(body_partial_json(json!({
                "title": "Sync job failed: Sync fixtures",
                "message": "timeout"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hooks/alerts", server.uri()));
        notifier.alert("Sync job failed: Sync fixtures", "timeout").await;
    }

    #[tokio::test]
    async fn failed_delivery_is_not_fatal() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/unreachable".to_string());
        notifier.alert("title", "message").await;
    }
}
