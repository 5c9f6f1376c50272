use async_trait::async_trait;
use reqwest::Client;

use crate::models::AlertHistoryRecord;

/// Delivery seam for fired alerts. The fanout treats `send` as
/// fire-and-forget; a failure is logged and never undoes the firing.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn send(&self, record: &AlertHistoryRecord) -> Result<(), String>;
}

/// POSTs the composed alert payload to an external delivery endpoint
/// (mailer bridge, Slack relay, whatever is configured).
pub struct WebhookNotifier {
    http: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            http: Client::new(),
            url,
        }
    }
}

#[async_trait]
impl AlertNotifier for WebhookNotifier {
    async fn send(&self, record: &AlertHistoryRecord) -> Result<(), String> {
        let res = self
            .http
            .post(&self.url)
            .json(record)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !res.status().is_success() {
            return Err(format!("webhook delivery failed: {}", res.status()));
        }
        Ok(())
    }
}

/// Fallback when no webhook is configured: the alert only shows up in the
/// process log.
pub struct LogNotifier;

#[async_trait]
impl AlertNotifier for LogNotifier {
    async fn send(&self, record: &AlertHistoryRecord) -> Result<(), String> {
        tracing::info!("ALERT {} [{}]: {}", record.symbol, record.level.as_str(), record.message);
        Ok(())
    }
}
