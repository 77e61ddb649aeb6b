//! Notification collaborators.
//!
//! The webhook notifier posts a Slack-compatible payload. When no webhook
//! is configured the log notifier keeps the notification path alive so
//! every incident outcome still lands somewhere visible.

use crate::actions::{ActionError, Notifier};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::info;

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, url }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str) -> Result<(), ActionError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "text": message }))
            .send()
            .await
            .map_err(|e| ActionError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ActionError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        Ok(())
    }
}

/// Fallback notifier: writes the notification to the log stream.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> Result<(), ActionError> {
        info!(notification = %message, "Incident notification");
        Ok(())
    }
}
