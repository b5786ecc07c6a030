//! A single outbound notification transport. Concrete transports
//! (SMTP, webhook) are out of scope; this is the seam an adapter fills.

use async_trait::async_trait;

#[derive(Debug, Clone, thiserror::Error)]
pub enum NotificationError {
    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotificationError>;
}

/// A generic webhook channel (e.g. a chat-ops incoming webhook).
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotificationError> {
        let payload = serde_json::json!({
            "recipient": recipient,
            "subject": subject,
            "body": body,
        });
        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(NotificationError::Transport(format!("http {}", resp.status())));
        }
        Ok(())
    }
}
