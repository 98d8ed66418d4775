use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::ChangeNotification;
use crate::error::{NotifyError, NotifyResult};
use crate::traits::Notifier;
use crate::types::ChangeEvent;

/// POSTs a JSON [`ChangeNotification`] to a URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Url,
}

impl WebhookNotifier {
    pub fn new(url: Url) -> NotifyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Config(e.to_string()))?;
        Ok(Self { client, url })
    }

    /// Set a custom HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &ChangeEvent) -> NotifyResult<()> {
        let notification = ChangeNotification::from_event(event);

        let response = self
            .client
            .post(self.url.clone())
            .header("Idempotency-Key", notification.dedupe_key.as_str())
            .json(&notification)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(Box::new(e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(url = %self.url, status = status.as_u16(), "Webhook delivered");
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}
