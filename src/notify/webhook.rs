//! JSON webhook delivery.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::time::sleep;
use tracing::{info, warn};

use super::channel::{DeliveryChannel, DeliveryError, Notification};
use crate::util::retry::{RetryConfig, is_retryable_error};

/// POSTs the notification as JSON to the subscriber's webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    client: Client,
    retry: RetryConfig,
}

impl WebhookChannel {
    /// # Errors
    /// Returns an error when the HTTP client cannot be built.
    pub fn new(timeout: Duration, retry: RetryConfig) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("watchpoint-worker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, retry })
    }

    async fn post_once(&self, url: &str, notification: &Notification) -> Result<(), reqwest::Error> {
        self.client
            .post(url)
            .json(notification)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl DeliveryChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, recipient: &str, notification: &Notification) -> Result<(), DeliveryError> {
        if reqwest::Url::parse(recipient).is_err() {
            return Err(DeliveryError::InvalidRecipient {
                recipient: recipient.to_string(),
                message: "not a valid URL".to_string(),
            });
        }

        let mut attempt = 0;
        loop {
            match self.post_once(recipient, notification).await {
                Ok(()) => {
                    info!(
                        channel = "webhook",
                        change_id = %notification.change_id,
                        attempts = attempt + 1,
                        "notification delivered"
                    );
                    return Ok(());
                }
                Err(e) if is_retryable_error(&e) && self.retry.can_retry(attempt + 1) => {
                    attempt += 1;
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        change_id = %notification.change_id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "webhook delivery failed, retrying"
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(DeliveryError::Http(e)),
            }
        }
    }
}
