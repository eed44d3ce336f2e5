//! SMTP email delivery via `lettre`.

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor, message::Mailbox,
    transport::smtp::authentication::Credentials,
};
use tracing::info;

use super::channel::{DeliveryChannel, DeliveryError, Notification};
use crate::config::SmtpConfig;

/// Sends one plain-text email per notification to the subscriber's address.
#[derive(Debug)]
pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailChannel {
    /// Port 465 uses implicit TLS, every other port STARTTLS.
    ///
    /// # Errors
    /// Returns an error when the sender address or relay host is invalid.
    pub fn from_config(config: &SmtpConfig) -> Result<Self, DeliveryError> {
        let from: Mailbox = config
            .from()
            .parse()
            .map_err(|e: lettre::address::AddressError| DeliveryError::Config(e.to_string()))?;

        let relay = if config.port() == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(config.host())
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(config.host())
        };
        let mut builder = relay
            .map_err(|e| DeliveryError::Config(e.to_string()))?
            .port(config.port());

        if let (Some(username), Some(password)) = (config.username(), config.password()) {
            builder = builder.credentials(Credentials::new(username.to_string(), password.to_string()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

fn render_body(notification: &Notification) -> String {
    let mut body = format!("{}\n\n", notification.summary);
    if let Some(url) = &notification.resource_url {
        body.push_str(&format!("Resource: {url}\n"));
    }
    body.push_str(&format!(
        "Severity: {}\nSections changed: {}\nDetected at: {}\n",
        notification.severity.as_str(),
        notification.total_changes,
        notification.detected_at.to_rfc3339()
    ));
    body
}

#[async_trait]
impl DeliveryChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, recipient: &str, notification: &Notification) -> Result<(), DeliveryError> {
        let to: Mailbox = recipient.parse().map_err(|e: lettre::address::AddressError| {
            DeliveryError::InvalidRecipient {
                recipient: recipient.to_string(),
                message: e.to_string(),
            }
        })?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&notification.subject)
            .body(render_body(notification))
            .map_err(|e| DeliveryError::Smtp(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| DeliveryError::Smtp(e.to_string()))?;

        info!(
            channel = "email",
            change_id = %notification.change_id,
            "notification delivered"
        );
        Ok(())
    }
}
