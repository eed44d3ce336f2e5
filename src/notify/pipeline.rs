//! 変更の通知を実質1回だけ配信する。
//!
//! 変更の`sent`フラグと通知ログの`sent`行の2段のガードで、繰り返し呼ばれても重複送信しない。
//! 変更に対する期限付きのクレームで、複数ワーカーの同時送信を防ぐ。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::channel::{ChannelRegistry, Notification};
use crate::observability::metrics::Metrics;
use crate::store::dao::{ChangeDao, NotificationDao, ResourceDao, SubscriberDirectory};
use crate::store::models::{Change, DeliveryStatus, NotificationRecord};
use crate::util::retry::RetryConfig;

pub const REASON_ALREADY_SENT: &str = "already_sent";
pub const REASON_ALREADY_RECORDED: &str = "already_recorded";
pub const REASON_IN_PROGRESS: &str = "delivery_in_progress";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub reason: Option<String>,
}

impl DeliveryOutcome {
    fn delivered() -> Self {
        Self {
            success: true,
            reason: None,
        }
    }

    fn skipped(reason: &str) -> Self {
        Self {
            success: true,
            reason: Some(reason.to_string()),
        }
    }

    fn not_delivered(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("change {0} does not exist")]
    ChangeMissing(Uuid),
    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),
}

/// Timing knobs for [`NotificationPipeline`].
#[derive(Debug, Clone, Copy)]
pub struct DeliverySettings {
    pub claim_timeout: Duration,
    /// Local retry of the bookkeeping writes that follow a successful send.
    pub record_retry: RetryConfig,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            claim_timeout: Duration::from_secs(120),
            record_retry: RetryConfig::new(3, 100, 2000),
        }
    }
}

pub struct NotificationPipeline {
    changes: Arc<dyn ChangeDao>,
    notifications: Arc<dyn NotificationDao>,
    subscribers: Arc<dyn SubscriberDirectory>,
    resources: Arc<dyn ResourceDao>,
    channels: ChannelRegistry,
    worker_id: String,
    settings: DeliverySettings,
    metrics: Arc<Metrics>,
}

impl NotificationPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        changes: Arc<dyn ChangeDao>,
        notifications: Arc<dyn NotificationDao>,
        subscribers: Arc<dyn SubscriberDirectory>,
        resources: Arc<dyn ResourceDao>,
        channels: ChannelRegistry,
        worker_id: impl Into<String>,
        settings: DeliverySettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            changes,
            notifications,
            subscribers,
            resources,
            channels,
            worker_id: worker_id.into(),
            settings,
            metrics,
        }
    }

    /// Deliver a change. Safe to call any number of times, concurrently or not.
    ///
    /// Channel failures are recorded and reported through the outcome.
    ///
    /// # Errors
    /// The change does not exist, or the store failed before anything was sent.
    #[instrument(skip_all, fields(change_id = %change_id))]
    pub async fn deliver(&self, change_id: Uuid) -> Result<DeliveryOutcome, NotifyError> {
        let change = self
            .changes
            .get_change(change_id)
            .await
            .map_err(NotifyError::Storage)?
            .ok_or(NotifyError::ChangeMissing(change_id))?;

        if change.delivery_status == DeliveryStatus::Sent {
            self.count("already_sent");
            return Ok(DeliveryOutcome::skipped(REASON_ALREADY_SENT));
        }
        if self.repair_if_recorded(change_id).await? {
            return Ok(DeliveryOutcome::skipped(REASON_ALREADY_RECORDED));
        }

        let claimant = format!("{}:{}", self.worker_id, Uuid::new_v4().simple());
        let now = Utc::now();
        let claim_timeout = chrono::Duration::from_std(self.settings.claim_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(2));
        let claimed = self
            .changes
            .try_claim_delivery(change_id, &claimant, now, now - claim_timeout)
            .await
            .map_err(NotifyError::Storage)?;
        if !claimed {
            self.count("in_progress");
            debug!("another worker holds the delivery claim");
            return Ok(DeliveryOutcome::not_delivered(REASON_IN_PROGRESS));
        }

        let result = self.deliver_claimed(&change).await;

        if let Err(e) = self.changes.release_delivery_claim(change_id, &claimant).await {
            warn!(error = %e, "failed to release delivery claim, it will expire");
        }
        result
    }

    /// Guard two: a `sent` row exists. Repairs the flag best-effort.
    async fn repair_if_recorded(&self, change_id: Uuid) -> Result<bool, NotifyError> {
        let recorded = self
            .notifications
            .has_sent_record(change_id)
            .await
            .map_err(NotifyError::Storage)?;
        if recorded {
            self.count("already_sent");
            if let Err(e) = self.changes.mark_sent(change_id, Utc::now()).await {
                warn!(error = %e, "failed to repair delivery flag");
            }
        }
        Ok(recorded)
    }

    async fn deliver_claimed(&self, change: &Change) -> Result<DeliveryOutcome, NotifyError> {
        // 先行したワーカーが記録だけ済ませて終了した場合
        if self.repair_if_recorded(change.id).await? {
            return Ok(DeliveryOutcome::skipped(REASON_ALREADY_RECORDED));
        }

        let Some(subscriber) = self
            .subscribers
            .resolve(change.resource_id)
            .await
            .map_err(NotifyError::Storage)?
        else {
            return Ok(self.record_failure(change, None, "no subscriber for resource").await);
        };

        let Some(channel) = self.channels.get(&subscriber.channel) else {
            let reason = format!("channel {} is not configured", subscriber.channel);
            return Ok(self.record_failure(change, Some(&subscriber), reason).await);
        };

        let Some(recipient) = subscriber.address() else {
            let reason = format!("subscriber has no {} address", subscriber.channel);
            return Ok(self.record_failure(change, Some(&subscriber), reason).await);
        };

        let resource = self
            .resources
            .get_resource(change.resource_id)
            .await
            .map_err(NotifyError::Storage)?;
        let notification = Notification::for_change(change, resource.as_ref());

        if let Err(e) = channel.send(recipient, &notification).await {
            let reason = format!("delivery failed: {e}");
            return Ok(self.record_failure(change, Some(&subscriber), reason).await);
        }

        let sent_at = Utc::now();
        let record = NotificationRecord::sent(change.id, &subscriber, recipient, sent_at);
        if let Err(e) = self
            .with_retry("insert sent record", || self.notifications.insert_record(&record))
            .await
        {
            error!(error = %e, "notification sent but not logged");
        }
        if let Err(e) = self
            .with_retry("mark change sent", || self.changes.mark_sent(change.id, sent_at))
            .await
        {
            error!(error = %e, "notification sent but delivery flag not set");
        }

        self.count("sent");
        info!(
            channel = %subscriber.channel,
            severity = change.severity.as_str(),
            "change delivered"
        );
        Ok(DeliveryOutcome::delivered())
    }

    async fn record_failure(
        &self,
        change: &Change,
        subscriber: Option<&crate::store::models::Subscriber>,
        reason: impl Into<String>,
    ) -> DeliveryOutcome {
        let reason = reason.into();
        warn!(error = %reason, "delivery failed, leaving change pending");
        let record = NotificationRecord::failed(change.id, subscriber, reason.clone(), Utc::now());
        if let Err(e) = self.notifications.insert_record(&record).await {
            warn!(error = %e, "failed to record delivery failure");
        }
        self.count("failed");
        DeliveryOutcome::not_delivered(reason)
    }

    async fn with_retry<F, Fut>(&self, what: &str, mut op: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let retry = self.settings.record_retry;
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) if retry.can_retry(attempt + 1) => {
                    attempt += 1;
                    warn!(attempt, error = %e, "{what} failed, retrying");
                    sleep(retry.delay_for_attempt(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn count(&self, result: &str) {
        self.metrics.notifications.with_label_values(&[result]).inc();
    }
}
