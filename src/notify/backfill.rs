//! 配信が確認されていない変更を再キューする。

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::observability::metrics::Metrics;
use crate::queue::JobProducer;
use crate::store::dao::{ChangeDao, NotificationDao};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub scanned: usize,
    pub enqueued: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct BackfillSettings {
    pub window: chrono::Duration,
    pub batch_size: i64,
}

impl BackfillSettings {
    #[must_use]
    pub fn new(window_hours: u32, batch_size: u32) -> Self {
        Self {
            window: chrono::Duration::hours(i64::from(window_hours)),
            batch_size: i64::from(batch_size),
        }
    }
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self::new(24, 50)
    }
}

pub struct BackfillScanner {
    changes: Arc<dyn ChangeDao>,
    notifications: Arc<dyn NotificationDao>,
    producer: JobProducer,
    settings: BackfillSettings,
    metrics: Arc<Metrics>,
}

impl BackfillScanner {
    pub fn new(
        changes: Arc<dyn ChangeDao>,
        notifications: Arc<dyn NotificationDao>,
        producer: JobProducer,
        settings: BackfillSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            changes,
            notifications,
            producer,
            settings,
            metrics,
        }
    }

    /// 直近の未配信変更を古い順に1回だけ突き合わせる。
    ///
    /// `skipped`には送信済みレコードがある変更と、バックフィルジョブがまだ生きている変更を数える。
    pub async fn reconcile(&self) -> Result<BackfillReport> {
        let since = Utc::now() - self.settings.window;
        let pending = self
            .changes
            .pending_changes(since, self.settings.batch_size)
            .await
            .context("failed to list pending changes")?;

        let mut report = BackfillReport {
            scanned: pending.len(),
            ..BackfillReport::default()
        };

        for change in pending {
            match self.notifications.has_sent_record(change.id).await {
                Ok(true) => {
                    report.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(change_id = %change.id, error = %e, "failed to check delivery log");
                    continue;
                }
            }

            match self.producer.enqueue_backfill_notification(change.id).await {
                Ok(Some(_)) => report.enqueued += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => warn!(change_id = %change.id, error = %e, "failed to enqueue backfill job"),
            }
        }

        self.metrics
            .backfill_enqueued
            .inc_by(u64::try_from(report.enqueued).unwrap_or(u64::MAX));
        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                enqueued = report.enqueued,
                skipped = report.skipped,
                "backfill reconcile finished"
            );
        }
        Ok(report)
    }
}
