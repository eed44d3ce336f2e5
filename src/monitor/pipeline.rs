//! リソース1件分の監視サイクル。取得からハッシュ比較、差分、ノイズ判定、保存までを行う。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::clients::{ContentFetcher, FetchTarget};
use crate::diff::diff;
use crate::noise::NoiseClassifier;
use crate::observability::metrics::Metrics;
use crate::severity::Severity;
use crate::store::dao::{ResourceDao, SnapshotDao};
use crate::store::models::{Change, DeliveryStatus, MonitoredResource, Snapshot};
use crate::summary::summarize;
use crate::util::text::{content_hash, truncate_to_bytes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    NoChange,
    FirstSnapshot,
    NoiseFiltered,
    ChangeDetected,
    Error,
}

impl MonitorStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoChange => "no_change",
            Self::FirstSnapshot => "first_snapshot",
            Self::NoiseFiltered => "noise_filtered",
            Self::ChangeDetected => "change_detected",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorOutcome {
    pub resource_id: Uuid,
    pub status: MonitorStatus,
    pub change_id: Option<Uuid>,
    pub snapshot_id: Option<Uuid>,
    pub error: Option<String>,
    #[serde(skip)]
    pub check_interval: chrono::Duration,
    #[serde(skip)]
    pub duration: Duration,
}

impl MonitorOutcome {
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        i64::try_from(self.duration.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Cycles that cannot produce an outcome.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("resource {0} does not exist")]
    ResourceMissing(Uuid),
    #[error("resource {0} is inactive")]
    ResourceInactive(Uuid),
    /// このサイクルでは何も保存されていないため再実行してよい。
    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),
}

pub struct MonitorPipeline {
    resources: Arc<dyn ResourceDao>,
    snapshots: Arc<dyn SnapshotDao>,
    fetcher: Arc<dyn ContentFetcher>,
    classifier: NoiseClassifier,
    max_content_bytes: usize,
    metrics: Arc<Metrics>,
}

impl MonitorPipeline {
    pub fn new(
        resources: Arc<dyn ResourceDao>,
        snapshots: Arc<dyn SnapshotDao>,
        fetcher: Arc<dyn ContentFetcher>,
        classifier: NoiseClassifier,
        max_content_bytes: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            resources,
            snapshots,
            fetcher,
            classifier,
            max_content_bytes,
            metrics,
        }
    }

    /// Run one cycle. Fetch failures come back as an `error` outcome, never as `Err`.
    ///
    /// # Errors
    /// Missing or inactive resources and storage failures.
    #[instrument(skip_all, fields(resource_id = %resource_id))]
    pub async fn process(&self, resource_id: Uuid) -> Result<MonitorOutcome, MonitorError> {
        let started = Instant::now();
        let resource = self
            .resources
            .get_resource(resource_id)
            .await
            .map_err(MonitorError::Storage)?
            .ok_or(MonitorError::ResourceMissing(resource_id))?;
        if !resource.is_active {
            return Err(MonitorError::ResourceInactive(resource_id));
        }

        let result = self.run_cycle(&resource).await;
        let duration = started.elapsed();
        self.metrics.check_duration.observe(duration.as_secs_f64());

        let (cycle, error) = match result {
            Ok(cycle) => (cycle, None),
            Err(CycleError::Fetch(message)) => {
                self.note_failure(resource_id, &message).await;
                (Cycle::bare(MonitorStatus::Error), Some(message))
            }
            Err(CycleError::Storage(e)) => {
                self.metrics
                    .monitor_checks
                    .with_label_values(&[MonitorStatus::Error.as_str()])
                    .inc();
                self.note_failure(resource_id, &format!("storage: {e:#}")).await;
                return Err(MonitorError::Storage(e));
            }
        };

        self.metrics
            .monitor_checks
            .with_label_values(&[cycle.status.as_str()])
            .inc();
        info!(
            status = cycle.status.as_str(),
            change_id = ?cycle.change_id,
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "monitor cycle finished"
        );

        Ok(MonitorOutcome {
            resource_id,
            status: cycle.status,
            change_id: cycle.change_id,
            snapshot_id: cycle.snapshot_id,
            error,
            check_interval: resource.check_interval(),
            duration,
        })
    }

    async fn run_cycle(
        &self,
        resource: &MonitoredResource,
    ) -> Result<Cycle, CycleError> {
        let fetched = self
            .fetcher
            .fetch(&FetchTarget::from(resource))
            .await
            .map_err(|e| CycleError::Fetch(e.to_string()))?;
        #[allow(clippy::cast_precision_loss)]
        self.metrics
            .fetch_duration
            .observe(fetched.fetch_duration_ms as f64 / 1000.0);

        let hash = content_hash(&fetched.content);
        let previous = self
            .snapshots
            .latest_snapshot(resource.id)
            .await
            .map_err(CycleError::Storage)?;

        if previous.as_ref().is_some_and(|prev| prev.content_hash == hash) {
            debug!("content hash unchanged");
            return Ok(Cycle::bare(MonitorStatus::NoChange));
        }

        let (retained, truncated) = truncate_to_bytes(&fetched.content, self.max_content_bytes);
        if truncated {
            warn!(
                bytes = fetched.content.len(),
                max_bytes = self.max_content_bytes,
                "content truncated before storage"
            );
        }
        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            resource_id: resource.id,
            content_hash: hash,
            content_text: retained.to_string(),
            content_truncated: truncated,
            status_code: i32::from(fetched.status_code),
            fetch_duration_ms: i64::try_from(fetched.fetch_duration_ms).unwrap_or(i64::MAX),
            captured_at: Utc::now(),
        };

        let Some(previous) = previous else {
            self.snapshots
                .record_capture(&snapshot, None)
                .await
                .map_err(CycleError::Storage)?;
            return Ok(Cycle::captured(MonitorStatus::FirstSnapshot, snapshot.id));
        };

        let change_set = diff(&previous.content_text, &snapshot.content_text);
        let classifier = self.classifier.for_resource(&resource.noise_patterns);
        if classifier.is_noise(&change_set) {
            self.snapshots
                .record_capture(&snapshot, None)
                .await
                .map_err(CycleError::Storage)?;
            debug!(total_changes = change_set.total_changes(), "change suppressed as noise");
            return Ok(Cycle::captured(MonitorStatus::NoiseFiltered, snapshot.id));
        }

        let change = Change {
            id: Uuid::new_v4(),
            resource_id: resource.id,
            snapshot_before_id: previous.id,
            snapshot_after_id: snapshot.id,
            summary: summarize(&change_set),
            severity: Severity::classify(&change_set),
            diff: change_set,
            delivery_status: DeliveryStatus::Pending,
            notified_at: None,
            detected_at: snapshot.captured_at,
        };
        self.snapshots
            .record_capture(&snapshot, Some(&change))
            .await
            .map_err(CycleError::Storage)?;

        info!(
            change_id = %change.id,
            severity = change.severity.as_str(),
            total_changes = change.diff.total_changes(),
            summary = %change.summary,
            "change detected"
        );
        Ok(Cycle {
            status: MonitorStatus::ChangeDetected,
            change_id: Some(change.id),
            snapshot_id: Some(snapshot.id),
        })
    }

    async fn note_failure(&self, resource_id: Uuid, message: &str) {
        warn!(resource_id = %resource_id, error = %message, "monitor cycle failed");
        if let Err(e) = self.resources.record_failure(resource_id, message).await {
            warn!(resource_id = %resource_id, error = %e, "failed to record monitor failure");
        }
    }
}

struct Cycle {
    status: MonitorStatus,
    change_id: Option<Uuid>,
    snapshot_id: Option<Uuid>,
}

impl Cycle {
    fn bare(status: MonitorStatus) -> Self {
        Self {
            status,
            change_id: None,
            snapshot_id: None,
        }
    }

    fn captured(status: MonitorStatus, snapshot_id: Uuid) -> Self {
        Self {
            status,
            change_id: None,
            snapshot_id: Some(snapshot_id),
        }
    }
}

enum CycleError {
    Fetch(String),
    Storage(anyhow::Error),
}
