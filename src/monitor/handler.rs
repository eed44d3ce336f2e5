use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use super::pipeline::{MonitorError, MonitorPipeline, MonitorStatus};
use crate::queue::{JobError, JobHandler, JobProducer, MonitorJobPayload, QueueName, QueuedJob};
use crate::scheduler::{LockManager, next_due_from};
use crate::store::models::{RunReport, RunStatus};

/// 監視ジョブを処理し、終了後にリソースのロックを返却する。
pub struct MonitorJobHandler {
    pipeline: Arc<MonitorPipeline>,
    locks: Arc<LockManager>,
    producer: JobProducer,
}

impl MonitorJobHandler {
    pub fn new(pipeline: Arc<MonitorPipeline>, locks: Arc<LockManager>, producer: JobProducer) -> Self {
        Self {
            pipeline,
            locks,
            producer,
        }
    }
}

#[async_trait]
impl JobHandler for MonitorJobHandler {
    fn queue(&self) -> QueueName {
        QueueName::Monitor
    }

    async fn handle(&self, job: &QueuedJob) -> Result<(), JobError> {
        let payload: MonitorJobPayload = serde_json::from_value(job.payload.clone())
            .context("invalid monitor job payload")
            .map_err(JobError::Permanent)?;
        let resource_id = payload.resource_id;
        let owner = payload.lock_owner.as_str();

        let outcome = match self.pipeline.process(resource_id).await {
            Ok(outcome) => outcome,
            Err(MonitorError::Storage(e)) => return Err(JobError::Retryable(e)),
            Err(e @ MonitorError::ResourceInactive(_)) => {
                if let Err(abandon_err) = self.locks.abandon(resource_id, owner).await {
                    warn!(resource_id = %resource_id, error = %abandon_err, "failed to clear lock of inactive resource");
                }
                return Err(JobError::Permanent(e.into()));
            }
            Err(e @ MonitorError::ResourceMissing(_)) => return Err(JobError::Permanent(e.into())),
        };

        if let Some(change_id) = outcome.change_id {
            // 失敗してもバックフィルが拾う
            if let Err(e) = self.producer.enqueue_change_notification(change_id).await {
                warn!(change_id = %change_id, error = %e, "failed to enqueue notification, leaving it to backfill");
            }
        }

        let report = RunReport {
            status: if outcome.status == MonitorStatus::Error {
                RunStatus::Failed
            } else {
                RunStatus::Success
            },
            duration_ms: outcome.duration_ms(),
            error: outcome.error.clone(),
        };
        let next_due = next_due_from(Utc::now(), outcome.check_interval);
        let released = self
            .locks
            .release(resource_id, owner, next_due, &report)
            .await
            .context("failed to release resource lock")
            .map_err(JobError::Retryable)?;

        if released {
            debug!(resource_id = %resource_id, next_due = %next_due, "resource rescheduled");
        } else {
            warn!(resource_id = %resource_id, owner, "lock no longer held by this owner, schedule left untouched");
        }
        Ok(())
    }
}
