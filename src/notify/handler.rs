use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;

use super::pipeline::{NotificationPipeline, NotifyError};
use crate::queue::{JobError, JobHandler, NotifyJobPayload, QueueName, QueuedJob};

/// 通知ジョブを処理する。配信失敗でもジョブは完了扱いとし、再送はバックフィルに任せる。
pub struct NotifyJobHandler {
    pipeline: Arc<NotificationPipeline>,
}

impl NotifyJobHandler {
    pub fn new(pipeline: Arc<NotificationPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl JobHandler for NotifyJobHandler {
    fn queue(&self) -> QueueName {
        QueueName::Notify
    }

    async fn handle(&self, job: &QueuedJob) -> Result<(), JobError> {
        let payload: NotifyJobPayload = serde_json::from_value(job.payload.clone())
            .context("invalid notify job payload")
            .map_err(JobError::Permanent)?;

        match self.pipeline.deliver(payload.change_id).await {
            Ok(outcome) => {
                debug!(
                    change_id = %payload.change_id,
                    job_key = %job.job_key,
                    success = outcome.success,
                    reason = outcome.reason.as_deref().unwrap_or_default(),
                    "notify job finished"
                );
                Ok(())
            }
            Err(e @ NotifyError::ChangeMissing(_)) => Err(JobError::Permanent(e.into())),
            Err(NotifyError::Storage(e)) => Err(JobError::Retryable(e)),
        }
    }
}
