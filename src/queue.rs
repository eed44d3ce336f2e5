use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

mod store;
mod types;
mod worker;

pub use store::QueueStore;
pub use types::{
    MonitorJobPayload, NewQueuedJob, NotifyJobPayload, QueueName, QueuedJob, QueuedJobId,
    QueuedJobStatus,
};
pub use worker::{JobError, JobHandler, QueueWorker, QueueWorkerConfig};

use crate::util::idempotency::{backfill_job_key, change_job_key, monitor_job_key};

/// Enqueues monitor and notify jobs under their deduplication keys.
#[derive(Clone)]
pub struct JobProducer {
    store: Arc<dyn QueueStore>,
    max_retries: i32,
}

impl JobProducer {
    #[must_use]
    pub fn new(store: Arc<dyn QueueStore>, max_retries: u32) -> Self {
        Self {
            store,
            max_retries: i32::try_from(max_retries).unwrap_or(i32::MAX),
        }
    }

    /// Returns `None` when a monitor job for the resource is already live.
    pub async fn enqueue_monitor(
        &self,
        resource_id: Uuid,
        lock_owner: &str,
    ) -> Result<Option<QueuedJobId>> {
        let payload = MonitorJobPayload {
            resource_id,
            lock_owner: lock_owner.to_string(),
        };
        self.enqueue(QueueName::Monitor, monitor_job_key(resource_id), &payload)
            .await
    }

    /// Queue the first delivery attempt for a freshly detected change.
    pub async fn enqueue_change_notification(&self, change_id: Uuid) -> Result<Option<QueuedJobId>> {
        self.enqueue(
            QueueName::Notify,
            change_job_key(change_id),
            &NotifyJobPayload { change_id },
        )
        .await
    }

    /// Queue a reconciliation attempt for a change still pending delivery.
    pub async fn enqueue_backfill_notification(
        &self,
        change_id: Uuid,
    ) -> Result<Option<QueuedJobId>> {
        self.enqueue(
            QueueName::Notify,
            backfill_job_key(change_id),
            &NotifyJobPayload { change_id },
        )
        .await
    }

    async fn enqueue<P: Serialize>(
        &self,
        queue: QueueName,
        job_key: String,
        payload: &P,
    ) -> Result<Option<QueuedJobId>> {
        let payload = serde_json::to_value(payload).context("failed to serialize job payload")?;
        let id = self
            .store
            .enqueue(NewQueuedJob {
                queue,
                job_key: job_key.clone(),
                payload,
                max_retries: self.max_retries,
            })
            .await
            .with_context(|| format!("failed to enqueue {} job {job_key}", queue.as_str()))?;

        debug!(
            queue = queue.as_str(),
            job_key = %job_key,
            job_id = ?id,
            deduplicated = id.is_none(),
            "enqueue requested"
        );
        Ok(id)
    }
}
