use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::lock::LockManager;
use crate::observability::metrics::Metrics;
use crate::queue::{JobProducer, QueuedJobId};

/// 期限到来リソース1件のディスパッチ結果。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Dispatched { job_id: QueuedJobId },
    /// 他のオーナーが有効なロックを保持している。
    LockHeld,
    /// A monitor job for the resource is already live; the lock was given back.
    AlreadyQueued,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub selected: usize,
    pub dispatched: usize,
    pub lock_conflicts: usize,
    pub deduplicated: usize,
    pub errors: usize,
}

/// 期限到来リソースをロックし、監視ジョブとしてキューに積む。
pub struct DueDispatcher {
    locks: Arc<LockManager>,
    producer: JobProducer,
    owner: String,
    batch_limit: i64,
    metrics: Arc<Metrics>,
}

impl DueDispatcher {
    pub fn new(
        locks: Arc<LockManager>,
        producer: JobProducer,
        owner: impl Into<String>,
        batch_limit: u32,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            locks,
            producer,
            owner: owner.into(),
            batch_limit: i64::from(batch_limit),
            metrics,
        }
    }

    /// 1回分のポーリング。リソース単位の失敗はログとメトリクスに残し、呼び出し元へは返さない。
    pub async fn dispatch_due(&self) -> Result<DispatchReport> {
        self.metrics.scheduler_ticks.inc();
        let due = self
            .locks
            .select_due(self.batch_limit)
            .await
            .context("failed to select due resources")?;

        let mut report = DispatchReport {
            selected: due.len(),
            ..DispatchReport::default()
        };

        for resource_id in due {
            match self.dispatch_one(resource_id).await {
                Ok(DispatchOutcome::Dispatched { .. }) => report.dispatched += 1,
                Ok(DispatchOutcome::LockHeld) => report.lock_conflicts += 1,
                Ok(DispatchOutcome::AlreadyQueued) => report.deduplicated += 1,
                Err(e) => {
                    report.errors += 1;
                    warn!(resource_id = %resource_id, error = %e, "failed to dispatch resource");
                }
            }
        }

        if report.selected > 0 {
            info!(
                owner = %self.owner,
                selected = report.selected,
                dispatched = report.dispatched,
                lock_conflicts = report.lock_conflicts,
                deduplicated = report.deduplicated,
                errors = report.errors,
                "scheduler cycle finished"
            );
        }
        Ok(report)
    }

    /// Lock a single resource and queue its monitor job.
    pub async fn dispatch_one(&self, resource_id: Uuid) -> Result<DispatchOutcome> {
        if !self.locks.acquire(resource_id, &self.owner).await? {
            self.metrics.lock_conflicts.inc();
            debug!(resource_id = %resource_id, "lock held elsewhere, skipping");
            return Ok(DispatchOutcome::LockHeld);
        }

        match self.producer.enqueue_monitor(resource_id, &self.owner).await {
            Ok(Some(job_id)) => {
                self.metrics.scheduler_dispatched.inc();
                Ok(DispatchOutcome::Dispatched { job_id })
            }
            Ok(None) => {
                self.metrics.dispatch_deduplicated.inc();
                self.locks.abandon(resource_id, &self.owner).await?;
                debug!(resource_id = %resource_id, "monitor job already live, lock released");
                Ok(DispatchOutcome::AlreadyQueued)
            }
            Err(e) => {
                if let Err(abandon_err) = self.locks.abandon(resource_id, &self.owner).await {
                    warn!(resource_id = %resource_id, error = %abandon_err, "failed to release lock after enqueue error");
                }
                Err(e)
            }
        }
    }
}
