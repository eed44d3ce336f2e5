//! In-process implementation of every DAO trait.
//!
//! Mirrors the PostgreSQL semantics that matter to the pipelines: the lock and
//! claim writes are compare-and-set under one mutex, a capture and its change
//! land together, the log accepts at most one `sent` row per change and queue
//! keys are deduplicated while live.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::traits::{
    ChangeDao, NotificationDao, ResourceDao, SnapshotDao, StoreHealth, SubscriberDirectory,
};
use crate::queue::{NewQueuedJob, QueueName, QueueStore, QueuedJob, QueuedJobId, QueuedJobStatus};
use crate::store::models::{
    Change, DeliveryStatus, MonitoredResource, NotificationRecord, NotificationStatus,
    PendingChange, RunReport, RunStatus, Snapshot, Subscriber,
};

#[derive(Debug, Clone)]
struct ClaimState {
    claimant: String,
    claimed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    resources: HashMap<Uuid, MonitoredResource>,
    subscribers: HashMap<Uuid, Subscriber>,
    snapshots: Vec<Snapshot>,
    changes: HashMap<Uuid, Change>,
    claims: HashMap<Uuid, ClaimState>,
    notifications: Vec<NotificationRecord>,
    jobs: Vec<QueuedJob>,
    next_job_id: QueuedJobId,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
    failing_captures: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("memory store rejected write: storage unavailable");
        }
        Ok(())
    }

    /// Makes every subsequent write fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` snapshot captures fail, leaving locks and the queue writable.
    pub fn fail_next_captures(&self, count: usize) {
        self.failing_captures.store(count, Ordering::SeqCst);
    }

    pub fn insert_subscriber(&self, subscriber: Subscriber) {
        self.state().subscribers.insert(subscriber.id, subscriber);
    }

    pub fn insert_resource(&self, resource: MonitoredResource) {
        self.state().resources.insert(resource.id, resource);
    }

    /// Stores a change directly, bypassing capture.
    pub fn insert_change(&self, change: Change) {
        self.state().changes.insert(change.id, change);
    }

    /// Deletes a change, as an operator might mid-cycle.
    pub fn remove_change(&self, change_id: Uuid) {
        self.state().changes.remove(&change_id);
    }

    #[must_use]
    pub fn resource(&self, resource_id: Uuid) -> Option<MonitoredResource> {
        self.state().resources.get(&resource_id).cloned()
    }

    #[must_use]
    pub fn change(&self, change_id: Uuid) -> Option<Change> {
        self.state().changes.get(&change_id).cloned()
    }

    #[must_use]
    pub fn snapshots_for(&self, resource_id: Uuid) -> Vec<Snapshot> {
        self.state()
            .snapshots
            .iter()
            .filter(|snapshot| snapshot.resource_id == resource_id)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn changes_for(&self, resource_id: Uuid) -> Vec<Change> {
        let mut changes: Vec<Change> = self
            .state()
            .changes
            .values()
            .filter(|change| change.resource_id == resource_id)
            .cloned()
            .collect();
        changes.sort_by_key(|change| change.detected_at);
        changes
    }

    #[must_use]
    pub fn jobs(&self, queue: QueueName) -> Vec<QueuedJob> {
        self.state()
            .jobs
            .iter()
            .filter(|job| job.queue == queue)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ResourceDao for MemoryStore {
    async fn get_resource(&self, resource_id: Uuid) -> Result<Option<MonitoredResource>> {
        Ok(self.resource(resource_id))
    }

    async fn select_due(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>> {
        let state = self.state();
        let mut due: Vec<&MonitoredResource> = state
            .resources
            .values()
            .filter(|resource| {
                resource.is_active
                    && resource.next_due_at <= now
                    && resource.locked_at.is_none_or(|at| at < stale_before)
            })
            .collect();
        due.sort_by_key(|resource| resource.next_due_at);
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(due.into_iter().take(limit).map(|resource| resource.id).collect())
    }

    async fn try_lock(
        &self,
        resource_id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_writable()?;
        let mut state = self.state();
        let Some(resource) = state.resources.get_mut(&resource_id) else {
            return Ok(false);
        };
        if !resource.is_active || resource.locked_at.is_some_and(|at| at >= stale_before) {
            return Ok(false);
        }
        resource.locked_by = Some(owner.to_string());
        resource.locked_at = Some(now);
        Ok(true)
    }

    async fn release_lock(
        &self,
        resource_id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
        next_due: DateTime<Utc>,
        report: &RunReport,
    ) -> Result<bool> {
        self.check_writable()?;
        let mut state = self.state();
        let Some(resource) = state.resources.get_mut(&resource_id) else {
            return Ok(false);
        };
        if resource.locked_by.as_deref().is_some_and(|held| held != owner) {
            return Ok(false);
        }
        resource.locked_by = None;
        resource.locked_at = None;
        resource.last_checked_at = Some(now);
        resource.next_due_at = next_due;
        resource.last_run_status = Some(report.status);
        resource.last_run_duration_ms = Some(report.duration_ms);
        resource.run_count += 1;
        if report.status == RunStatus::Success {
            resource.consecutive_errors = 0;
            resource.last_error = None;
        } else if let Some(error) = &report.error {
            resource.last_error = Some(error.clone());
        }
        Ok(true)
    }

    async fn clear_lock(&self, resource_id: Uuid, owner: &str) -> Result<bool> {
        self.check_writable()?;
        let mut state = self.state();
        match state.resources.get_mut(&resource_id) {
            Some(resource) if resource.locked_by.as_deref() == Some(owner) => {
                resource.locked_by = None;
                resource.locked_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_failure(&self, resource_id: Uuid, message: &str) -> Result<()> {
        self.check_writable()?;
        if let Some(resource) = self.state().resources.get_mut(&resource_id) {
            resource.consecutive_errors += 1;
            resource.last_error = Some(message.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotDao for MemoryStore {
    async fn latest_snapshot(&self, resource_id: Uuid) -> Result<Option<Snapshot>> {
        Ok(self
            .state()
            .snapshots
            .iter()
            .filter(|snapshot| snapshot.resource_id == resource_id)
            .max_by_key(|snapshot| snapshot.captured_at)
            .cloned())
    }

    async fn record_capture(&self, snapshot: &Snapshot, change: Option<&Change>) -> Result<()> {
        self.check_writable()?;
        if self
            .failing_captures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            bail!("memory store rejected capture: snapshot table unavailable");
        }
        let mut state = self.state();
        state.snapshots.push(snapshot.clone());
        if let Some(change) = change {
            state.changes.insert(change.id, change.clone());
        }
        Ok(())
    }

    async fn prune_snapshots(
        &self,
        keep_per_resource: i64,
        older_than: DateTime<Utc>,
    ) -> Result<u64> {
        self.check_writable()?;
        let mut state = self.state();
        let keep = usize::try_from(keep_per_resource.max(0)).unwrap_or(usize::MAX);

        let mut by_resource: HashMap<Uuid, Vec<(Uuid, DateTime<Utc>)>> = HashMap::new();
        for snapshot in &state.snapshots {
            by_resource
                .entry(snapshot.resource_id)
                .or_default()
                .push((snapshot.id, snapshot.captured_at));
        }

        let referenced: Vec<Uuid> = state
            .changes
            .values()
            .flat_map(|change| [change.snapshot_before_id, change.snapshot_after_id])
            .collect();

        let mut doomed = Vec::new();
        for captures in by_resource.values_mut() {
            captures.sort_by(|a, b| b.1.cmp(&a.1));
            doomed.extend(
                captures
                    .iter()
                    .skip(keep)
                    .filter(|(id, captured_at)| *captured_at < older_than && !referenced.contains(id))
                    .map(|(id, _)| *id),
            );
        }

        state.snapshots.retain(|snapshot| !doomed.contains(&snapshot.id));
        Ok(doomed.len() as u64)
    }
}

#[async_trait]
impl ChangeDao for MemoryStore {
    async fn get_change(&self, change_id: Uuid) -> Result<Option<Change>> {
        Ok(self.change(change_id))
    }

    async fn pending_changes(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<PendingChange>> {
        let state = self.state();
        let mut pending: Vec<PendingChange> = state
            .changes
            .values()
            .filter(|change| {
                change.delivery_status == DeliveryStatus::Pending && change.detected_at >= since
            })
            .map(|change| PendingChange {
                id: change.id,
                resource_id: change.resource_id,
                detected_at: change.detected_at,
            })
            .collect();
        pending.sort_by_key(|change| change.detected_at);
        pending.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(pending)
    }

    async fn mark_sent(&self, change_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.check_writable()?;
        if let Some(change) = self.state().changes.get_mut(&change_id) {
            change.delivery_status = DeliveryStatus::Sent;
            change.notified_at.get_or_insert(at);
        }
        Ok(())
    }

    async fn try_claim_delivery(
        &self,
        change_id: Uuid,
        claimant: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_writable()?;
        let mut state = self.state();
        let pending = state
            .changes
            .get(&change_id)
            .is_some_and(|change| change.delivery_status == DeliveryStatus::Pending);
        if !pending {
            return Ok(false);
        }
        if state
            .claims
            .get(&change_id)
            .is_some_and(|claim| claim.claimed_at >= stale_before)
        {
            return Ok(false);
        }
        state.claims.insert(
            change_id,
            ClaimState {
                claimant: claimant.to_string(),
                claimed_at: now,
            },
        );
        Ok(true)
    }

    async fn release_delivery_claim(&self, change_id: Uuid, claimant: &str) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state();
        if state
            .claims
            .get(&change_id)
            .is_some_and(|claim| claim.claimant == claimant)
        {
            state.claims.remove(&change_id);
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationDao for MemoryStore {
    async fn has_sent_record(&self, change_id: Uuid) -> Result<bool> {
        Ok(self.state().notifications.iter().any(|record| {
            record.change_id == change_id && record.status == NotificationStatus::Sent
        }))
    }

    async fn insert_record(&self, record: &NotificationRecord) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state();
        if record.status == NotificationStatus::Sent
            && state.notifications.iter().any(|existing| {
                existing.change_id == record.change_id
                    && existing.status == NotificationStatus::Sent
            })
        {
            bail!("duplicate sent notification for change {}", record.change_id);
        }
        state.notifications.push(record.clone());
        Ok(())
    }

    async fn records_for_change(&self, change_id: Uuid) -> Result<Vec<NotificationRecord>> {
        Ok(self
            .state()
            .notifications
            .iter()
            .filter(|record| record.change_id == change_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SubscriberDirectory for MemoryStore {
    async fn resolve(&self, resource_id: Uuid) -> Result<Option<Subscriber>> {
        let state = self.state();
        Ok(state
            .resources
            .get(&resource_id)
            .and_then(|resource| state.subscribers.get(&resource.subscriber_id))
            .cloned())
    }
}

#[async_trait]
impl StoreHealth for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.check_writable()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue(&self, job: NewQueuedJob) -> Result<Option<QueuedJobId>> {
        self.check_writable()?;
        let now = Utc::now();
        let mut state = self.state();

        if let Some(existing) = state
            .jobs
            .iter_mut()
            .find(|existing| existing.queue == job.queue && existing.job_key == job.job_key)
        {
            if existing.status.is_live() {
                return Ok(None);
            }
            existing.payload = job.payload;
            existing.max_retries = job.max_retries;
            existing.status = QueuedJobStatus::Pending;
            existing.retry_count = 0;
            existing.error_message = None;
            existing.available_at = now;
            existing.created_at = now;
            existing.started_at = None;
            existing.completed_at = None;
            return Ok(Some(existing.id));
        }

        state.next_job_id += 1;
        let id = state.next_job_id;
        state.jobs.push(QueuedJob {
            id,
            queue: job.queue,
            job_key: job.job_key,
            payload: job.payload,
            status: QueuedJobStatus::Pending,
            error_message: None,
            retry_count: 0,
            max_retries: job.max_retries,
            available_at: now,
            created_at: now,
            started_at: None,
            completed_at: None,
        });
        Ok(Some(id))
    }

    async fn pick_next_job(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<QueuedJob>> {
        self.check_writable()?;
        let mut state = self.state();
        let next = state
            .jobs
            .iter_mut()
            .filter(|job| {
                job.queue == queue
                    && match job.status {
                        QueuedJobStatus::Pending | QueuedJobStatus::Retrying => {
                            job.available_at <= now
                        }
                        QueuedJobStatus::Running => {
                            job.started_at.is_some_and(|at| at < stale_before)
                        }
                        QueuedJobStatus::Completed | QueuedJobStatus::Failed => false,
                    }
            })
            .min_by_key(|job| (job.available_at, job.id));

        Ok(next.map(|job| {
            job.status = QueuedJobStatus::Running;
            job.started_at = Some(now);
            job.clone()
        }))
    }

    async fn mark_completed(&self, job_id: QueuedJobId) -> Result<()> {
        self.check_writable()?;
        if let Some(job) = self.state().jobs.iter_mut().find(|job| job.id == job_id) {
            job.status = QueuedJobStatus::Completed;
            job.error_message = None;
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_failed(&self, job_id: QueuedJobId, error: &str) -> Result<()> {
        self.check_writable()?;
        if let Some(job) = self.state().jobs.iter_mut().find(|job| job.id == job_id) {
            job.status = QueuedJobStatus::Failed;
            job.error_message = Some(error.to_string());
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_retrying(
        &self,
        job_id: QueuedJobId,
        error: &str,
        available_at: DateTime<Utc>,
    ) -> Result<()> {
        self.check_writable()?;
        if let Some(job) = self.state().jobs.iter_mut().find(|job| job.id == job_id) {
            job.status = QueuedJobStatus::Retrying;
            job.error_message = Some(error.to_string());
            job.retry_count += 1;
            job.available_at = available_at;
            job.started_at = None;
        }
        Ok(())
    }

    async fn get_job(&self, job_id: QueuedJobId) -> Result<Option<QueuedJob>> {
        Ok(self.state().jobs.iter().find(|job| job.id == job_id).cloned())
    }
}
