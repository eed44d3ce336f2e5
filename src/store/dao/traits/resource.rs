//! ResourceDao - monitored resources and their scheduling lock

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::store::models::{MonitoredResource, RunReport};

#[async_trait]
pub trait ResourceDao: Send + Sync {
    async fn get_resource(&self, resource_id: Uuid) -> Result<Option<MonitoredResource>>;

    /// Active resources due at `now` whose lock is unset or was taken before
    /// `stale_before`, oldest due first.
    async fn select_due(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>>;

    /// Compare-and-set on the lock columns. Re-checks staleness in the same
    /// atomic write, so of two racing callers at most one gets `true`.
    async fn try_lock(
        &self,
        resource_id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool>;

    /// Clears the lock held by `owner`, stamps the check time, moves the due
    /// time to `next_due` and records run statistics. An unlocked row is
    /// also released (the lock may have been abandoned by a deduplicated
    /// dispatch). Returns `false` when another owner holds the lock.
    async fn release_lock(
        &self,
        resource_id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
        next_due: DateTime<Utc>,
        report: &RunReport,
    ) -> Result<bool>;

    /// Clears the lock held by `owner` without touching the schedule.
    async fn clear_lock(&self, resource_id: Uuid, owner: &str) -> Result<bool>;

    /// Increments the consecutive-error counter and keeps the message.
    async fn record_failure(&self, resource_id: Uuid, message: &str) -> Result<()>;
}
