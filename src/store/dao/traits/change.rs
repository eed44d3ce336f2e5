//! ChangeDao - detected changes and their delivery flag

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::store::models::{Change, PendingChange};

#[async_trait]
pub trait ChangeDao: Send + Sync {
    async fn get_change(&self, change_id: Uuid) -> Result<Option<Change>>;

    /// Changes still `pending` detected at or after `since`, oldest first.
    async fn pending_changes(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<PendingChange>>;

    /// Flips the delivery flag to `sent`.
    async fn mark_sent(&self, change_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Compare-and-set claim on delivering this change; a claim older than
    /// `stale_before` may be taken over.
    async fn try_claim_delivery(
        &self,
        change_id: Uuid,
        claimant: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool>;

    async fn release_delivery_claim(&self, change_id: Uuid, claimant: &str) -> Result<()>;
}
