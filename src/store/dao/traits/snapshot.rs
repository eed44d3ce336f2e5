//! SnapshotDao - append-only content captures

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::store::models::{Change, Snapshot};

#[async_trait]
pub trait SnapshotDao: Send + Sync {
    /// Most recent capture of the resource.
    async fn latest_snapshot(&self, resource_id: Uuid) -> Result<Option<Snapshot>>;

    /// Persists a capture and, when given, the change it produced. Both rows
    /// land together or not at all.
    async fn record_capture(&self, snapshot: &Snapshot, change: Option<&Change>) -> Result<()>;

    /// Deletes captures older than `older_than`, keeping the newest
    /// `keep_per_resource` per resource and any capture a change refers to.
    async fn prune_snapshots(&self, keep_per_resource: i64, older_than: DateTime<Utc>)
    -> Result<u64>;
}
