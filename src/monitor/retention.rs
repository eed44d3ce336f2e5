use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::observability::metrics::Metrics;
use crate::store::dao::SnapshotDao;

/// リソースごとに新しい`keep_per_resource`件を超える古いスナップショットを削除する。
/// 変更から参照されているスナップショットは削除しない。
pub struct SnapshotRetention {
    snapshots: Arc<dyn SnapshotDao>,
    keep_per_resource: i64,
    max_age: chrono::Duration,
    metrics: Arc<Metrics>,
}

impl SnapshotRetention {
    pub fn new(
        snapshots: Arc<dyn SnapshotDao>,
        keep_per_resource: u32,
        max_age: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            snapshots,
            keep_per_resource: i64::from(keep_per_resource),
            max_age: chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::days(30)),
            metrics,
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<u64> {
        let older_than = now - self.max_age;
        let pruned = self
            .snapshots
            .prune_snapshots(self.keep_per_resource, older_than)
            .await?;
        self.metrics.snapshots_pruned.inc_by(pruned);
        info!(
            pruned,
            keep_per_resource = self.keep_per_resource,
            older_than = %older_than.to_rfc3339(),
            "snapshot sweep finished"
        );
        Ok(pruned)
    }
}
