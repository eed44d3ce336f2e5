//! 監視対象リソースに対する期限付きのCASロック。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::store::dao::ResourceDao;
use crate::store::models::RunReport;

/// Identity used as lock owner by this process.
#[must_use]
pub fn worker_id() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("worker-{}", &simple[..8])
}

pub struct LockManager {
    resources: Arc<dyn ResourceDao>,
    lock_timeout: chrono::Duration,
}

impl LockManager {
    pub fn new(resources: Arc<dyn ResourceDao>, lock_timeout: Duration) -> Self {
        Self {
            resources,
            lock_timeout: chrono::Duration::from_std(lock_timeout)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
        }
    }

    #[must_use]
    pub fn lock_timeout(&self) -> chrono::Duration {
        self.lock_timeout
    }

    fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.lock_timeout
    }

    /// 期限到来済みでロックが空きまたは期限切れのアクティブなリソースを、期限の古い順に返す。
    pub async fn select_due(&self, limit: i64) -> Result<Vec<Uuid>> {
        let now = Utc::now();
        self.resources
            .select_due(now, self.stale_before(now), limit)
            .await
    }

    /// 1回のCAS更新。`false`は他のオーナーが有効なロックを保持していることを示す。
    pub async fn acquire(&self, resource_id: Uuid, owner: &str) -> Result<bool> {
        let now = Utc::now();
        self.resources
            .try_lock(resource_id, owner, now, self.stale_before(now))
            .await
    }

    /// Clears the lock unless another owner holds it and records the run.
    pub async fn release(
        &self,
        resource_id: Uuid,
        owner: &str,
        next_due: DateTime<Utc>,
        report: &RunReport,
    ) -> Result<bool> {
        self.resources
            .release_lock(resource_id, owner, Utc::now(), next_due, report)
            .await
    }

    /// スケジュールを変えずにロックだけを外す。
    pub async fn abandon(&self, resource_id: Uuid, owner: &str) -> Result<bool> {
        self.resources.clear_lock(resource_id, owner).await
    }
}

/// Fixed-interval reschedule; failures do not back off.
#[must_use]
pub fn next_due_from(now: DateTime<Utc>, interval: chrono::Duration) -> DateTime<Utc> {
    now + interval
}
