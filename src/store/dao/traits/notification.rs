//! NotificationDao - append-only delivery log

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::store::models::NotificationRecord;

#[async_trait]
pub trait NotificationDao: Send + Sync {
    /// Whether any `sent` record exists for the change.
    async fn has_sent_record(&self, change_id: Uuid) -> Result<bool>;

    async fn insert_record(&self, record: &NotificationRecord) -> Result<()>;

    async fn records_for_change(&self, change_id: Uuid) -> Result<Vec<NotificationRecord>>;
}
