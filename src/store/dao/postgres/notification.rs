use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use super::PgStore;
use crate::store::dao::traits::NotificationDao;
use crate::store::models::{NotificationRecord, NotificationStatus};

#[async_trait]
impl NotificationDao for PgStore {
    async fn has_sent_record(&self, change_id: Uuid) -> Result<bool> {
        let row = sqlx::query(
            r"
            SELECT EXISTS (
                SELECT 1 FROM notifications
                WHERE change_id = $1 AND status = 'sent'
            ) AS sent
            ",
        )
        .bind(change_id)
        .fetch_one(self.pool())
        .await
        .context("failed to check notification log")?;

        row.try_get("sent").context("failed to get sent flag")
    }

    async fn insert_record(&self, record: &NotificationRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO notifications
                (id, change_id, subscriber_id, channel, recipient, status,
                 error_message, sent_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(record.id)
        .bind(record.change_id)
        .bind(record.subscriber_id)
        .bind(&record.channel)
        .bind(record.recipient.as_deref())
        .bind(record.status.as_str())
        .bind(record.error_message.as_deref())
        .bind(record.sent_at)
        .bind(record.created_at)
        .execute(self.pool())
        .await
        .context("failed to insert notification record")?;

        Ok(())
    }

    async fn records_for_change(&self, change_id: Uuid) -> Result<Vec<NotificationRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, change_id, subscriber_id, channel, recipient, status,
                   error_message, sent_at, created_at
            FROM notifications
            WHERE change_id = $1
            ORDER BY created_at ASC
            ",
        )
        .bind(change_id)
        .fetch_all(self.pool())
        .await
        .context("failed to list notification records")?;

        rows.iter()
            .map(|row| {
                let status: String = row.try_get("status").context("failed to get status")?;
                Ok(NotificationRecord {
                    id: row.try_get("id").context("failed to get id")?,
                    change_id: row.try_get("change_id").context("failed to get change_id")?,
                    subscriber_id: row
                        .try_get("subscriber_id")
                        .context("failed to get subscriber_id")?,
                    channel: row.try_get("channel").context("failed to get channel")?,
                    recipient: row.try_get("recipient").context("failed to get recipient")?,
                    status: NotificationStatus::parse(&status)
                        .with_context(|| format!("invalid notification status: {status}"))?,
                    error_message: row
                        .try_get("error_message")
                        .context("failed to get error_message")?,
                    sent_at: row.try_get("sent_at").context("failed to get sent_at")?,
                    created_at: row.try_get("created_at").context("failed to get created_at")?,
                })
            })
            .collect()
    }
}
