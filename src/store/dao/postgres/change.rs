use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, types::Json};
use uuid::Uuid;

use super::PgStore;
use crate::diff::ChangeSet;
use crate::severity::Severity;
use crate::store::dao::traits::ChangeDao;
use crate::store::models::{Change, DeliveryStatus, PendingChange};

#[async_trait]
impl ChangeDao for PgStore {
    async fn get_change(&self, change_id: Uuid) -> Result<Option<Change>> {
        let row = sqlx::query(
            r"
            SELECT id, resource_id, snapshot_before_id, snapshot_after_id, diff_data,
                   summary, severity, delivery_status, notified_at, detected_at
            FROM changes
            WHERE id = $1
            ",
        )
        .bind(change_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to load change")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let diff: Json<ChangeSet> = row.try_get("diff_data").context("failed to get diff_data")?;
        let severity: String = row.try_get("severity").context("failed to get severity")?;
        let delivery_status: String = row
            .try_get("delivery_status")
            .context("failed to get delivery_status")?;

        Ok(Some(Change {
            id: row.try_get("id").context("failed to get id")?,
            resource_id: row.try_get("resource_id").context("failed to get resource_id")?,
            snapshot_before_id: row
                .try_get("snapshot_before_id")
                .context("failed to get snapshot_before_id")?,
            snapshot_after_id: row
                .try_get("snapshot_after_id")
                .context("failed to get snapshot_after_id")?,
            diff: diff.0,
            summary: row.try_get("summary").context("failed to get summary")?,
            severity: Severity::parse(&severity)
                .with_context(|| format!("invalid severity: {severity}"))?,
            delivery_status: DeliveryStatus::parse(&delivery_status)
                .with_context(|| format!("invalid delivery status: {delivery_status}"))?,
            notified_at: row.try_get("notified_at").context("failed to get notified_at")?,
            detected_at: row.try_get("detected_at").context("failed to get detected_at")?,
        }))
    }

    async fn pending_changes(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<PendingChange>> {
        let rows = sqlx::query(
            r"
            SELECT id, resource_id, detected_at
            FROM changes
            WHERE delivery_status = 'pending'
              AND detected_at >= $1
            ORDER BY detected_at ASC
            LIMIT $2
            ",
        )
        .bind(since)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .context("failed to select pending changes")?;

        rows.iter()
            .map(|row| {
                Ok(PendingChange {
                    id: row.try_get("id").context("failed to get id")?,
                    resource_id: row.try_get("resource_id").context("failed to get resource_id")?,
                    detected_at: row.try_get("detected_at").context("failed to get detected_at")?,
                })
            })
            .collect()
    }

    async fn mark_sent(&self, change_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r"
            UPDATE changes
            SET delivery_status = 'sent',
                notified_at = COALESCE(notified_at, $2)
            WHERE id = $1
            ",
        )
        .bind(change_id)
        .bind(at)
        .execute(self.pool())
        .await
        .context("failed to mark change as sent")?;

        Ok(())
    }

    async fn try_claim_delivery(
        &self,
        change_id: Uuid,
        claimant: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let row = sqlx::query(
            r"
            UPDATE changes
            SET delivery_claimed_by = $2,
                delivery_claimed_at = $3
            WHERE id = $1
              AND delivery_status = 'pending'
              AND (delivery_claimed_at IS NULL OR delivery_claimed_at < $4)
            RETURNING id
            ",
        )
        .bind(change_id)
        .bind(claimant)
        .bind(now)
        .bind(stale_before)
        .fetch_optional(self.pool())
        .await
        .context("failed to claim change delivery")?;

        Ok(row.is_some())
    }

    async fn release_delivery_claim(&self, change_id: Uuid, claimant: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE changes
            SET delivery_claimed_by = NULL,
                delivery_claimed_at = NULL
            WHERE id = $1
              AND delivery_claimed_by = $2
            ",
        )
        .bind(change_id)
        .bind(claimant)
        .execute(self.pool())
        .await
        .context("failed to release change delivery claim")?;

        Ok(())
    }
}
