use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, types::Json};
use tracing::debug;
use uuid::Uuid;

use super::PgStore;
use crate::store::dao::traits::SnapshotDao;
use crate::store::models::{Change, Snapshot};
use crate::util::idempotency::{advisory_lock_key, try_acquire_advisory_xact_lock};

const RETENTION_LOCK_NAME: &str = "watchpoint:snapshot-retention";

#[async_trait]
impl SnapshotDao for PgStore {
    async fn latest_snapshot(&self, resource_id: Uuid) -> Result<Option<Snapshot>> {
        let row = sqlx::query(
            r"
            SELECT id, resource_id, content_hash, content_text, content_truncated,
                   status_code, fetch_duration_ms, captured_at
            FROM snapshots
            WHERE resource_id = $1
            ORDER BY captured_at DESC
            LIMIT 1
            ",
        )
        .bind(resource_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to load latest snapshot")?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(Snapshot {
            id: row.try_get("id").context("failed to get id")?,
            resource_id: row.try_get("resource_id").context("failed to get resource_id")?,
            content_hash: row.try_get("content_hash").context("failed to get content_hash")?,
            content_text: row.try_get("content_text").context("failed to get content_text")?,
            content_truncated: row
                .try_get("content_truncated")
                .context("failed to get content_truncated")?,
            status_code: row.try_get("status_code").context("failed to get status_code")?,
            fetch_duration_ms: row
                .try_get("fetch_duration_ms")
                .context("failed to get fetch_duration_ms")?,
            captured_at: row.try_get("captured_at").context("failed to get captured_at")?,
        }))
    }

    async fn record_capture(&self, snapshot: &Snapshot, change: Option<&Change>) -> Result<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .context("failed to begin capture transaction")?;

        sqlx::query(
            r"
            INSERT INTO snapshots
                (id, resource_id, content_hash, content_text, content_truncated,
                 status_code, fetch_duration_ms, captured_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(snapshot.id)
        .bind(snapshot.resource_id)
        .bind(&snapshot.content_hash)
        .bind(&snapshot.content_text)
        .bind(snapshot.content_truncated)
        .bind(snapshot.status_code)
        .bind(snapshot.fetch_duration_ms)
        .bind(snapshot.captured_at)
        .execute(&mut *tx)
        .await
        .context("failed to insert snapshot")?;

        if let Some(change) = change {
            let total_changes = i32::try_from(change.diff.total_changes()).unwrap_or(i32::MAX);
            sqlx::query(
                r"
                INSERT INTO changes
                    (id, resource_id, snapshot_before_id, snapshot_after_id, diff_data,
                     summary, severity, total_changes, delivery_status, detected_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ",
            )
            .bind(change.id)
            .bind(change.resource_id)
            .bind(change.snapshot_before_id)
            .bind(change.snapshot_after_id)
            .bind(Json(&change.diff))
            .bind(&change.summary)
            .bind(change.severity.as_str())
            .bind(total_changes)
            .bind(change.delivery_status.as_str())
            .bind(change.detected_at)
            .execute(&mut *tx)
            .await
            .context("failed to insert change")?;
        }

        tx.commit()
            .await
            .context("failed to commit capture transaction")
    }

    async fn prune_snapshots(
        &self,
        keep_per_resource: i64,
        older_than: DateTime<Utc>,
    ) -> Result<u64> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .context("failed to begin retention transaction")?;

        if !try_acquire_advisory_xact_lock(&mut *tx, advisory_lock_key(RETENTION_LOCK_NAME)).await? {
            debug!("snapshot retention already running elsewhere");
            return Ok(0);
        }

        let result = sqlx::query(
            r"
            WITH ranked AS (
                SELECT id,
                       captured_at,
                       ROW_NUMBER() OVER (PARTITION BY resource_id ORDER BY captured_at DESC) AS rn
                FROM snapshots
            )
            DELETE FROM snapshots s
            USING ranked r
            WHERE s.id = r.id
              AND r.rn > $1
              AND r.captured_at < $2
              AND NOT EXISTS (
                  SELECT 1 FROM changes c
                  WHERE c.snapshot_before_id = s.id OR c.snapshot_after_id = s.id
              )
            ",
        )
        .bind(keep_per_resource)
        .bind(older_than)
        .execute(&mut *tx)
        .await
        .context("failed to prune snapshots")?;

        tx.commit()
            .await
            .context("failed to commit retention transaction")?;

        Ok(result.rows_affected())
    }
}
