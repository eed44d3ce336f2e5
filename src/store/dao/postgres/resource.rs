use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, postgres::PgRow, types::Json};
use uuid::Uuid;

use super::PgStore;
use crate::store::dao::traits::ResourceDao;
use crate::store::models::{MonitoredResource, RunReport, RunStatus};

#[async_trait]
impl ResourceDao for PgStore {
    async fn get_resource(&self, resource_id: Uuid) -> Result<Option<MonitoredResource>> {
        let row = sqlx::query(
            r"
            SELECT id, subscriber_id, name, target_url, content_selector,
                   check_interval_minutes, noise_patterns, is_active,
                   consecutive_errors, last_error, last_checked_at, next_due_at,
                   locked_by, locked_at, last_run_status, last_run_duration_ms, run_count
            FROM monitored_resources
            WHERE id = $1
            ",
        )
        .bind(resource_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to load monitored resource")?;

        row.map(row_to_resource).transpose()
    }

    async fn select_due(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r"
            SELECT id
            FROM monitored_resources
            WHERE is_active = TRUE
              AND next_due_at <= $1
              AND (locked_at IS NULL OR locked_at < $2)
            ORDER BY next_due_at ASC
            LIMIT $3
            ",
        )
        .bind(now)
        .bind(stale_before)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .context("failed to select due resources")?;

        rows.iter()
            .map(|row| row.try_get("id").context("failed to get resource id"))
            .collect()
    }

    async fn try_lock(
        &self,
        resource_id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let row = sqlx::query(
            r"
            UPDATE monitored_resources
            SET locked_by = $2,
                locked_at = $3
            WHERE id = $1
              AND is_active = TRUE
              AND (locked_at IS NULL OR locked_at < $4)
            RETURNING id
            ",
        )
        .bind(resource_id)
        .bind(owner)
        .bind(now)
        .bind(stale_before)
        .fetch_optional(self.pool())
        .await
        .context("failed to acquire resource lock")?;

        Ok(row.is_some())
    }

    async fn release_lock(
        &self,
        resource_id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
        next_due: DateTime<Utc>,
        report: &RunReport,
    ) -> Result<bool> {
        let row = sqlx::query(
            r"
            UPDATE monitored_resources
            SET locked_by = NULL,
                locked_at = NULL,
                last_checked_at = $3,
                next_due_at = $4,
                last_run_status = $5,
                last_run_duration_ms = $6,
                run_count = run_count + 1,
                consecutive_errors = CASE WHEN $5 = 'success' THEN 0 ELSE consecutive_errors END,
                last_error = CASE WHEN $5 = 'success' THEN NULL ELSE COALESCE($7, last_error) END
            WHERE id = $1
              AND (locked_by = $2 OR locked_by IS NULL)
            RETURNING id
            ",
        )
        .bind(resource_id)
        .bind(owner)
        .bind(now)
        .bind(next_due)
        .bind(report.status.as_str())
        .bind(report.duration_ms)
        .bind(report.error.as_deref())
        .fetch_optional(self.pool())
        .await
        .context("failed to release resource lock")?;

        Ok(row.is_some())
    }

    async fn clear_lock(&self, resource_id: Uuid, owner: &str) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE monitored_resources
            SET locked_by = NULL,
                locked_at = NULL
            WHERE id = $1
              AND locked_by = $2
            ",
        )
        .bind(resource_id)
        .bind(owner)
        .execute(self.pool())
        .await
        .context("failed to clear resource lock")?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_failure(&self, resource_id: Uuid, message: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE monitored_resources
            SET consecutive_errors = consecutive_errors + 1,
                last_error = $2
            WHERE id = $1
            ",
        )
        .bind(resource_id)
        .bind(message)
        .execute(self.pool())
        .await
        .context("failed to record resource failure")?;

        Ok(())
    }
}

fn row_to_resource(row: PgRow) -> Result<MonitoredResource> {
    let noise_patterns: Json<Vec<String>> = row
        .try_get("noise_patterns")
        .context("failed to get noise_patterns")?;
    let last_run_status: Option<String> = row
        .try_get("last_run_status")
        .context("failed to get last_run_status")?;

    Ok(MonitoredResource {
        id: row.try_get("id").context("failed to get id")?,
        subscriber_id: row.try_get("subscriber_id").context("failed to get subscriber_id")?,
        name: row.try_get("name").context("failed to get name")?,
        target_url: row.try_get("target_url").context("failed to get target_url")?,
        content_selector: row
            .try_get("content_selector")
            .context("failed to get content_selector")?,
        check_interval_minutes: row
            .try_get("check_interval_minutes")
            .context("failed to get check_interval_minutes")?,
        noise_patterns: noise_patterns.0,
        is_active: row.try_get("is_active").context("failed to get is_active")?,
        consecutive_errors: row
            .try_get("consecutive_errors")
            .context("failed to get consecutive_errors")?,
        last_error: row.try_get("last_error").context("failed to get last_error")?,
        last_checked_at: row
            .try_get("last_checked_at")
            .context("failed to get last_checked_at")?,
        next_due_at: row.try_get("next_due_at").context("failed to get next_due_at")?,
        locked_by: row.try_get("locked_by").context("failed to get locked_by")?,
        locked_at: row.try_get("locked_at").context("failed to get locked_at")?,
        last_run_status: last_run_status.as_deref().and_then(RunStatus::parse),
        last_run_duration_ms: row
            .try_get("last_run_duration_ms")
            .context("failed to get last_run_duration_ms")?,
        run_count: row.try_get("run_count").context("failed to get run_count")?,
    })
}
