use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;

use super::types::{NewQueuedJob, QueueName, QueuedJob, QueuedJobId, QueuedJobStatus};
use crate::store::dao::PgStore;

/// Persistent job queue keyed by `(queue, job_key)`.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a job. Returns `None` without writing when a live job with the
    /// same key exists; a completed or failed job with that key is re-armed.
    async fn enqueue(&self, job: NewQueuedJob) -> Result<Option<QueuedJobId>>;

    /// Claim the next available job and mark it running. A job left running
    /// since before `stale_before` is assumed abandoned and may be claimed.
    async fn pick_next_job(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<QueuedJob>>;

    async fn mark_completed(&self, job_id: QueuedJobId) -> Result<()>;

    async fn mark_failed(&self, job_id: QueuedJobId, error: &str) -> Result<()>;

    /// Schedule another attempt no earlier than `available_at`.
    async fn mark_retrying(
        &self,
        job_id: QueuedJobId,
        error: &str,
        available_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn get_job(&self, job_id: QueuedJobId) -> Result<Option<QueuedJob>>;
}

const JOB_COLUMNS: &str = "id, queue_name, job_key, payload, status, error_message, retry_count, \
     max_retries, available_at, created_at, started_at, completed_at";

#[async_trait]
impl QueueStore for PgStore {
    async fn enqueue(&self, job: NewQueuedJob) -> Result<Option<QueuedJobId>> {
        let row = sqlx::query(
            r"
            INSERT INTO job_queue
                (queue_name, job_key, payload, max_retries, status, available_at)
            VALUES ($1, $2, $3, $4, 'pending', NOW())
            ON CONFLICT (queue_name, job_key) DO UPDATE
            SET payload = EXCLUDED.payload,
                max_retries = EXCLUDED.max_retries,
                status = 'pending',
                retry_count = 0,
                error_message = NULL,
                available_at = NOW(),
                created_at = NOW(),
                started_at = NULL,
                completed_at = NULL
            WHERE job_queue.status IN ('completed', 'failed')
            RETURNING id
            ",
        )
        .bind(job.queue.as_str())
        .bind(&job.job_key)
        .bind(&job.payload)
        .bind(job.max_retries)
        .fetch_optional(self.pool())
        .await
        .context("failed to insert queued job")?;

        row.map(|row| row.try_get::<i64, _>("id").context("failed to get job id"))
            .transpose()
    }

    async fn pick_next_job(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<QueuedJob>> {
        let query = format!(
            r"
            UPDATE job_queue
            SET status = 'running',
                started_at = $2
            WHERE id = (
                SELECT id
                FROM job_queue
                WHERE queue_name = $1
                  AND (
                    (status IN ('pending', 'retrying') AND available_at <= $2)
                    OR (status = 'running' AND started_at < $3)
                  )
                ORDER BY available_at ASC, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "
        );
        let row = sqlx::query(&query)
            .bind(queue.as_str())
            .bind(now)
            .bind(stale_before)
            .fetch_optional(self.pool())
            .await
            .context("failed to pick next job")?;

        row.map(row_to_job).transpose()
    }

    async fn mark_completed(&self, job_id: QueuedJobId) -> Result<()> {
        sqlx::query(
            r"
            UPDATE job_queue
            SET status = 'completed',
                error_message = NULL,
                completed_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(job_id)
        .execute(self.pool())
        .await
        .context("failed to mark job as completed")?;

        Ok(())
    }

    async fn mark_failed(&self, job_id: QueuedJobId, error: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE job_queue
            SET status = 'failed',
                error_message = $2,
                completed_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(job_id)
        .bind(error)
        .execute(self.pool())
        .await
        .context("failed to mark job as failed")?;

        Ok(())
    }

    async fn mark_retrying(
        &self,
        job_id: QueuedJobId,
        error: &str,
        available_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE job_queue
            SET status = 'retrying',
                error_message = $2,
                retry_count = retry_count + 1,
                available_at = $3,
                started_at = NULL
            WHERE id = $1
            ",
        )
        .bind(job_id)
        .bind(error)
        .bind(available_at)
        .execute(self.pool())
        .await
        .context("failed to mark job as retrying")?;

        Ok(())
    }

    async fn get_job(&self, job_id: QueuedJobId) -> Result<Option<QueuedJob>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM job_queue WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(job_id)
            .fetch_optional(self.pool())
            .await
            .context("failed to get job")?;

        row.map(row_to_job).transpose()
    }
}

fn row_to_job(row: sqlx::postgres::PgRow) -> Result<QueuedJob> {
    let queue_name: String = row.try_get("queue_name").context("failed to get queue_name")?;
    let status: String = row.try_get("status").context("failed to get status")?;
    let payload: Value = row.try_get("payload").context("failed to get payload")?;

    Ok(QueuedJob {
        id: row.try_get("id").context("failed to get id")?,
        queue: QueueName::parse(&queue_name)
            .with_context(|| format!("invalid queue name: {queue_name}"))?,
        job_key: row.try_get("job_key").context("failed to get job_key")?,
        payload,
        status: QueuedJobStatus::parse(&status)
            .with_context(|| format!("invalid status: {status}"))?,
        error_message: row.try_get("error_message").context("failed to get error_message")?,
        retry_count: row.try_get("retry_count").context("failed to get retry_count")?,
        max_retries: row.try_get("max_retries").context("failed to get max_retries")?,
        available_at: row.try_get("available_at").context("failed to get available_at")?,
        created_at: row.try_get("created_at").context("failed to get created_at")?,
        started_at: row.try_get("started_at").context("failed to get started_at")?,
        completed_at: row.try_get("completed_at").context("failed to get completed_at")?,
    })
}
