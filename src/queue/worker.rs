use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tokio::time::{Interval, MissedTickBehavior, interval, sleep};
use tracing::{debug, error, info, warn};

use super::store::QueueStore;
use super::types::{QueueName, QueuedJob};
use crate::observability::metrics::Metrics;
use crate::util::retry::RetryConfig;

/// Outcome of a failed job attempt.
#[derive(Debug, Error)]
pub enum JobError {
    /// Transient failure; the job is retried with backoff until its budget is spent.
    #[error("{0:#}")]
    Retryable(anyhow::Error),
    /// The job can never succeed and is failed immediately.
    #[error("{0:#}")]
    Permanent(anyhow::Error),
}

impl JobError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Retryable(_))
    }
}

/// Processes the jobs of one queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn queue(&self) -> QueueName;

    async fn handle(&self, job: &QueuedJob) -> Result<(), JobError>;
}

#[derive(Debug, Clone)]
pub struct QueueWorkerConfig {
    pub concurrency: usize,
    /// Upper bound on jobs started per minute; `None` is unbounded.
    pub rate_per_minute: Option<u32>,
    pub poll_interval: Duration,
    /// A running job older than this is considered abandoned and reclaimed.
    pub visibility_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for QueueWorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            rate_per_minute: None,
            poll_interval: Duration::from_secs(1),
            visibility_timeout: Duration::from_secs(600),
            retry: RetryConfig::new(3, 1000, 60_000),
        }
    }
}

/// Background worker that claims jobs from one queue and runs them through a handler.
pub struct QueueWorker {
    store: Arc<dyn QueueStore>,
    handler: Arc<dyn JobHandler>,
    semaphore: Arc<Semaphore>,
    config: QueueWorkerConfig,
    metrics: Arc<Metrics>,
}

impl QueueWorker {
    pub fn new(
        store: Arc<dyn QueueStore>,
        handler: Arc<dyn JobHandler>,
        config: QueueWorkerConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            store,
            handler,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            config,
            metrics,
        }
    }

    fn rate_limiter(&self) -> Option<Interval> {
        let per_minute = self.config.rate_per_minute.filter(|rate| *rate > 0)?;
        let mut ticker = interval(Duration::from_secs(60) / per_minute);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(ticker)
    }

    /// Run until the shutdown signal flips, then wait for in-flight jobs.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let queue = self.handler.queue();
        let mut rate_limiter = self.rate_limiter();
        info!(
            queue = queue.as_str(),
            concurrency = self.semaphore.available_permits(),
            rate_per_minute = ?self.config.rate_per_minute,
            "starting queue worker"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            if let Some(ticker) = rate_limiter.as_mut() {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
            }

            let job = match self.pick().await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        () = sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => break,
                    }
                    continue;
                }
                Err(e) => {
                    error!(queue = queue.as_str(), error = %e, "failed to pick next job");
                    drop(permit);
                    tokio::select! {
                        () = sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => break,
                    }
                    continue;
                }
            };

            let store = Arc::clone(&self.store);
            let handler = Arc::clone(&self.handler);
            let metrics = Arc::clone(&self.metrics);
            let retry = self.config.retry;
            tokio::spawn(async move {
                process_job(store.as_ref(), handler.as_ref(), &metrics, retry, job).await;
                drop(permit);
            });
        }

        let in_flight = u32::try_from(self.config.concurrency.max(1)).unwrap_or(u32::MAX);
        if self.semaphore.acquire_many(in_flight).await.is_ok() {
            info!(queue = queue.as_str(), "queue worker drained");
        }
    }

    /// Process every currently available job sequentially. Returns the number handled.
    ///
    /// # Errors
    /// Returns an error when the queue store cannot be read.
    pub async fn drain(&self) -> anyhow::Result<usize> {
        let mut handled = 0;
        while let Some(job) = self.pick().await? {
            process_job(
                self.store.as_ref(),
                self.handler.as_ref(),
                &self.metrics,
                self.config.retry,
                job,
            )
            .await;
            handled += 1;
        }
        Ok(handled)
    }

    async fn pick(&self) -> anyhow::Result<Option<QueuedJob>> {
        let now = Utc::now();
        let visibility = chrono::Duration::from_std(self.config.visibility_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(10));
        self.store
            .pick_next_job(self.handler.queue(), now, now - visibility)
            .await
    }
}

async fn process_job(
    store: &dyn QueueStore,
    handler: &dyn JobHandler,
    metrics: &Metrics,
    retry: RetryConfig,
    job: QueuedJob,
) {
    let queue = job.queue.as_str();
    let active = metrics.active_jobs.with_label_values(&[queue]);
    active.inc();

    debug!(
        job_id = job.id,
        queue,
        job_key = %job.job_key,
        retry_count = job.retry_count,
        "processing queued job"
    );

    let result = handler.handle(&job).await;
    active.dec();

    let outcome = match result {
        Ok(()) => store.mark_completed(job.id).await.map(|()| "completed"),
        Err(JobError::Retryable(e)) if job.retry_count < job.max_retries => {
            let attempt = usize::try_from(job.retry_count + 1).unwrap_or(usize::MAX);
            let delay = retry.delay_for_attempt(attempt);
            let available_at =
                Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            warn!(
                job_id = job.id,
                queue,
                job_key = %job.job_key,
                retry_count = job.retry_count + 1,
                max_retries = job.max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %e,
                "job failed, will retry"
            );
            store
                .mark_retrying(job.id, &format!("{e:#}"), available_at)
                .await
                .map(|()| "retried")
        }
        Err(e) => {
            error!(
                job_id = job.id,
                queue,
                job_key = %job.job_key,
                retry_count = job.retry_count,
                retryable = e.is_retryable(),
                error = %e,
                "job failed permanently"
            );
            store.mark_failed(job.id, &e.to_string()).await.map(|()| "failed")
        }
    };

    match outcome {
        Ok(result) => metrics.queue_jobs.with_label_values(&[queue, result]).inc(),
        Err(e) => error!(job_id = job.id, queue, error = %e, "failed to record job outcome"),
    }
}
