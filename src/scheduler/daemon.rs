use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::{error, info};

use super::{cadence::DailyCadence, dispatch::DueDispatcher};
use crate::monitor::SnapshotRetention;
use crate::notify::BackfillScanner;

/// 起動直後と`poll_interval`ごとに期限到来リソースをディスパッチする。
pub fn spawn_scheduler_daemon(
    dispatcher: Arc<DueDispatcher>,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run_every("scheduler", poll_interval, shutdown, move || {
        let dispatcher = Arc::clone(&dispatcher);
        async move {
            if let Err(e) = dispatcher.dispatch_due().await {
                error!(error = %e, "scheduler cycle failed");
            }
        }
    }))
}

/// 起動時と`interval`ごとに未配信の変更を再キューする。
pub fn spawn_backfill_daemon(
    scanner: Arc<BackfillScanner>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run_every("backfill", interval, shutdown, move || {
        let scanner = Arc::clone(&scanner);
        async move {
            if let Err(e) = scanner.reconcile().await {
                error!(error = %e, "backfill reconcile failed");
            }
        }
    }))
}

/// 1日1回スナップショットの整理を実行する。
pub fn spawn_retention_daemon(
    retention: Arc<SnapshotRetention>,
    cadence: DailyCadence,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next = cadence.next_run_from(now);
            let wait = duration_until(next, now);
            info!(
                next_run_utc = %next.to_rfc3339(),
                wait_seconds = wait.as_secs(),
                "scheduled snapshot retention sweep"
            );

            tokio::select! {
                () = sleep(wait) => {}
                _ = shutdown.changed() => break,
            }

            match retention.sweep(Utc::now()).await {
                Ok(pruned) => info!(pruned, "snapshot retention sweep completed"),
                Err(e) => error!(error = %e, "snapshot retention sweep failed"),
            }
        }
        info!("retention daemon stopped");
    })
}

async fn run_every<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut task: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    info!(daemon = name, period_secs = period.as_secs(), "daemon started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        task().await;
        tokio::select! {
            () = sleep(period) => {}
            _ = shutdown.changed() => break,
        }
    }
    info!(daemon = name, "daemon stopped");
}

fn duration_until(next: chrono::DateTime<Utc>, now: chrono::DateTime<Utc>) -> Duration {
    (next - now).to_std().unwrap_or(Duration::ZERO)
}
