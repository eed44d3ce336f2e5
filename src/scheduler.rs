mod cadence;
mod daemon;
mod dispatch;
mod lock;

pub use cadence::DailyCadence;
pub use daemon::{spawn_backfill_daemon, spawn_retention_daemon, spawn_scheduler_daemon};
pub use dispatch::{DispatchOutcome, DispatchReport, DueDispatcher};
pub use lock::{LockManager, next_due_from, worker_id};
