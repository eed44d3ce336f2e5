mod handler;
mod pipeline;
mod retention;

pub use handler::MonitorJobHandler;
pub use pipeline::{MonitorError, MonitorOutcome, MonitorPipeline, MonitorStatus};
pub use retention::SnapshotRetention;
