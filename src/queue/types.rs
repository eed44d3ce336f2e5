use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named job streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Monitor,
    Notify,
}

impl QueueName {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::Monitor => "monitor",
            QueueName::Notify => "notify",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "monitor" => Some(QueueName::Monitor),
            "notify" => Some(QueueName::Notify),
            _ => None,
        }
    }
}

/// Status of a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuedJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Retrying,
}

impl QueuedJobStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            QueuedJobStatus::Pending => "pending",
            QueuedJobStatus::Running => "running",
            QueuedJobStatus::Completed => "completed",
            QueuedJobStatus::Failed => "failed",
            QueuedJobStatus::Retrying => "retrying",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(QueuedJobStatus::Pending),
            "running" => Some(QueuedJobStatus::Running),
            "completed" => Some(QueuedJobStatus::Completed),
            "failed" => Some(QueuedJobStatus::Failed),
            "retrying" => Some(QueuedJobStatus::Retrying),
            _ => None,
        }
    }

    /// A live job blocks enqueueing another with the same key.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(
            self,
            QueuedJobStatus::Pending | QueuedJobStatus::Running | QueuedJobStatus::Retrying
        )
    }
}

/// Queued job ID (database primary key)
pub type QueuedJobId = i64;

/// A job claimed from or stored in the queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub id: QueuedJobId,
    pub queue: QueueName,
    pub job_key: String,
    pub payload: Value,
    pub status: QueuedJobStatus,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// New job to be inserted into the queue
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueuedJob {
    pub queue: QueueName,
    pub job_key: String,
    pub payload: Value,
    pub max_retries: i32,
}

/// Payload of a `monitor` job: the resource and the owner of its scheduling lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorJobPayload {
    pub resource_id: uuid::Uuid,
    pub lock_owner: String,
}

/// Payload of a `notify` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyJobPayload {
    pub change_id: uuid::Uuid,
}
