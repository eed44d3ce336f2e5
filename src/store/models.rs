use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::diff::ChangeSet;
use crate::severity::Severity;

/// An external target checked on a fixed interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoredResource {
    pub id: Uuid,
    pub subscriber_id: Uuid,
    pub name: Option<String>,
    pub target_url: String,
    pub content_selector: Option<String>,
    pub check_interval_minutes: i32,
    pub noise_patterns: Vec<String>,
    pub is_active: bool,
    pub consecutive_errors: i32,
    pub last_error: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub next_due_at: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_run_status: Option<RunStatus>,
    pub last_run_duration_ms: Option<i64>,
    pub run_count: i64,
}

impl MonitoredResource {
    /// A fresh, active, unlocked resource due immediately.
    #[must_use]
    pub fn new(subscriber_id: Uuid, target_url: impl Into<String>, check_interval_minutes: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscriber_id,
            name: None,
            target_url: target_url.into(),
            content_selector: None,
            check_interval_minutes,
            noise_patterns: Vec::new(),
            is_active: true,
            consecutive_errors: 0,
            last_error: None,
            last_checked_at: None,
            next_due_at: Utc::now(),
            locked_by: None,
            locked_at: None,
            last_run_status: None,
            last_run_duration_ms: None,
            run_count: 0,
        }
    }

    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::minutes(i64::from(self.check_interval_minutes.max(1)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Statistics written back to a resource when its lock is released.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub status: RunStatus,
    pub duration_ms: i64,
    pub error: Option<String>,
}

/// Captured copy of a resource's content. Never updated after insert.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub content_hash: String,
    pub content_text: String,
    pub content_truncated: bool,
    pub status_code: i32,
    pub fetch_duration_ms: i64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
}

impl DeliveryStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            _ => None,
        }
    }
}

/// A meaningful difference between two consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub snapshot_before_id: Uuid,
    pub snapshot_after_id: Uuid,
    pub diff: ChangeSet,
    pub summary: String,
    pub severity: Severity,
    pub delivery_status: DeliveryStatus,
    pub notified_at: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
}

/// Minimal view of an undelivered change used by reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

impl NotificationStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One delivery attempt. Rows are only ever inserted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub change_id: Uuid,
    pub subscriber_id: Option<Uuid>,
    pub channel: String,
    pub recipient: Option<String>,
    pub status: NotificationStatus,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    #[must_use]
    pub fn sent(change_id: Uuid, subscriber: &Subscriber, recipient: &str, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            change_id,
            subscriber_id: Some(subscriber.id),
            channel: subscriber.channel.clone(),
            recipient: Some(recipient.to_string()),
            status: NotificationStatus::Sent,
            error_message: None,
            sent_at: Some(at),
            created_at: at,
        }
    }

    #[must_use]
    pub fn failed(
        change_id: Uuid,
        subscriber: Option<&Subscriber>,
        error: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            change_id,
            subscriber_id: subscriber.map(|s| s.id),
            channel: subscriber.map_or_else(|| "unknown".to_string(), |s| s.channel.clone()),
            recipient: subscriber.and_then(|s| s.address().map(str::to_string)),
            status: NotificationStatus::Failed,
            error_message: Some(error.into()),
            sent_at: None,
            created_at: at,
        }
    }
}

/// Owner of a resource as seen by delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub id: Uuid,
    pub channel: String,
    pub email: Option<String>,
    pub webhook_url: Option<String>,
}

impl Subscriber {
    /// Address for the preferred channel, if the subscriber has one.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        match self.channel.as_str() {
            "email" => self.email.as_deref(),
            "webhook" => self.webhook_url.as_deref(),
            _ => None,
        }
    }
}
