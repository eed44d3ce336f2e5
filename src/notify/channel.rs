//! 配信チャネルと、チャネル名で振り分けるレジストリ。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::severity::Severity;
use crate::store::models::{Change, MonitoredResource};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("SMTP delivery failed: {0}")]
    Smtp(String),
    #[error("invalid recipient {recipient}: {message}")]
    InvalidRecipient { recipient: String, message: String },
    #[error("configuration error: {0}")]
    Config(String),
}

/// Message handed to a channel. Rendering beyond subject and summary is left to the receiver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub change_id: Uuid,
    pub resource_id: Uuid,
    pub resource_name: Option<String>,
    pub resource_url: Option<String>,
    pub subject: String,
    pub summary: String,
    pub severity: Severity,
    pub total_changes: usize,
    pub detected_at: DateTime<Utc>,
}

impl Notification {
    #[must_use]
    pub fn for_change(change: &Change, resource: Option<&MonitoredResource>) -> Self {
        let label = resource
            .and_then(|r| r.name.clone().or_else(|| Some(r.target_url.clone())))
            .unwrap_or_else(|| change.resource_id.to_string());
        Self {
            change_id: change.id,
            resource_id: change.resource_id,
            resource_name: resource.and_then(|r| r.name.clone()),
            resource_url: resource.map(|r| r.target_url.clone()),
            subject: format!("[{}] Change detected: {label}", change.severity.as_str()),
            summary: change.summary.clone(),
            severity: change.severity,
            total_changes: change.diff.total_changes(),
            detected_at: change.detected_at,
        }
    }
}

#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Channel name as stored on subscribers, e.g. `"email"`.
    fn name(&self) -> &str;

    async fn send(&self, recipient: &str, notification: &Notification) -> Result<(), DeliveryError>;
}

#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, Arc<dyn DeliveryChannel>>,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// チャネル名で登録する。同名のチャネルは置き換える。
    #[must_use]
    pub fn with(mut self, channel: Arc<dyn DeliveryChannel>) -> Self {
        self.channels.insert(channel.name().to_string(), channel);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn DeliveryChannel>> {
        self.channels.get(name).cloned()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.channels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
