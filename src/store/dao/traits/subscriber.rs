//! SubscriberDirectory - who owns a resource and how to reach them

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::store::models::Subscriber;

#[async_trait]
pub trait SubscriberDirectory: Send + Sync {
    async fn resolve(&self, resource_id: Uuid) -> Result<Option<Subscriber>>;
}
