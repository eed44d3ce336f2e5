use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use super::PgStore;
use crate::store::dao::traits::SubscriberDirectory;
use crate::store::models::Subscriber;

#[async_trait]
impl SubscriberDirectory for PgStore {
    async fn resolve(&self, resource_id: Uuid) -> Result<Option<Subscriber>> {
        let row = sqlx::query(
            r"
            SELECT s.id, s.channel, s.email, s.webhook_url
            FROM monitored_resources r
            JOIN subscribers s ON s.id = r.subscriber_id
            WHERE r.id = $1
            ",
        )
        .bind(resource_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to resolve subscriber")?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(Subscriber {
            id: row.try_get("id").context("failed to get id")?,
            channel: row.try_get("channel").context("failed to get channel")?,
            email: row.try_get("email").context("failed to get email")?,
            webhook_url: row.try_get("webhook_url").context("failed to get webhook_url")?,
        }))
    }
}
