//! PostgreSQL implementation of every DAO trait.

mod change;
mod notification;
mod resource;
mod snapshot;
mod subscriber;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::StoreHealth;

/// DAO backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the bundled schema migrations.
    ///
    /// # Errors
    /// Returns an error when a migration fails to apply.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to apply database migrations")
    }

    /// Round-trips a trivial query, used by the readiness probe.
    ///
    /// # Errors
    /// Returns an error when the database is unreachable.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("database ping failed")?;
        Ok(())
    }
}

#[async_trait]
impl StoreHealth for PgStore {
    async fn ping(&self) -> Result<()> {
        PgStore::ping(self).await
    }
}
