use anyhow::Result;
use async_trait::async_trait;

/// Backing-store reachability, used by the readiness probe.
#[async_trait]
pub trait StoreHealth: Send + Sync {
    async fn ping(&self) -> Result<()>;
}
