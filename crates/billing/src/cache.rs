//! Cache invalidation seam
//!
//! Routing caches resolved workspaces and hosts. After a downgrade changes
//! what a workspace or hostname may serve, the cached entry is dropped so
//! the next request re-resolves it. Invalidation is best-effort.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::BillingResult;

/// Cache key for a resolved workspace
pub fn workspace_key(workspace_id: Uuid) -> String {
    format!("workspace:{}", workspace_id)
}

/// Cache key for a resolved hostname
pub fn host_key(hostname: &str) -> String {
    format!("host:{}", hostname.to_lowercase())
}

#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate(&self, key: &str) -> BillingResult<()>;
}

/// Used when no cache backend is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCacheInvalidator;

#[async_trait]
impl CacheInvalidator for NoopCacheInvalidator {
    async fn invalidate(&self, key: &str) -> BillingResult<()> {
        tracing::debug!(key = %key, "Cache not configured, skipping invalidation");
        Ok(())
    }
}

/// Invalidate and log instead of failing the caller
pub(crate) async fn invalidate_best_effort(cache: &dyn CacheInvalidator, key: &str) -> bool {
    match cache.invalidate(key).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Cache invalidation failed - non-fatal");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_key_is_case_insensitive() {
        assert_eq!(host_key("Shop.Example.COM"), "host:shop.example.com");
    }

    #[tokio::test]
    async fn test_noop_invalidator_succeeds() {
        assert!(invalidate_best_effort(&NoopCacheInvalidator, &workspace_key(Uuid::nil())).await);
    }
}
