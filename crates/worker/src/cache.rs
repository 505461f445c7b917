//! Redis-backed cache invalidation

use async_trait::async_trait;
use pagecraft_billing::{BillingError, BillingResult, CacheInvalidator};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Deletes routing cache keys from Redis
#[derive(Clone)]
pub struct RedisCacheInvalidator {
    conn: ConnectionManager,
}

impl RedisCacheInvalidator {
    pub async fn connect(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheInvalidator for RedisCacheInvalidator {
    async fn invalidate(&self, key: &str) -> BillingResult<()> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .del(key)
            .await
            .map_err(|e| BillingError::Cache(e.to_string()))?;
        tracing::debug!(key = %key, removed, "Invalidated cache key");
        Ok(())
    }
}
