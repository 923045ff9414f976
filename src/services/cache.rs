use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur with cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Cache miss: {0}")]
    CacheMiss(String),
}

/// Two-tier response cache
///
/// L1 is an in-process moka cache; L2 is Redis, shared across instances.
/// Redis is optional: without it the manager runs L1-only.
pub struct CacheManager {
    redis: Option<Arc<tokio::sync::Mutex<ConnectionManager>>>,
    l1_cache: moka::future::Cache<String, Vec<u8>>,
    ttl_secs: u64,
}

impl CacheManager {
    /// Create a cache manager, connecting to Redis when a URL is given.
    ///
    /// An unreachable Redis is logged and the cache falls back to L1 only.
    pub async fn new(redis_url: Option<&str>, l1_size: u64, ttl_secs: u64) -> Self {
        let redis = match redis_url {
            Some(url) => match Self::connect(url).await {
                Ok(conn) => {
                    tracing::info!("Connected to Redis");
                    Some(Arc::new(tokio::sync::Mutex::new(conn)))
                }
                Err(e) => {
                    tracing::warn!("Redis unavailable, using in-process cache only: {}", e);
                    None
                }
            },
            None => None,
        };

        Self {
            redis,
            l1_cache: Self::build_l1(l1_size, ttl_secs),
            ttl_secs,
        }
    }

    /// In-process cache only
    pub fn l1_only(l1_size: u64, ttl_secs: u64) -> Self {
        Self {
            redis: None,
            l1_cache: Self::build_l1(l1_size, ttl_secs),
            ttl_secs,
        }
    }

    async fn connect(url: &str) -> Result<ConnectionManager, CacheError> {
        let client = redis::Client::open(url)?;
        Ok(ConnectionManager::new(client).await?)
    }

    fn build_l1(l1_size: u64, ttl_secs: u64) -> moka::future::Cache<String, Vec<u8>> {
        moka::future::CacheBuilder::new(l1_size)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build()
    }

    pub fn has_redis(&self) -> bool {
        self.redis.is_some()
    }

    /// Get a value from cache (L1 first, then L2)
    pub async fn get<T>(&self, key: &str) -> Result<T, CacheError>
    where
        T: for<'de> Deserialize<'de>,
    {
        if let Some(bytes) = self.l1_cache.get(key).await {
            tracing::trace!("L1 cache hit: {}", key);
            return Ok(serde_json::from_slice(&bytes)?);
        }

        if let Some(redis) = &self.redis {
            let mut conn = redis.lock().await;
            let value: Option<String> = redis::cmd("GET")
                .arg(key)
                .query_async(&mut *conn)
                .await?;
            drop(conn);

            if let Some(json) = value {
                tracing::trace!("L2 cache hit: {}", key);
                self.l1_cache
                    .insert(key.to_string(), json.as_bytes().to_vec())
                    .await;
                return Ok(serde_json::from_str(&json)?);
            }
        }

        tracing::trace!("Cache miss: {}", key);
        Err(CacheError::CacheMiss(key.to_string()))
    }

    /// Set a value in both tiers
    pub async fn set<T>(&self, key: &str, value: &T) -> Result<(), CacheError>
    where
        T: Serialize,
    {
        let json = serde_json::to_string(value)?;
        self.l1_cache
            .insert(key.to_string(), json.as_bytes().to_vec())
            .await;

        if let Some(redis) = &self.redis {
            let mut conn = redis.lock().await;
            redis::cmd("SETEX")
                .arg(key)
                .arg(self.ttl_secs)
                .arg(json)
                .query_async::<()>(&mut *conn)
                .await?;
        }

        tracing::trace!("Cache set: {}", key);
        Ok(())
    }

    /// Delete a value from both tiers
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.l1_cache.invalidate(key).await;
        if let Some(redis) = &self.redis {
            let mut conn = redis.lock().await;
            redis::cmd("DEL")
                .arg(key)
                .query_async::<()>(&mut *conn)
                .await?;
        }
        Ok(())
    }
}

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    /// Matching results for an order at a given limit
    pub fn matches(order_id: i64, limit: usize) -> String {
        format!("match:{}:{}", order_id, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn test_cache_set_get_with_redis() {
        let cache = CacheManager::new(Some("redis://127.0.0.1:6379"), 1000, 60).await;
        assert!(cache.has_redis());

        let key = CacheKey::matches(1, 3);
        cache.set(&key, &vec![1, 2, 3]).await.unwrap();
        let result: Vec<i32> = cache.get(&key).await.unwrap();
        assert_eq!(result, vec![1, 2, 3]);

        cache.delete(&key).await.unwrap();
        assert!(cache.get::<Vec<i32>>(&key).await.is_err());
    }

    #[tokio::test]
    async fn test_l1_only_round_trip() {
        let cache = CacheManager::l1_only(100, 60);

        cache.set("k", &"value").await.unwrap();
        let value: String = cache.get("k").await.unwrap();
        assert_eq!(value, "value");

        cache.delete("k").await.unwrap();
        assert!(matches!(cache.get::<String>("k").await, Err(CacheError::CacheMiss(_))));
    }

    #[test]
    fn test_cache_key_builder() {
        assert_eq!(CacheKey::matches(42, 3), "match:42:3");
        assert_ne!(CacheKey::matches(42, 3), CacheKey::matches(42, 5));
    }
}
