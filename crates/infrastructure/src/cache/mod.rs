//! Optional read-through cache.
//!
//! Reads fall through to the store on any cache failure; writers invalidate
//! after their transaction commits and a failed invalidation is logged, not
//! surfaced — stale reads last at most one TTL.

pub mod factory;
pub mod keys;
pub mod manager;

pub use factory::{build_cache, DisabledCache};
pub use manager::RedisCacheManager;

use std::time::Duration;

use async_trait::async_trait;
use reyestr_errors::DispatchResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

#[async_trait]
pub trait CacheService: Send + Sync {
    async fn get(&self, key: &str) -> DispatchResult<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> DispatchResult<()>;
    async fn delete(&self, key: &str) -> DispatchResult<bool>;
    async fn delete_prefix(&self, prefix: &str) -> DispatchResult<usize>;
    async fn health_check(&self) -> DispatchResult<bool>;

    fn is_enabled(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
}

/// Read a cached JSON value; any failure is a miss.
pub async fn read_json<T: DeserializeOwned>(cache: &dyn CacheService, key: &str) -> Option<T> {
    match cache.get(key).await {
        Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, error = %err, "discarding undecodable cache entry");
                None
            }
        },
        Ok(None) => None,
        Err(err) => {
            warn!(key, error = %err, "cache read failed, falling through");
            None
        }
    }
}

/// Write a JSON value; failures are logged and swallowed.
pub async fn write_json<T: Serialize>(
    cache: &dyn CacheService,
    key: &str,
    value: &T,
    ttl: Duration,
) {
    let bytes = match serde_json::to_vec(value) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(key, error = %err, "failed to encode cache value");
            return;
        }
    };
    if let Err(err) = cache.set(key, &bytes, ttl).await {
        warn!(key, error = %err, "cache write failed");
    }
}

/// Post-commit invalidation; failures are logged and swallowed.
pub async fn invalidate(cache: &dyn CacheService, key: &str) {
    match cache.delete(key).await {
        Ok(_) => debug!(key, "cache invalidated"),
        Err(err) => warn!(key, error = %err, "cache invalidation failed"),
    }
}

pub async fn invalidate_prefix(cache: &dyn CacheService, prefix: &str) {
    match cache.delete_prefix(prefix).await {
        Ok(count) => debug!(prefix, count, "cache prefix invalidated"),
        Err(err) => warn!(prefix, error = %err, "cache prefix invalidation failed"),
    }
}
