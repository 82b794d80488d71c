use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reyestr_config::CacheConfig;
use reyestr_errors::DispatchResult;
use tracing::{info, warn};

use super::{CacheService, RedisCacheManager};

/// Backend used when the cache is disabled or unreachable. Every read is a
/// miss; writes and invalidations are no-ops.
pub struct DisabledCache;

#[async_trait]
impl CacheService for DisabledCache {
    async fn get(&self, _key: &str) -> DispatchResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> DispatchResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> DispatchResult<bool> {
        Ok(false)
    }

    async fn delete_prefix(&self, _prefix: &str) -> DispatchResult<usize> {
        Ok(0)
    }

    async fn health_check(&self) -> DispatchResult<bool> {
        Ok(false)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Build the cache backend for this process. Only a required-but-unreachable
/// cache is an error; otherwise the service runs with reads falling through
/// to the store.
pub async fn build_cache(config: &CacheConfig) -> DispatchResult<Arc<dyn CacheService>> {
    if !config.enabled {
        info!("cache disabled by configuration");
        return Ok(Arc::new(DisabledCache));
    }

    match RedisCacheManager::new(config).await {
        Ok(manager) => Ok(Arc::new(manager)),
        Err(err) if !config.required => {
            warn!(error = %err, "cache unreachable, continuing without it");
            Ok(Arc::new(DisabledCache))
        }
        Err(err) => Err(err),
    }
}
