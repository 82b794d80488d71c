//! Redis-backed cache manager.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use reyestr_config::CacheConfig;
use reyestr_errors::{DispatchError, DispatchResult};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument};

use super::{CacheService, CacheStats};

pub struct RedisCacheManager {
    conn: ConnectionManager,
    stats: Arc<RwLock<CacheStats>>,
}

impl RedisCacheManager {
    /// Connect and verify the server responds to PING.
    pub async fn new(config: &CacheConfig) -> DispatchResult<Self> {
        let url = config.redis_url();
        info!(url = %url, "connecting cache");

        let client =
            redis::Client::open(url).map_err(|e| DispatchError::Cache(e.to_string()))?;
        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(|e| DispatchError::Cache(e.to_string()))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| DispatchError::Cache(e.to_string()))?;

        info!("cache connected");
        Ok(Self {
            conn,
            stats: Arc::new(RwLock::new(CacheStats::default())),
        })
    }

    pub async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }

    async fn record_error(&self) {
        self.stats.write().await.errors += 1;
    }
}

#[async_trait]
impl CacheService for RedisCacheManager {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> DispatchResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let result: Result<Option<Vec<u8>>, redis::RedisError> =
            redis::cmd("GET").arg(key).query_async(&mut conn).await;

        match result {
            Ok(Some(value)) => {
                debug!(key, "cache hit");
                self.stats.write().await.hits += 1;
                Ok(Some(value))
            }
            Ok(None) => {
                debug!(key, "cache miss");
                self.stats.write().await.misses += 1;
                Ok(None)
            }
            Err(err) => {
                error!(key, error = %err, "cache GET failed");
                self.record_error().await;
                Err(DispatchError::Cache(err.to_string()))
            }
        }
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        let result: Result<(), redis::RedisError> = redis::cmd("SETEX")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .arg(value)
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                self.stats.write().await.sets += 1;
                Ok(())
            }
            Err(err) => {
                error!(key, error = %err, "cache SET failed");
                self.record_error().await;
                Err(DispatchError::Cache(err.to_string()))
            }
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> DispatchResult<bool> {
        let mut conn = self.conn.clone();
        let result: Result<i64, redis::RedisError> =
            redis::cmd("DEL").arg(key).query_async(&mut conn).await;

        match result {
            Ok(count) => {
                if count > 0 {
                    self.stats.write().await.deletes += 1;
                }
                Ok(count > 0)
            }
            Err(err) => {
                error!(key, error = %err, "cache DEL failed");
                self.record_error().await;
                Err(DispatchError::Cache(err.to_string()))
            }
        }
    }

    #[instrument(skip(self))]
    async fn delete_prefix(&self, prefix: &str) -> DispatchResult<usize> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(1000)
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    error!(prefix, error = %e, "cache SCAN failed");
                    DispatchError::Cache(e.to_string())
                })?;

            keys.extend(batch);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        if keys.is_empty() {
            return Ok(0);
        }

        let mut deleted = 0;
        for chunk in keys.chunks(100) {
            let _: i64 = redis::cmd("DEL")
                .arg(chunk)
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    error!(prefix, error = %e, "cache batch DEL failed");
                    DispatchError::Cache(e.to_string())
                })?;
            deleted += chunk.len();
        }

        self.stats.write().await.deletes += 1;
        debug!(prefix, deleted, "cache prefix cleared");
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> DispatchResult<bool> {
        let mut conn = self.conn.clone();
        let result: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| DispatchError::Cache(e.to_string()))?;
        Ok(result == "PONG")
    }
}
