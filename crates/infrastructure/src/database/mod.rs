//! Store gateway: pool construction, statement deadlines and the advisory
//! locks that keep background sweeps single-instance.

pub mod postgres;
mod statement;

pub use statement::with_deadline;

use std::time::Duration;

use reyestr_config::DatabaseConfig;
use reyestr_errors::{DispatchError, DispatchResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Advisory-lock key for the task-reclamation sweep.
pub const RECLAIM_SWEEP_LOCK: i64 = 0x7265_636c;
/// Advisory-lock key for the worker-liveness sweep.
pub const LIVENESS_SWEEP_LOCK: i64 = 0x6c69_7665;

/// Build the process-wide connection pool. The acquire timeout doubles as
/// the bounded wait after which pool exhaustion surfaces as
/// `StoreUnavailable`.
pub async fn connect_pool(config: &DatabaseConfig) -> DispatchResult<PgPool> {
    info!("connecting to store at {}", config.masked_url());

    let pool = PgPoolOptions::new()
        .min_connections(config.pool_min_connections)
        .max_connections(config.pool_max_connections)
        .acquire_timeout(Duration::from_secs(config.statement_timeout_seconds))
        .connect(&config.url())
        .await
        .map_err(DispatchError::store)?;

    info!(
        min = config.pool_min_connections,
        max = config.pool_max_connections,
        "store pool ready"
    );
    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> DispatchResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(DispatchError::store)?;
    Ok(())
}

/// A held advisory lock pinned to one pooled connection. Dropping the lease
/// returns the connection to the pool, which releases the session lock.
pub struct SweepLease {
    conn: sqlx::pool::PoolConnection<sqlx::Postgres>,
    key: i64,
}

impl SweepLease {
    /// Try to take the lock without waiting. `None` means another instance
    /// of the sweep is already running.
    pub async fn try_acquire(pool: &PgPool, key: i64) -> DispatchResult<Option<SweepLease>> {
        let mut conn = pool.acquire().await.map_err(DispatchError::store)?;
        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .map_err(DispatchError::store)?;

        if locked {
            Ok(Some(SweepLease { conn, key }))
        } else {
            Ok(None)
        }
    }

    pub async fn release(mut self) {
        let _ = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .execute(&mut *self.conn)
            .await;
    }
}
