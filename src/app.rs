use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reyestr_api::auth::AuthSettings;
use reyestr_api::{create_router, AppState};
use reyestr_config::AppConfig;
use reyestr_dispatcher::{
    LivenessConfig, LivenessMonitor, ReclaimConfig, RegistrarService, StatisticsService,
    TaskReclaimer, TaskService,
};
use reyestr_infrastructure::cache::{build_cache, CacheService};
use reyestr_infrastructure::database::postgres::{
    PostgresClientRepository, PostgresDocumentRepository, PostgresProgressRepository,
    PostgresTaskRepository,
};
use reyestr_infrastructure::{
    connect_pool, health_check, SweepLease, LIVENESS_SWEEP_LOCK, RECLAIM_SWEEP_LOCK,
};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Assembled process: pool, cache, services and the router, ready to run.
pub struct Application {
    config: AppConfig,
    pool: PgPool,
    state: AppState,
    reclaimer: Arc<TaskReclaimer>,
    liveness: Arc<LivenessMonitor>,
}

impl Application {
    /// Wire everything together. The store must be reachable; the cache
    /// only when configured as required.
    pub async fn new(
        config: AppConfig,
        cache: Arc<dyn CacheService>,
        pool: PgPool,
    ) -> Result<Self> {
        let deadline = Duration::from_secs(config.database.statement_timeout_seconds);

        let task_repo = Arc::new(PostgresTaskRepository::new(pool.clone(), deadline));
        let client_repo = Arc::new(PostgresClientRepository::new(pool.clone(), deadline));
        let document_repo = Arc::new(PostgresDocumentRepository::new(pool.clone(), deadline));
        let progress_repo = Arc::new(PostgresProgressRepository::new(pool.clone(), deadline));

        let task_service = Arc::new(TaskService::new(
            task_repo.clone(),
            client_repo.clone(),
            cache.clone(),
            &config.cache,
        ));
        let registrar = Arc::new(RegistrarService::new(
            document_repo.clone(),
            task_repo.clone(),
            client_repo.clone(),
            progress_repo.clone(),
            cache.clone(),
            &config.cache,
        ));
        let statistics = Arc::new(StatisticsService::new(
            task_repo.clone(),
            client_repo.clone(),
            document_repo,
            progress_repo,
            cache,
            &config.cache,
        ));

        let reclaimer = Arc::new(TaskReclaimer::new(
            task_repo,
            ReclaimConfig::from(&config.dispatcher),
        ));
        let liveness = Arc::new(LivenessMonitor::new(
            client_repo.clone(),
            LivenessConfig::from(&config.dispatcher),
        ));

        let state = AppState {
            task_service,
            registrar,
            statistics,
            client_repo,
            auth: Arc::new(AuthSettings::from_config(&config.api)),
        };

        Ok(Self {
            config,
            pool,
            state,
            reclaimer,
            liveness,
        })
    }

    /// Serve the API and run both sweeps until shutdown.
    pub async fn run(&self, shutdown: &crate::shutdown::ShutdownManager) -> Result<()> {
        let reclaim_handle = tokio::spawn(run_reclaim_loop(
            Arc::clone(&self.reclaimer),
            self.pool.clone(),
            self.config.dispatcher.reclaim_interval_seconds,
            shutdown.subscribe(),
        ));
        let liveness_handle = tokio::spawn(run_liveness_loop(
            Arc::clone(&self.liveness),
            self.pool.clone(),
            self.config.dispatcher.liveness_interval_seconds(),
            shutdown.subscribe(),
        ));

        let bind_address = self.config.api.bind_address();
        let listener = TcpListener::bind(&bind_address)
            .await
            .with_context(|| format!("failed to bind {bind_address}"))?;
        info!("API listening on http://{bind_address}");

        let router = create_router(self.state.clone());
        let mut shutdown_rx = shutdown.subscribe();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .context("API server failed")?;

        let _ = tokio::join!(reclaim_handle, liveness_handle);
        self.pool.close().await;
        info!("dispatcher stopped");
        Ok(())
    }
}

/// Connect the pool and verify the store answers. Startup fails here when
/// the store is down.
pub async fn connect_store(config: &AppConfig) -> Result<PgPool> {
    let pool = connect_pool(&config.database)
        .await
        .context("store connection failed")?;
    health_check(&pool).await.context("store ping failed")?;
    Ok(pool)
}

pub async fn connect_cache(config: &AppConfig) -> Result<Arc<dyn CacheService>> {
    build_cache(&config.cache)
        .await
        .context("cache connection failed")
}

/// Periodically return stalled tasks to the queue. The advisory lock keeps
/// the sweep single-instance across dispatcher processes.
async fn run_reclaim_loop(
    reclaimer: Arc<TaskReclaimer>,
    pool: PgPool,
    interval_seconds: u64,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));
    info!(interval_seconds, "task reclamation sweep started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_leased(&pool, RECLAIM_SWEEP_LOCK, "reclaim", || reclaimer.run_once()).await;
            }
            _ = shutdown_rx.recv() => {
                info!("task reclamation sweep stopping");
                break;
            }
        }
    }
}

/// Periodically flip silent workers to inactive.
async fn run_liveness_loop(
    liveness: Arc<LivenessMonitor>,
    pool: PgPool,
    interval_seconds: u64,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));
    info!(interval_seconds, "worker liveness sweep started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_leased(&pool, LIVENESS_SWEEP_LOCK, "liveness", || liveness.run_once()).await;
            }
            _ = shutdown_rx.recv() => {
                info!("worker liveness sweep stopping");
                break;
            }
        }
    }
}

async fn run_leased<F, Fut>(pool: &PgPool, lock_key: i64, name: &str, sweep: F)
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = reyestr_errors::DispatchResult<Vec<uuid::Uuid>>>,
{
    match SweepLease::try_acquire(pool, lock_key).await {
        Ok(Some(lease)) => {
            if let Err(err) = sweep().await {
                error!(sweep = name, error = %err, "sweep pass failed");
            }
            lease.release().await;
        }
        Ok(None) => debug!(sweep = name, "another instance holds the sweep lease"),
        Err(err) => error!(sweep = name, error = %err, "sweep lease acquisition failed"),
    }
}
