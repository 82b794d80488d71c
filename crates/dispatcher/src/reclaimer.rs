//! Task reclamation sweep.
//!
//! A task held by a worker whose heartbeat has gone stale returns to the
//! queue with its assignment cleared. Reclamation is not a failure: the
//! previous worker is not penalized and its registered documents stay.

use std::sync::Arc;

use chrono::{Duration, Utc};
use reyestr_config::DispatcherConfig;
use reyestr_domain::repositories::TaskRepository;
use reyestr_errors::DispatchResult;
use tracing::{debug, info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ReclaimConfig {
    /// Tasks whose holder has been silent this long are reclaimed.
    pub inactivity_threshold_seconds: i64,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            inactivity_threshold_seconds: 180,
        }
    }
}

impl From<&DispatcherConfig> for ReclaimConfig {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            inactivity_threshold_seconds: config.inactivity_threshold_seconds as i64,
        }
    }
}

pub struct TaskReclaimer {
    task_repo: Arc<dyn TaskRepository>,
    config: ReclaimConfig,
}

impl TaskReclaimer {
    pub fn new(task_repo: Arc<dyn TaskRepository>, config: ReclaimConfig) -> Self {
        Self { task_repo, config }
    }

    /// One sweep pass. The caller is responsible for holding the sweep
    /// lease so only one instance runs at a time.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> DispatchResult<Vec<Uuid>> {
        let stale_before = Utc::now() - Duration::seconds(self.config.inactivity_threshold_seconds);
        let reclaimed = self.task_repo.reclaim_stalled(stale_before).await?;

        if reclaimed.is_empty() {
            debug!("no stalled tasks to reclaim");
        } else {
            info!(count = reclaimed.len(), "returned stalled tasks to the queue");
        }
        Ok(reclaimed)
    }
}
