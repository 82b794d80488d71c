//! Worker liveness sweep: flips workers past the inactivity threshold to
//! `inactive`. Task assignments are untouched here — returning stalled
//! tasks to the queue is the reclaimer's job.

use std::sync::Arc;

use chrono::{Duration, Utc};
use reyestr_config::DispatcherConfig;
use reyestr_domain::repositories::ClientRepository;
use reyestr_errors::DispatchResult;
use tracing::{debug, info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct LivenessConfig {
    pub inactivity_threshold_seconds: i64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            inactivity_threshold_seconds: 180,
        }
    }
}

impl From<&DispatcherConfig> for LivenessConfig {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            inactivity_threshold_seconds: config.inactivity_threshold_seconds as i64,
        }
    }
}

pub struct LivenessMonitor {
    client_repo: Arc<dyn ClientRepository>,
    config: LivenessConfig,
}

impl LivenessMonitor {
    pub fn new(client_repo: Arc<dyn ClientRepository>, config: LivenessConfig) -> Self {
        Self { client_repo, config }
    }

    #[instrument(skip(self))]
    pub async fn run_once(&self) -> DispatchResult<Vec<Uuid>> {
        let stale_before = Utc::now() - Duration::seconds(self.config.inactivity_threshold_seconds);
        let flipped = self.client_repo.mark_inactive_stale(stale_before).await?;

        if flipped.is_empty() {
            debug!("all workers within heartbeat threshold");
        } else {
            info!(count = flipped.len(), "marked silent workers inactive");
        }
        Ok(flipped)
    }
}
