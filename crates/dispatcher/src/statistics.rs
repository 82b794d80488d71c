//! Derived statistics: per-worker aggregates, live activity snapshots and
//! per-task throughput. Everything is recomputed from committed rows on
//! read, with short-TTL caching where dashboards poll.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reyestr_config::CacheConfig;
use reyestr_domain::entities::{ClientStatus, DownloadTask};
use reyestr_domain::repositories::{
    ClientDocumentStats, ClientRepository, ClientTaskStats, DocumentRepository, ProgressRepository,
    SessionStats, TaskErrorEntry, TaskRepository,
};
use reyestr_errors::{DispatchError, DispatchResult};
use reyestr_infrastructure::cache::{self, keys, CacheService};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

/// How far back the "session" window reaches.
const SESSION_WINDOW_HOURS: i64 = 24;
/// Bounded ring of recent errors in the activity view.
const RECENT_ERROR_LIMIT: i64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientStatistics {
    pub client_id: Uuid,
    pub client_name: String,
    pub client_host: Option<String>,
    pub status: ClientStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub total_tasks_completed: i64,
    pub total_tasks_failed: i64,
    pub total_documents_downloaded: i64,
    pub created_at: DateTime<Utc>,
    pub task_statistics: ClientTaskStats,
    pub document_statistics: ClientDocumentStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentTaskActivity {
    pub task_id: Uuid,
    pub status: String,
    pub start_page: i32,
    pub max_documents: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub documents_downloaded: i32,
    pub documents_failed: i32,
    pub speed_docs_per_minute: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LifetimeStats {
    pub total_tasks: i64,
    pub total_documents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientActivity {
    pub client_id: Uuid,
    pub current_task: Option<CurrentTaskActivity>,
    pub session_stats: SessionStats,
    pub lifetime_stats: LifetimeStats,
    pub errors: Vec<TaskErrorEntry>,
}

/// Throughput and ETA for one task, derived from its progress records.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDownloadStatistics {
    pub total_documents: i32,
    pub started_count: i64,
    pub completed_count: i32,
    pub failed_count: i32,
    pub skipped_count: i32,
    pub avg_download_time_seconds: Option<f64>,
    pub download_speed_docs_per_second: Option<f64>,
    pub estimated_time_remaining_seconds: Option<f64>,
}

pub struct StatisticsService {
    task_repo: Arc<dyn TaskRepository>,
    client_repo: Arc<dyn ClientRepository>,
    document_repo: Arc<dyn DocumentRepository>,
    progress_repo: Arc<dyn ProgressRepository>,
    cache: Arc<dyn CacheService>,
    ttl_statistics: Duration,
}

impl StatisticsService {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        client_repo: Arc<dyn ClientRepository>,
        document_repo: Arc<dyn DocumentRepository>,
        progress_repo: Arc<dyn ProgressRepository>,
        cache: Arc<dyn CacheService>,
        cache_config: &CacheConfig,
    ) -> Self {
        Self {
            task_repo,
            client_repo,
            document_repo,
            progress_repo,
            cache,
            ttl_statistics: Duration::from_secs(cache_config.ttl_statistics_seconds),
        }
    }

    #[instrument(skip(self), fields(client_id = %client_id))]
    pub async fn client_statistics(&self, client_id: Uuid) -> DispatchResult<ClientStatistics> {
        let key = keys::client_statistics(client_id);
        if let Some(stats) = cache::read_json::<ClientStatistics>(self.cache.as_ref(), &key).await
        {
            return Ok(stats);
        }

        let client = self
            .client_repo
            .get(client_id)
            .await?
            .ok_or(DispatchError::ClientNotFound { id: client_id })?;

        let task_statistics = self.task_repo.client_task_stats(client_id).await?;
        let document_statistics = self.document_repo.client_document_stats(client_id).await?;

        let stats = ClientStatistics {
            client_id: client.id,
            client_name: client.client_name,
            client_host: client.client_host,
            status: client.status,
            last_heartbeat: client.last_heartbeat,
            total_tasks_completed: client.total_tasks_completed,
            total_tasks_failed: client.total_tasks_failed,
            total_documents_downloaded: client.total_documents_downloaded,
            created_at: client.created_at,
            task_statistics,
            document_statistics,
        };

        cache::write_json(self.cache.as_ref(), &key, &stats, self.ttl_statistics).await;
        Ok(stats)
    }

    /// Live snapshot: the held task with a speed estimate, the 24-hour
    /// session window, lifetime counters and recent errors. Not cached —
    /// the admin view polls this for freshness.
    #[instrument(skip(self), fields(client_id = %client_id))]
    pub async fn client_activity(&self, client_id: Uuid) -> DispatchResult<ClientActivity> {
        let client = self
            .client_repo
            .get(client_id)
            .await?
            .ok_or(DispatchError::ClientNotFound { id: client_id })?;

        let now = Utc::now();
        let current_task = self
            .task_repo
            .current_task_for_client(client_id)
            .await?
            .map(|task| current_task_activity(&task, now));

        let session_start = now - chrono::Duration::hours(SESSION_WINDOW_HOURS);
        let session_stats = self.task_repo.session_stats(client_id, session_start).await?;

        let errors = self
            .task_repo
            .recent_errors(client_id, RECENT_ERROR_LIMIT)
            .await?;

        Ok(ClientActivity {
            client_id,
            current_task,
            session_stats,
            lifetime_stats: LifetimeStats {
                total_tasks: client.total_tasks_completed,
                total_documents: client.total_documents_downloaded,
            },
            errors,
        })
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn task_download_statistics(
        &self,
        task_id: Uuid,
    ) -> DispatchResult<TaskDownloadStatistics> {
        let task = self
            .task_repo
            .get(task_id)
            .await?
            .ok_or(DispatchError::TaskNotFound { id: task_id })?;

        let aggregates = self.progress_repo.aggregates(task_id).await?;

        let speed = throughput_docs_per_second(&aggregates.recent_download_seconds);
        let eta = estimated_seconds_remaining(task.remaining_documents(), speed);

        Ok(TaskDownloadStatistics {
            total_documents: task.max_documents,
            started_count: aggregates.started_count,
            completed_count: task.documents_downloaded,
            failed_count: task.documents_failed,
            skipped_count: task.documents_skipped,
            avg_download_time_seconds: aggregates.avg_download_time_seconds,
            download_speed_docs_per_second: speed,
            estimated_time_remaining_seconds: eta,
        })
    }
}

fn current_task_activity(task: &DownloadTask, now: DateTime<Utc>) -> CurrentTaskActivity {
    let speed = match task.started_at {
        Some(started_at) => {
            let elapsed_minutes = (now - started_at).num_seconds() as f64 / 60.0;
            if elapsed_minutes > 0.0 {
                task.documents_downloaded as f64 / elapsed_minutes
            } else {
                0.0
            }
        }
        None => 0.0,
    };

    CurrentTaskActivity {
        task_id: task.id,
        status: task.status.to_string(),
        start_page: task.start_page,
        max_documents: task.max_documents,
        started_at: task.started_at,
        documents_downloaded: task.documents_downloaded,
        documents_failed: task.documents_failed,
        speed_docs_per_minute: speed,
    }
}

/// Throughput from the most recent completed downloads: undefined until at
/// least one document has completed.
pub fn throughput_docs_per_second(recent_download_seconds: &[f64]) -> Option<f64> {
    if recent_download_seconds.is_empty() {
        return None;
    }
    let avg = recent_download_seconds.iter().sum::<f64>() / recent_download_seconds.len() as f64;
    if avg > 0.0 {
        Some(1.0 / avg)
    } else {
        None
    }
}

pub fn estimated_seconds_remaining(remaining_documents: i32, speed: Option<f64>) -> Option<f64> {
    match speed {
        Some(speed) if speed > 0.0 && remaining_documents > 0 => {
            Some(remaining_documents as f64 / speed)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reyestr_domain::entities::TaskStatus;
    use reyestr_domain::SearchParams;

    #[test]
    fn throughput_undefined_without_samples() {
        assert_eq!(throughput_docs_per_second(&[]), None);
    }

    #[test]
    fn throughput_is_inverse_of_average() {
        let samples = [2.0, 4.0];
        assert_eq!(throughput_docs_per_second(&samples), Some(1.0 / 3.0));
    }

    #[test]
    fn throughput_guards_against_zero_durations() {
        assert_eq!(throughput_docs_per_second(&[0.0, 0.0]), None);
    }

    #[test]
    fn eta_requires_speed_and_remaining_work() {
        assert_eq!(estimated_seconds_remaining(10, Some(0.5)), Some(20.0));
        assert_eq!(estimated_seconds_remaining(0, Some(0.5)), None);
        assert_eq!(estimated_seconds_remaining(10, None), None);
    }

    #[test]
    fn activity_speed_from_elapsed_time() {
        let now = Utc::now();
        let mut task = DownloadTask::new(SearchParams::default(), 1, 100, None);
        task.status = TaskStatus::InProgress;
        task.started_at = Some(now - chrono::Duration::minutes(10));
        task.documents_downloaded = 40;

        let activity = current_task_activity(&task, now);
        assert!((activity.speed_docs_per_minute - 4.0).abs() < 0.05);
    }

    #[test]
    fn activity_speed_zero_before_start() {
        let now = Utc::now();
        let task = DownloadTask::new(SearchParams::default(), 1, 100, None);
        let activity = current_task_activity(&task, now);
        assert_eq!(activity.speed_docs_per_minute, 0.0);
    }
}
