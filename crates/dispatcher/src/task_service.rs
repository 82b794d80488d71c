//! Task lifecycle operations.
//!
//! Every transition is a conditional update against the store; when the
//! update does not apply, the current row decides which conflict the caller
//! sees. Nothing here holds in-process state between requests.

use std::sync::Arc;
use std::time::Duration;

use reyestr_config::CacheConfig;
use reyestr_domain::entities::{DownloadTask, TaskStatus};
use reyestr_domain::repositories::{
    ClientRepository, TaskCounters, TaskFilter, TaskIndexBucket, TaskRepository, TaskStatusCounts,
};
use reyestr_domain::SearchParams;
use reyestr_errors::{DispatchError, DispatchResult};
use reyestr_infrastructure::cache::{self, keys, CacheService};
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Cached dashboard listing: per-status totals plus the matching tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListing {
    pub counts: TaskStatusCounts,
    pub tasks: Vec<DownloadTask>,
}

pub struct TaskService {
    task_repo: Arc<dyn TaskRepository>,
    client_repo: Arc<dyn ClientRepository>,
    cache: Arc<dyn CacheService>,
    ttl_tasks: Duration,
}

impl TaskService {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        client_repo: Arc<dyn ClientRepository>,
        cache: Arc<dyn CacheService>,
        cache_config: &CacheConfig,
    ) -> Self {
        Self {
            task_repo,
            client_repo,
            cache,
            ttl_tasks: Duration::from_secs(cache_config.ttl_tasks_seconds),
        }
    }

    #[instrument(skip(self, search_params))]
    pub async fn create(
        &self,
        search_params: SearchParams,
        start_page: i32,
        max_documents: i32,
        concurrent_connections: Option<i32>,
    ) -> DispatchResult<Uuid> {
        let task = DownloadTask::new(
            search_params,
            start_page,
            max_documents,
            concurrent_connections,
        );
        self.task_repo.insert(&task).await?;

        cache::invalidate_prefix(self.cache.as_ref(), keys::TASKS_PREFIX).await;
        Ok(task.id)
    }

    /// Claim one pending task for the calling worker. Returns `None` when
    /// the queue is empty; the loser of a claim race sees the same.
    #[instrument(skip(self), fields(client_id = %client_id))]
    pub async fn request(&self, client_id: Uuid) -> DispatchResult<Option<DownloadTask>> {
        self.touch_client(client_id).await?;

        let claimed = self.task_repo.claim_pending(client_id).await?;
        if let Some(task) = &claimed {
            cache::invalidate(self.cache.as_ref(), &keys::task(task.id)).await;
            cache::invalidate_prefix(self.cache.as_ref(), keys::TASKS_PREFIX).await;
        }
        Ok(claimed)
    }

    #[instrument(skip(self), fields(task_id = %task_id, client_id = %client_id))]
    pub async fn report_progress(
        &self,
        task_id: Uuid,
        client_id: Uuid,
        counters: TaskCounters,
    ) -> DispatchResult<DownloadTask> {
        self.touch_client(client_id).await?;

        match self
            .task_repo
            .try_report_progress(task_id, client_id, counters)
            .await?
        {
            Some(task) => {
                debug!(task_id = %task_id, downloaded = counters.downloaded, "progress recorded");
                cache::invalidate(self.cache.as_ref(), &keys::task(task_id)).await;
                cache::invalidate_prefix(self.cache.as_ref(), keys::TASKS_PREFIX).await;
                Ok(task)
            }
            None => Err(self
                .classify_rejection(task_id, client_id, Some(counters))
                .await?),
        }
    }

    #[instrument(skip(self, result_summary), fields(task_id = %task_id, client_id = %client_id))]
    pub async fn complete(
        &self,
        task_id: Uuid,
        client_id: Uuid,
        counters: TaskCounters,
        result_summary: Option<serde_json::Value>,
    ) -> DispatchResult<DownloadTask> {
        self.touch_client(client_id).await?;

        match self
            .task_repo
            .try_complete(task_id, client_id, counters, result_summary)
            .await?
        {
            Some(task) => {
                self.invalidate_after_transition(task_id, client_id).await;
                Ok(task)
            }
            None => Err(self.classify_rejection(task_id, client_id, None).await?),
        }
    }

    /// A worker-reported fatal failure: the task fails and the worker's
    /// liveness state moves to `error` until its next heartbeat.
    #[instrument(skip(self, error_message), fields(task_id = %task_id, client_id = %client_id))]
    pub async fn fail(
        &self,
        task_id: Uuid,
        client_id: Uuid,
        error_message: &str,
    ) -> DispatchResult<DownloadTask> {
        self.touch_client(client_id).await?;

        match self
            .task_repo
            .try_fail(task_id, client_id, error_message)
            .await?
        {
            Some(task) => {
                self.client_repo.mark_error(client_id).await?;
                self.invalidate_after_transition(task_id, client_id).await;
                Ok(task)
            }
            None => Err(self.classify_rejection(task_id, client_id, None).await?),
        }
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn cancel(&self, task_id: Uuid) -> DispatchResult<DownloadTask> {
        match self.task_repo.try_cancel(task_id).await? {
            Some(task) => {
                cache::invalidate(self.cache.as_ref(), &keys::task(task_id)).await;
                cache::invalidate_prefix(self.cache.as_ref(), keys::TASKS_PREFIX).await;
                Ok(task)
            }
            None => {
                let task = self
                    .task_repo
                    .get(task_id)
                    .await?
                    .ok_or(DispatchError::TaskNotFound { id: task_id })?;
                Err(DispatchError::TerminalState {
                    task_id,
                    status: task.status.to_string(),
                })
            }
        }
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn get_task(&self, task_id: Uuid) -> DispatchResult<DownloadTask> {
        let key = keys::task(task_id);
        if let Some(task) = cache::read_json::<DownloadTask>(self.cache.as_ref(), &key).await {
            return Ok(task);
        }

        let task = self
            .task_repo
            .get(task_id)
            .await?
            .ok_or(DispatchError::TaskNotFound { id: task_id })?;

        // Held tasks change quickly; cache them briefly.
        let ttl = if task.status.is_held() {
            Duration::from_secs(5)
        } else {
            self.ttl_tasks
        };
        cache::write_json(self.cache.as_ref(), &key, &task, ttl).await;
        Ok(task)
    }

    #[instrument(skip(self))]
    pub async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: i64,
    ) -> DispatchResult<TaskListing> {
        let key = keys::tasks_list(status.map(|s| s.as_str()), limit);
        if let Some(listing) = cache::read_json::<TaskListing>(self.cache.as_ref(), &key).await {
            return Ok(listing);
        }

        let filter = TaskFilter {
            status,
            limit: Some(limit),
        };
        let tasks = self.task_repo.list(&filter).await?;
        let counts = self.task_repo.status_counts().await?;

        let listing = TaskListing { counts, tasks };
        cache::write_json(self.cache.as_ref(), &key, &listing, self.ttl_tasks).await;
        Ok(listing)
    }

    pub async fn indexes(&self) -> DispatchResult<Vec<TaskIndexBucket>> {
        self.task_repo.indexes().await
    }

    pub async fn list_by_index(
        &self,
        court_region: &str,
        instance_type: &str,
        date_start: Option<DateTime<Utc>>,
        date_end: Option<DateTime<Utc>>,
    ) -> DispatchResult<Vec<DownloadTask>> {
        self.task_repo
            .list_by_index(court_region, instance_type, date_start, date_end)
            .await
    }

    /// Refresh the caller's heartbeat; every authenticated worker call
    /// counts as liveness.
    async fn touch_client(&self, client_id: Uuid) -> DispatchResult<()> {
        if self.client_repo.heartbeat(client_id).await? {
            Ok(())
        } else {
            Err(DispatchError::client_not_found(client_id))
        }
    }

    async fn invalidate_after_transition(&self, task_id: Uuid, client_id: Uuid) {
        cache::invalidate(self.cache.as_ref(), &keys::task(task_id)).await;
        cache::invalidate_prefix(self.cache.as_ref(), keys::TASKS_PREFIX).await;
        cache::invalidate(self.cache.as_ref(), &keys::client_statistics(client_id)).await;
    }

    /// Decide why a conditional transition did not apply. Runs after the
    /// fact, so it reads the row as some later committed state — good
    /// enough to pick the right error kind.
    async fn classify_rejection(
        &self,
        task_id: Uuid,
        client_id: Uuid,
        counters: Option<TaskCounters>,
    ) -> DispatchResult<DispatchError> {
        let Some(task) = self.task_repo.get(task_id).await? else {
            return Ok(DispatchError::TaskNotFound { id: task_id });
        };

        if task.status.is_terminal() {
            return Ok(DispatchError::TerminalState {
                task_id,
                status: task.status.to_string(),
            });
        }

        if !task.is_held_by(client_id) {
            return Ok(DispatchError::TaskNotHeld { task_id, client_id });
        }

        if let Some(counters) = counters {
            let current = TaskCounters {
                downloaded: task.documents_downloaded,
                failed: task.documents_failed,
                skipped: task.documents_skipped,
            };
            if counters.regresses_from(&current) {
                return Ok(DispatchError::InvalidProgress { task_id });
            }
        }

        Ok(DispatchError::internal(format!(
            "transition for task {task_id} did not apply"
        )))
    }
}

impl std::fmt::Debug for TaskService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskService").finish_non_exhaustive()
    }
}
