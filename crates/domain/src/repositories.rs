//! Repository abstractions over the relational store.
//!
//! Every method is a single transaction (or one auto-committed statement)
//! against the store; services compose them without holding connections.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Document, DocumentProgress, DownloadClient, DownloadTask, ProgressStatus, TaskStatus};
use reyestr_errors::DispatchResult;

/// Monotonic per-task counters reported by workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounters {
    pub downloaded: i32,
    pub failed: i32,
    pub skipped: i32,
}

impl TaskCounters {
    pub fn regresses_from(&self, current: &TaskCounters) -> bool {
        self.downloaded < current.downloaded
            || self.failed < current.failed
            || self.skipped < current.skipped
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub limit: Option<i64>,
}

/// Per-status task totals for the dashboard summary.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskStatusCounts {
    pub pending: i64,
    pub assigned: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

impl TaskStatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.assigned + self.in_progress + self.completed + self.failed
            + self.cancelled
    }
}

/// One bucket of the (court region, instance type, date range) task map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskIndexBucket {
    pub court_region: String,
    pub instance_type: String,
    pub date_start: Option<DateTime<Utc>>,
    pub date_end: Option<DateTime<Utc>>,
    pub total_tasks: i64,
    pub pending_tasks: i64,
    pub assigned_tasks: i64,
    pub in_progress_tasks: i64,
    pub completed_tasks: i64,
    pub failed_tasks: i64,
}

/// Task aggregates for one client, bucketed by status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientTaskStats {
    pub total_tasks: i64,
    pub pending_tasks: i64,
    pub assigned_tasks: i64,
    pub in_progress_tasks: i64,
    pub completed_tasks: i64,
    pub failed_tasks: i64,
    pub total_docs_from_tasks: i64,
    pub total_docs_failed: i64,
    pub total_docs_skipped: i64,
    pub first_task_date: Option<DateTime<Utc>>,
    pub last_task_date: Option<DateTime<Utc>>,
}

/// Document aggregates for one client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientDocumentStats {
    pub total_documents: i64,
    pub unique_regions: i64,
    pub unique_instance_types: i64,
    pub unique_case_types: i64,
    pub classified_documents: i64,
    pub first_document_date: Option<DateTime<Utc>>,
    pub last_document_date: Option<DateTime<Utc>>,
}

/// Tasks completed and documents downloaded inside a recent window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionStats {
    pub tasks_completed: i64,
    pub documents_downloaded: i64,
    pub start_time: DateTime<Utc>,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            tasks_completed: 0,
            documents_downloaded: 0,
            start_time: Utc::now(),
        }
    }
}

/// A recent task error for the activity view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskErrorEntry {
    pub task_id: Uuid,
    pub error_message: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Aggregates over a task's document-progress records.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProgressAggregates {
    pub started_count: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub avg_download_time_seconds: Option<f64>,
    /// Durations of the most recently completed downloads, newest first,
    /// capped at ten entries. Feeds the throughput estimate.
    pub recent_download_seconds: Vec<f64>,
}

/// Outcome of registering a document.
#[derive(Debug, Clone)]
pub struct DocumentRegistration {
    pub document: Document,
    pub created: bool,
    /// Whether the registering client's document counter was incremented
    /// (new document, or first registration by this client).
    pub client_credited: bool,
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn insert(&self, task: &DownloadTask) -> DispatchResult<()>;

    async fn get(&self, id: Uuid) -> DispatchResult<Option<DownloadTask>>;

    /// Atomically claim the oldest pending task for `client_id`, moving it
    /// to `assigned`. Two concurrent callers never receive the same task.
    async fn claim_pending(&self, client_id: Uuid) -> DispatchResult<Option<DownloadTask>>;

    /// Conditionally apply a progress report: only when the task is held by
    /// `client_id` and the counters do not regress. Returns the updated row,
    /// or `None` when the condition did not match (the caller classifies).
    async fn try_report_progress(
        &self,
        task_id: Uuid,
        client_id: Uuid,
        counters: TaskCounters,
    ) -> DispatchResult<Option<DownloadTask>>;

    /// Conditionally complete a held task, writing final counters and
    /// crediting the client's lifetime counters in the same transaction.
    async fn try_complete(
        &self,
        task_id: Uuid,
        client_id: Uuid,
        counters: TaskCounters,
        result_summary: Option<serde_json::Value>,
    ) -> DispatchResult<Option<DownloadTask>>;

    /// Conditionally fail a held task, recording the error message and
    /// incrementing the client's failed-task counter.
    async fn try_fail(
        &self,
        task_id: Uuid,
        client_id: Uuid,
        error_message: &str,
    ) -> DispatchResult<Option<DownloadTask>>;

    /// Cancel from any non-terminal state. Returns the updated row or `None`
    /// when the task was already terminal (or absent).
    async fn try_cancel(&self, task_id: Uuid) -> DispatchResult<Option<DownloadTask>>;

    /// Return stalled held tasks (holder heartbeat older than `stale_before`)
    /// to `pending`, clearing the assignment. Returns the reclaimed ids.
    async fn reclaim_stalled(&self, stale_before: DateTime<Utc>) -> DispatchResult<Vec<Uuid>>;

    async fn list(&self, filter: &TaskFilter) -> DispatchResult<Vec<DownloadTask>>;

    async fn status_counts(&self) -> DispatchResult<TaskStatusCounts>;

    /// Group tasks by (CourtRegion, INSType) from their search parameters.
    async fn indexes(&self) -> DispatchResult<Vec<TaskIndexBucket>>;

    async fn list_by_index(
        &self,
        court_region: &str,
        instance_type: &str,
        date_start: Option<DateTime<Utc>>,
        date_end: Option<DateTime<Utc>>,
    ) -> DispatchResult<Vec<DownloadTask>>;

    async fn client_task_stats(&self, client_id: Uuid) -> DispatchResult<ClientTaskStats>;

    /// The client's currently held task, if any.
    async fn current_task_for_client(&self, client_id: Uuid)
        -> DispatchResult<Option<DownloadTask>>;

    async fn session_stats(
        &self,
        client_id: Uuid,
        since: DateTime<Utc>,
    ) -> DispatchResult<SessionStats>;

    async fn recent_errors(
        &self,
        client_id: Uuid,
        limit: i64,
    ) -> DispatchResult<Vec<TaskErrorEntry>>;
}

#[async_trait]
pub trait ClientRepository: Send + Sync {
    async fn insert(&self, client: &DownloadClient) -> DispatchResult<()>;

    async fn get(&self, id: Uuid) -> DispatchResult<Option<DownloadClient>>;

    async fn find_by_api_key(&self, api_key: &str) -> DispatchResult<Option<DownloadClient>>;

    /// Find the registration row matching this name and key pair. A `None`
    /// key only matches rows with no key.
    async fn find_registration(
        &self,
        client_name: &str,
        api_key: Option<&str>,
    ) -> DispatchResult<Option<DownloadClient>>;

    async fn list(&self) -> DispatchResult<Vec<DownloadClient>>;

    /// Refresh the heartbeat and force the status back to active. Returns
    /// whether the client exists.
    async fn heartbeat(&self, id: Uuid) -> DispatchResult<bool>;

    /// Flip clients whose heartbeat is older than `stale_before` to
    /// inactive. Returns the affected ids.
    async fn mark_inactive_stale(&self, stale_before: DateTime<Utc>) -> DispatchResult<Vec<Uuid>>;

    /// Record a fatal worker-reported failure.
    async fn mark_error(&self, id: Uuid) -> DispatchResult<bool>;
}

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Register or merge a document by external id in one transaction.
    /// `credit_client` receives a document-counter increment when the
    /// document is new for that client.
    async fn register(
        &self,
        incoming: &Document,
        credit_client: Option<Uuid>,
    ) -> DispatchResult<DocumentRegistration>;

    async fn get_by_system_id(&self, system_id: Uuid) -> DispatchResult<Option<Document>>;

    async fn get_by_external_id(&self, external_id: &str) -> DispatchResult<Option<Document>>;

    async fn client_document_stats(&self, client_id: Uuid)
        -> DispatchResult<ClientDocumentStats>;
}

#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Upsert a progress record into `in_progress`; unique on
    /// (task_id, document_id). Re-opening resets `started_at`.
    async fn open(&self, progress: &DocumentProgress) -> DispatchResult<()>;

    /// Close a record with its final status. Returns whether a record
    /// existed.
    async fn close(
        &self,
        task_id: Uuid,
        document_id: &str,
        status: ProgressStatus,
    ) -> DispatchResult<bool>;

    async fn get(
        &self,
        task_id: Uuid,
        document_id: &str,
    ) -> DispatchResult<Option<DocumentProgress>>;

    async fn aggregates(&self, task_id: Uuid) -> DispatchResult<ProgressAggregates>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_regression() {
        let current = TaskCounters {
            downloaded: 10,
            failed: 2,
            skipped: 1,
        };
        let same = current;
        let forward = TaskCounters {
            downloaded: 12,
            failed: 2,
            skipped: 1,
        };
        let backward = TaskCounters {
            downloaded: 9,
            failed: 2,
            skipped: 1,
        };
        let failed_backward = TaskCounters {
            downloaded: 10,
            failed: 1,
            skipped: 1,
        };

        assert!(!same.regresses_from(&current));
        assert!(!forward.regresses_from(&current));
        assert!(backward.regresses_from(&current));
        assert!(failed_backward.regresses_from(&current));
    }

    #[test]
    fn status_counts_total() {
        let counts = TaskStatusCounts {
            pending: 3,
            assigned: 1,
            in_progress: 2,
            completed: 10,
            failed: 1,
            cancelled: 1,
        };
        assert_eq!(counts.total(), 18);
    }
}
