//! Request and response bodies. Unknown fields in requests are ignored;
//! responses mirror the shapes the admin UI and workers already consume.

use chrono::{DateTime, Utc};
use reyestr_dispatcher::registrar::DocumentMetadata;
use reyestr_dispatcher::task_service::TaskListing;
use reyestr_domain::classification::Classification;
use reyestr_domain::entities::{DownloadClient, DownloadTask};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub search_params: serde_json::Value,
    pub start_page: i32,
    pub max_documents: i32,
    pub concurrent_connections: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    pub task_id: Uuid,
}

/// Body of worker-facing task calls. `client_id` is only honored when
/// authentication is disabled.
#[derive(Debug, Default, Deserialize)]
pub struct TaskRequestBody {
    pub client_id: Option<Uuid>,
}

/// Task descriptor handed to a worker on a successful claim.
#[derive(Debug, Serialize)]
pub struct TaskDescriptor {
    pub task_id: Uuid,
    pub search_params: serde_json::Value,
    pub start_page: i32,
    pub max_documents: i32,
    pub concurrent_connections: i32,
    pub status: String,
}

impl From<DownloadTask> for TaskDescriptor {
    fn from(task: DownloadTask) -> Self {
        Self {
            task_id: task.id,
            search_params: task.search_params.to_value(),
            start_page: task.start_page,
            max_documents: task.max_documents,
            concurrent_connections: task.concurrent_connections,
            status: task.status.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub task_id: Uuid,
    pub downloaded: i32,
    pub failed: i32,
    pub skipped: i32,
    pub client_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub task_id: Uuid,
    pub documents_downloaded: i32,
    pub documents_failed: i32,
    pub documents_skipped: i32,
    pub result_summary: Option<serde_json::Value>,
    pub client_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub task_id: Uuid,
    pub error_message: String,
    pub client_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub task_id: Uuid,
}

/// Full task state for the admin views.
#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: Uuid,
    pub status: String,
    pub search_params: serde_json::Value,
    pub start_page: i32,
    pub max_documents: i32,
    pub concurrent_connections: i32,
    pub client_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub documents_downloaded: i32,
    pub documents_failed: i32,
    pub documents_skipped: i32,
    pub error_message: Option<String>,
}

impl From<DownloadTask> for TaskStatusResponse {
    fn from(task: DownloadTask) -> Self {
        Self {
            task_id: task.id,
            status: task.status.to_string(),
            search_params: task.search_params.to_value(),
            start_page: task.start_page,
            max_documents: task.max_documents,
            concurrent_connections: task.concurrent_connections,
            client_id: task.client_id,
            created_at: task.created_at,
            assigned_at: task.assigned_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            documents_downloaded: task.documents_downloaded,
            documents_failed: task.documents_failed,
            documents_skipped: task.documents_skipped,
            error_message: task.error_message,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TasksQuery {
    pub status_filter: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TasksSummaryResponse {
    pub total_tasks: i64,
    pub pending: i64,
    pub assigned: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub tasks: Vec<TaskStatusResponse>,
}

impl From<TaskListing> for TasksSummaryResponse {
    fn from(listing: TaskListing) -> Self {
        Self {
            total_tasks: listing.counts.total(),
            pending: listing.counts.pending,
            assigned: listing.counts.assigned,
            in_progress: listing.counts.in_progress,
            completed: listing.counts.completed,
            failed: listing.counts.failed,
            cancelled: listing.counts.cancelled,
            tasks: listing
                .tasks
                .into_iter()
                .map(TaskStatusResponse::from)
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TasksByIndexQuery {
    pub court_region: String,
    pub instance_type: String,
    pub date_start: Option<DateTime<Utc>>,
    pub date_end: Option<DateTime<Utc>>,
}

// ============================================================================
// Clients
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ClientRegisterRequest {
    pub client_name: String,
    pub client_host: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClientRegisterResponse {
    pub client_id: Uuid,
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClientSummary {
    pub client_id: Uuid,
    pub client_name: String,
    pub client_host: Option<String>,
    pub status: String,
    pub last_heartbeat: DateTime<Utc>,
    pub total_tasks_completed: i64,
    pub total_documents_downloaded: i64,
    pub created_at: DateTime<Utc>,
}

impl From<DownloadClient> for ClientSummary {
    fn from(client: DownloadClient) -> Self {
        Self {
            client_id: client.id,
            client_name: client.client_name,
            client_host: client.client_host,
            status: client.status.as_str().to_string(),
            last_heartbeat: client.last_heartbeat,
            total_tasks_completed: client.total_tasks_completed,
            total_documents_downloaded: client.total_documents_downloaded,
            created_at: client.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClientsSummaryResponse {
    pub total_clients: usize,
    pub active_clients: usize,
    pub clients: Vec<ClientSummary>,
}

// ============================================================================
// Documents
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DocumentRegisterRequest {
    pub metadata: DocumentMetadata,
    pub task_id: Option<Uuid>,
    pub search_params: Option<serde_json::Value>,
    pub client_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct DocumentRegisterResponse {
    pub system_id: Uuid,
    pub external_id: String,
    pub reg_number: Option<String>,
    pub classified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationResponse>,
}

#[derive(Debug, Serialize)]
pub struct ClassificationResponse {
    pub court_region: Option<String>,
    pub instance_type: Option<String>,
    pub source: Option<String>,
}

impl From<Classification> for ClassificationResponse {
    fn from(classification: Classification) -> Self {
        Self {
            court_region: classification.court_region,
            instance_type: classification.instance_type,
            source: classification.source.map(|s| s.as_str().to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadStartRequest {
    pub task_id: Uuid,
    pub document_id: String,
    pub reg_number: Option<String>,
    pub client_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadCompleteRequest {
    pub task_id: Uuid,
    pub document_id: String,
    /// "completed" or "failed".
    pub status: String,
    pub client_id: Option<Uuid>,
}
