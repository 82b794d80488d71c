//! Domain entities persisted in the relational store.
//!
//! Status enums are stored as VARCHAR and carry hand-rolled sqlx codecs so
//! the wire spelling stays under our control.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::search_params::SearchParams;

// ============================================================================
// Download client (worker)
// ============================================================================

/// A registered remote download worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadClient {
    pub id: Uuid,
    pub client_name: String,
    pub client_host: Option<String>,
    pub api_key: Option<String>,
    pub status: ClientStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub total_tasks_completed: i64,
    pub total_tasks_failed: i64,
    pub total_documents_downloaded: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ClientStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "inactive")]
    Inactive,
    #[serde(rename = "error")]
    Error,
}

impl ClientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientStatus::Active => "active",
            ClientStatus::Inactive => "inactive",
            ClientStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ClientStatus::Active),
            "inactive" => Some(ClientStatus::Inactive),
            "error" => Some(ClientStatus::Error),
            _ => None,
        }
    }
}

impl DownloadClient {
    pub fn new(client_name: String, client_host: Option<String>, api_key: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            client_name,
            client_host,
            api_key,
            status: ClientStatus::Active,
            last_heartbeat: now,
            total_tasks_completed: 0,
            total_tasks_failed: 0,
            total_documents_downloaded: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, ClientStatus::Active)
    }

    /// Seconds since the last heartbeat, relative to `now`.
    pub fn heartbeat_age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_heartbeat).num_seconds()
    }

    pub fn is_heartbeat_expired(&self, now: DateTime<Utc>, threshold_seconds: i64) -> bool {
        self.heartbeat_age_seconds(now) > threshold_seconds
    }
}

// ============================================================================
// Download task
// ============================================================================

/// A unit of download work: fetch up to `max_documents` documents starting
/// at `start_page` with the given search parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadTask {
    pub id: Uuid,
    pub search_params: SearchParams,
    pub start_page: i32,
    pub max_documents: i32,
    pub concurrent_connections: i32,
    pub client_id: Option<Uuid>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub documents_downloaded: i32,
    pub documents_failed: i32,
    pub documents_skipped: i32,
    pub error_message: Option<String>,
    pub result_summary: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

pub const DEFAULT_CONCURRENT_CONNECTIONS: i32 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "assigned")]
    Assigned,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "assigned" => Some(TaskStatus::Assigned),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// States in which a worker holds the task exclusively.
    pub fn is_held(&self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::InProgress)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DownloadTask {
    pub fn new(
        search_params: SearchParams,
        start_page: i32,
        max_documents: i32,
        concurrent_connections: Option<i32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            search_params,
            start_page,
            max_documents,
            concurrent_connections: concurrent_connections
                .unwrap_or(DEFAULT_CONCURRENT_CONNECTIONS),
            client_id: None,
            status: TaskStatus::Pending,
            created_at: now,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            documents_downloaded: 0,
            documents_failed: 0,
            documents_skipped: 0,
            error_message: None,
            result_summary: None,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_held_by(&self, client_id: Uuid) -> bool {
        self.status.is_held() && self.client_id == Some(client_id)
    }

    pub fn remaining_documents(&self) -> i32 {
        (self.max_documents
            - self.documents_downloaded
            - self.documents_failed
            - self.documents_skipped)
            .max(0)
    }
}

// ============================================================================
// Document
// ============================================================================

/// A registered artifact downloaded from the registry. `external_id` is the
/// upstream registry identifier; `system_id` is ours and never changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub system_id: Uuid,
    pub external_id: String,
    pub reg_number: Option<String>,
    pub url: Option<String>,
    pub decision_type: Option<String>,
    pub decision_date: Option<chrono::NaiveDate>,
    pub law_date: Option<chrono::NaiveDate>,
    pub case_type: Option<String>,
    pub case_number: Option<String>,
    pub court_name: Option<String>,
    pub judge_name: Option<String>,
    pub court_region: Option<String>,
    pub instance_type: Option<String>,
    pub classification_source: Option<ClassificationSource>,
    pub classification_date: Option<DateTime<Utc>>,
    pub client_id: Option<Uuid>,
    pub download_task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ClassificationSource {
    #[serde(rename = "search_params")]
    SearchParams,
    #[serde(rename = "extracted")]
    Extracted,
}

impl ClassificationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationSource::SearchParams => "search_params",
            ClassificationSource::Extracted => "extracted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "search_params" => Some(ClassificationSource::SearchParams),
            "extracted" => Some(ClassificationSource::Extracted),
            _ => None,
        }
    }
}

impl Document {
    pub fn is_classified(&self) -> bool {
        self.court_region.is_some() && self.instance_type.is_some()
    }

    /// Fill null fields of `self` from `incoming`, never overwriting a
    /// non-null stored scalar. Returns whether anything changed.
    pub fn merge_from(&mut self, incoming: &Document) -> bool {
        let mut changed = false;

        macro_rules! fill {
            ($field:ident) => {
                if self.$field.is_none() && incoming.$field.is_some() {
                    self.$field = incoming.$field.clone();
                    changed = true;
                }
            };
        }

        fill!(reg_number);
        fill!(url);
        fill!(decision_type);
        fill!(decision_date);
        fill!(law_date);
        fill!(case_type);
        fill!(case_number);
        fill!(court_name);
        fill!(judge_name);
        fill!(court_region);
        fill!(instance_type);
        fill!(client_id);
        fill!(download_task_id);

        if self.classification_source.is_none() && incoming.classification_source.is_some() {
            self.classification_source = incoming.classification_source;
            self.classification_date = incoming.classification_date;
            changed = true;
        }

        changed
    }
}

// ============================================================================
// Document download progress
// ============================================================================

/// One row per (task, document) pair tracking a single download attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentProgress {
    pub task_id: Uuid,
    pub document_id: String,
    pub reg_number: Option<String>,
    pub client_id: Option<Uuid>,
    pub status: ProgressStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProgressStatus {
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(ProgressStatus::InProgress),
            "completed" => Some(ProgressStatus::Completed),
            "failed" => Some(ProgressStatus::Failed),
            _ => None,
        }
    }
}

impl DocumentProgress {
    pub fn download_seconds(&self) -> Option<f64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds() as f64 / 1000.0)
    }
}

// ============================================================================
// SQLx codecs (Postgres, VARCHAR-backed enums)
// ============================================================================

macro_rules! varchar_codec {
    ($ty:ty) => {
        impl sqlx::Type<sqlx::Postgres> for $ty {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $ty {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                Self::parse(s).ok_or_else(|| format!("invalid status value: {s}").into())
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
            }
        }
    };
}

varchar_codec!(TaskStatus);
varchar_codec!(ClientStatus);
varchar_codec!(ProgressStatus);
varchar_codec!(ClassificationSource);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_roundtrip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Assigned,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("unknown"), None);
    }

    #[test]
    fn terminal_and_held_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());

        assert!(TaskStatus::Assigned.is_held());
        assert!(TaskStatus::InProgress.is_held());
        assert!(!TaskStatus::Pending.is_held());
        assert!(!TaskStatus::Completed.is_held());
    }

    #[test]
    fn new_task_defaults() {
        let task = DownloadTask::new(SearchParams::default(), 1, 100, None);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.concurrent_connections, DEFAULT_CONCURRENT_CONNECTIONS);
        assert!(task.client_id.is_none());
        assert_eq!(task.remaining_documents(), 100);
    }

    #[test]
    fn held_by_requires_holder_and_state() {
        let client_id = Uuid::new_v4();
        let mut task = DownloadTask::new(SearchParams::default(), 1, 10, None);
        assert!(!task.is_held_by(client_id));

        task.status = TaskStatus::Assigned;
        task.client_id = Some(client_id);
        assert!(task.is_held_by(client_id));
        assert!(!task.is_held_by(Uuid::new_v4()));

        task.status = TaskStatus::Completed;
        assert!(!task.is_held_by(client_id));
    }

    #[test]
    fn heartbeat_expiry() {
        let now = Utc::now();
        let mut client = DownloadClient::new("worker-1".to_string(), None, None);
        client.last_heartbeat = now - chrono::Duration::seconds(200);

        assert!(client.is_heartbeat_expired(now, 180));
        assert!(!client.is_heartbeat_expired(now, 300));
    }

    #[test]
    fn merge_preserves_stored_values() {
        let now = Utc::now();
        let mut stored = Document {
            system_id: Uuid::new_v4(),
            external_id: "101476997".to_string(),
            reg_number: Some("101476997".to_string()),
            url: None,
            decision_type: Some("Рішення".to_string()),
            decision_date: None,
            law_date: None,
            case_type: None,
            case_number: None,
            court_name: Some("Київський районний суд".to_string()),
            judge_name: None,
            court_region: None,
            instance_type: None,
            classification_source: None,
            classification_date: None,
            client_id: None,
            download_task_id: None,
            created_at: now,
            updated_at: now,
        };
        let incoming = Document {
            system_id: Uuid::new_v4(),
            url: Some("/Review/101476997".to_string()),
            decision_type: Some("Ухвала".to_string()),
            judge_name: Some("Шевченко О. О.".to_string()),
            ..stored.clone()
        };

        let changed = stored.merge_from(&incoming);
        assert!(changed);
        // null fields were filled
        assert_eq!(stored.url.as_deref(), Some("/Review/101476997"));
        assert_eq!(stored.judge_name.as_deref(), Some("Шевченко О. О."));
        // non-null scalar kept
        assert_eq!(stored.decision_type.as_deref(), Some("Рішення"));
    }

    #[test]
    fn merge_identical_is_noop() {
        let now = Utc::now();
        let mut stored = Document {
            system_id: Uuid::new_v4(),
            external_id: "101476997".to_string(),
            reg_number: Some("101476997".to_string()),
            url: Some("/Review/101476997".to_string()),
            decision_type: None,
            decision_date: None,
            law_date: None,
            case_type: None,
            case_number: None,
            court_name: None,
            judge_name: None,
            court_region: None,
            instance_type: None,
            classification_source: None,
            classification_date: None,
            client_id: None,
            download_task_id: None,
            created_at: now,
            updated_at: now,
        };
        let incoming = stored.clone();
        assert!(!stored.merge_from(&incoming));
    }

    #[test]
    fn progress_download_seconds() {
        let started = Utc::now();
        let progress = DocumentProgress {
            task_id: Uuid::new_v4(),
            document_id: "101476997".to_string(),
            reg_number: None,
            client_id: None,
            status: ProgressStatus::Completed,
            started_at: started,
            completed_at: Some(started + chrono::Duration::milliseconds(2500)),
        };
        assert_eq!(progress.download_seconds(), Some(2.5));

        let open = DocumentProgress {
            completed_at: None,
            status: ProgressStatus::InProgress,
            ..progress
        };
        assert_eq!(open.download_seconds(), None);
    }
}
