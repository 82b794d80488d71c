//! In-memory repository implementations for service tests.
//!
//! All four repositories share one store so cross-aggregate updates (task
//! completion crediting the client, registration crediting the client)
//! behave like the real transactional implementations. Claiming runs under
//! a single lock, which mirrors the store's atomic-claim guarantee.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use reyestr_domain::entities::{
    ClientStatus, Document, DocumentProgress, DownloadClient, DownloadTask, ProgressStatus,
    TaskStatus,
};
use reyestr_domain::repositories::{
    ClientDocumentStats, ClientRepository, ClientTaskStats, DocumentRegistration,
    DocumentRepository, ProgressAggregates, ProgressRepository, SessionStats, TaskCounters,
    TaskErrorEntry, TaskFilter, TaskIndexBucket, TaskRepository, TaskStatusCounts,
};
use reyestr_domain::SearchParams;
use reyestr_errors::DispatchResult;

#[derive(Default)]
pub struct InMemoryStore {
    // Lock order: tasks before clients, to keep cross-aggregate updates
    // deadlock-free.
    pub tasks: Mutex<HashMap<Uuid, DownloadTask>>,
    pub clients: Mutex<HashMap<Uuid, DownloadClient>>,
    pub documents: Mutex<HashMap<String, Document>>,
    pub progress: Mutex<HashMap<(Uuid, String), DocumentProgress>>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed_client(self: &Arc<Self>, client: DownloadClient) -> Uuid {
        let id = client.id;
        self.clients.lock().unwrap().insert(id, client);
        id
    }

    pub fn seed_task(self: &Arc<Self>, task: DownloadTask) -> Uuid {
        let id = task.id;
        self.tasks.lock().unwrap().insert(id, task);
        id
    }
}

pub fn test_client(name: &str) -> DownloadClient {
    DownloadClient::new(name.to_string(), Some("worker.local".to_string()), None)
}

pub fn test_task() -> DownloadTask {
    DownloadTask::new(SearchParams::default(), 1, 100, None)
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(Clone)]
pub struct MockTaskRepository {
    store: Arc<InMemoryStore>,
}

impl MockTaskRepository {
    pub fn new(store: Arc<InMemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TaskRepository for MockTaskRepository {
    async fn insert(&self, task: &DownloadTask) -> DispatchResult<()> {
        self.store
            .tasks
            .lock()
            .unwrap()
            .insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DispatchResult<Option<DownloadTask>> {
        Ok(self.store.tasks.lock().unwrap().get(&id).cloned())
    }

    async fn claim_pending(&self, client_id: Uuid) -> DispatchResult<Option<DownloadTask>> {
        let mut tasks = self.store.tasks.lock().unwrap();

        let candidate = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .min_by_key(|t| (t.created_at, t.id))
            .map(|t| t.id);

        match candidate {
            Some(id) => {
                let task = tasks.get_mut(&id).unwrap();
                task.status = TaskStatus::Assigned;
                task.client_id = Some(client_id);
                task.assigned_at = Some(Utc::now());
                task.updated_at = Utc::now();
                Ok(Some(task.clone()))
            }
            None => Ok(None),
        }
    }

    async fn try_report_progress(
        &self,
        task_id: Uuid,
        client_id: Uuid,
        counters: TaskCounters,
    ) -> DispatchResult<Option<DownloadTask>> {
        let mut tasks = self.store.tasks.lock().unwrap();
        let Some(task) = tasks.get_mut(&task_id) else {
            return Ok(None);
        };

        let current = TaskCounters {
            downloaded: task.documents_downloaded,
            failed: task.documents_failed,
            skipped: task.documents_skipped,
        };
        if !task.is_held_by(client_id) || counters.regresses_from(&current) {
            return Ok(None);
        }

        task.status = TaskStatus::InProgress;
        task.started_at.get_or_insert_with(Utc::now);
        task.documents_downloaded = counters.downloaded;
        task.documents_failed = counters.failed;
        task.documents_skipped = counters.skipped;
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn try_complete(
        &self,
        task_id: Uuid,
        client_id: Uuid,
        counters: TaskCounters,
        result_summary: Option<serde_json::Value>,
    ) -> DispatchResult<Option<DownloadTask>> {
        let mut tasks = self.store.tasks.lock().unwrap();
        let Some(task) = tasks.get_mut(&task_id) else {
            return Ok(None);
        };
        if !task.is_held_by(client_id) {
            return Ok(None);
        }

        task.status = TaskStatus::Completed;
        task.started_at.get_or_insert_with(Utc::now);
        task.completed_at = Some(Utc::now());
        task.documents_downloaded = counters.downloaded;
        task.documents_failed = counters.failed;
        task.documents_skipped = counters.skipped;
        task.result_summary = result_summary;
        task.updated_at = Utc::now();
        let updated = task.clone();

        let mut clients = self.store.clients.lock().unwrap();
        if let Some(client) = clients.get_mut(&client_id) {
            client.total_tasks_completed += 1;
            client.total_documents_downloaded += counters.downloaded as i64;
            client.updated_at = Utc::now();
        }

        Ok(Some(updated))
    }

    async fn try_fail(
        &self,
        task_id: Uuid,
        client_id: Uuid,
        error_message: &str,
    ) -> DispatchResult<Option<DownloadTask>> {
        let mut tasks = self.store.tasks.lock().unwrap();
        let Some(task) = tasks.get_mut(&task_id) else {
            return Ok(None);
        };
        if !task.is_held_by(client_id) {
            return Ok(None);
        }

        task.status = TaskStatus::Failed;
        task.started_at.get_or_insert_with(Utc::now);
        task.completed_at = Some(Utc::now());
        task.error_message = Some(error_message.to_string());
        task.updated_at = Utc::now();
        let updated = task.clone();

        let mut clients = self.store.clients.lock().unwrap();
        if let Some(client) = clients.get_mut(&client_id) {
            client.total_tasks_failed += 1;
            client.updated_at = Utc::now();
        }

        Ok(Some(updated))
    }

    async fn try_cancel(&self, task_id: Uuid) -> DispatchResult<Option<DownloadTask>> {
        let mut tasks = self.store.tasks.lock().unwrap();
        let Some(task) = tasks.get_mut(&task_id) else {
            return Ok(None);
        };
        if task.status.is_terminal() {
            return Ok(None);
        }

        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn reclaim_stalled(&self, stale_before: DateTime<Utc>) -> DispatchResult<Vec<Uuid>> {
        let mut tasks = self.store.tasks.lock().unwrap();
        let clients = self.store.clients.lock().unwrap();

        let mut reclaimed = Vec::new();
        for task in tasks.values_mut() {
            if !task.status.is_held() {
                continue;
            }
            let stale = task
                .client_id
                .and_then(|id| clients.get(&id))
                .map(|c| c.last_heartbeat < stale_before)
                .unwrap_or(false);
            if stale {
                task.status = TaskStatus::Pending;
                task.client_id = None;
                task.assigned_at = None;
                task.started_at = None;
                task.updated_at = Utc::now();
                reclaimed.push(task.id);
            }
        }
        Ok(reclaimed)
    }

    async fn list(&self, filter: &TaskFilter) -> DispatchResult<Vec<DownloadTask>> {
        let tasks = self.store.tasks.lock().unwrap();
        let mut matching: Vec<DownloadTask> = tasks
            .values()
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matching.truncate(limit as usize);
        }
        Ok(matching)
    }

    async fn status_counts(&self) -> DispatchResult<TaskStatusCounts> {
        let tasks = self.store.tasks.lock().unwrap();
        let mut counts = TaskStatusCounts::default();
        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Assigned => counts.assigned += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
            }
        }
        Ok(counts)
    }

    async fn indexes(&self) -> DispatchResult<Vec<TaskIndexBucket>> {
        let tasks = self.store.tasks.lock().unwrap();
        let mut buckets: HashMap<(String, String), TaskIndexBucket> = HashMap::new();

        for task in tasks.values() {
            let (Some(region), Some(instance)) = (
                task.search_params.court_region.clone(),
                task.search_params.instance_type.clone(),
            ) else {
                continue;
            };

            let bucket = buckets
                .entry((region.clone(), instance.clone()))
                .or_insert_with(|| TaskIndexBucket {
                    court_region: region,
                    instance_type: instance,
                    date_start: None,
                    date_end: None,
                    total_tasks: 0,
                    pending_tasks: 0,
                    assigned_tasks: 0,
                    in_progress_tasks: 0,
                    completed_tasks: 0,
                    failed_tasks: 0,
                });

            bucket.total_tasks += 1;
            match task.status {
                TaskStatus::Pending => bucket.pending_tasks += 1,
                TaskStatus::Assigned => bucket.assigned_tasks += 1,
                TaskStatus::InProgress => bucket.in_progress_tasks += 1,
                TaskStatus::Completed => bucket.completed_tasks += 1,
                TaskStatus::Failed => bucket.failed_tasks += 1,
                TaskStatus::Cancelled => {}
            }
            bucket.date_start = Some(
                bucket
                    .date_start
                    .map_or(task.created_at, |d| d.min(task.created_at)),
            );
            bucket.date_end = Some(
                bucket
                    .date_end
                    .map_or(task.created_at, |d| d.max(task.created_at)),
            );
        }

        let mut result: Vec<TaskIndexBucket> = buckets.into_values().collect();
        result.sort_by(|a, b| {
            (a.court_region.clone(), a.instance_type.clone())
                .cmp(&(b.court_region.clone(), b.instance_type.clone()))
        });
        Ok(result)
    }

    async fn list_by_index(
        &self,
        court_region: &str,
        instance_type: &str,
        date_start: Option<DateTime<Utc>>,
        date_end: Option<DateTime<Utc>>,
    ) -> DispatchResult<Vec<DownloadTask>> {
        let tasks = self.store.tasks.lock().unwrap();
        let mut matching: Vec<DownloadTask> = tasks
            .values()
            .filter(|t| {
                t.search_params.court_region.as_deref() == Some(court_region)
                    && t.search_params.instance_type.as_deref() == Some(instance_type)
                    && date_start.is_none_or(|start| t.created_at >= start)
                    && date_end.is_none_or(|end| t.created_at <= end)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn client_task_stats(&self, client_id: Uuid) -> DispatchResult<ClientTaskStats> {
        let tasks = self.store.tasks.lock().unwrap();
        let mut stats = ClientTaskStats::default();

        for task in tasks.values().filter(|t| t.client_id == Some(client_id)) {
            stats.total_tasks += 1;
            match task.status {
                TaskStatus::Pending => stats.pending_tasks += 1,
                TaskStatus::Assigned => stats.assigned_tasks += 1,
                TaskStatus::InProgress => stats.in_progress_tasks += 1,
                TaskStatus::Completed => {
                    stats.completed_tasks += 1;
                    stats.total_docs_from_tasks += task.documents_downloaded as i64;
                    stats.total_docs_failed += task.documents_failed as i64;
                    stats.total_docs_skipped += task.documents_skipped as i64;
                }
                TaskStatus::Failed => stats.failed_tasks += 1,
                TaskStatus::Cancelled => {}
            }
            stats.first_task_date = Some(
                stats
                    .first_task_date
                    .map_or(task.created_at, |d| d.min(task.created_at)),
            );
            if let Some(completed_at) = task.completed_at {
                stats.last_task_date = Some(
                    stats
                        .last_task_date
                        .map_or(completed_at, |d| d.max(completed_at)),
                );
            }
        }
        Ok(stats)
    }

    async fn current_task_for_client(
        &self,
        client_id: Uuid,
    ) -> DispatchResult<Option<DownloadTask>> {
        let tasks = self.store.tasks.lock().unwrap();
        Ok(tasks
            .values()
            .filter(|t| t.client_id == Some(client_id) && t.status.is_held())
            .max_by_key(|t| t.assigned_at)
            .cloned())
    }

    async fn session_stats(
        &self,
        client_id: Uuid,
        since: DateTime<Utc>,
    ) -> DispatchResult<SessionStats> {
        let tasks = self.store.tasks.lock().unwrap();
        let mut stats = SessionStats {
            tasks_completed: 0,
            documents_downloaded: 0,
            start_time: since,
        };
        for task in tasks.values().filter(|t| {
            t.client_id == Some(client_id) && t.started_at.is_some_and(|s| s >= since)
        }) {
            if task.status == TaskStatus::Completed {
                stats.tasks_completed += 1;
            }
            stats.documents_downloaded += task.documents_downloaded as i64;
        }
        Ok(stats)
    }

    async fn recent_errors(
        &self,
        client_id: Uuid,
        limit: i64,
    ) -> DispatchResult<Vec<TaskErrorEntry>> {
        let tasks = self.store.tasks.lock().unwrap();
        let mut errors: Vec<TaskErrorEntry> = tasks
            .values()
            .filter(|t| t.client_id == Some(client_id) && t.error_message.is_some())
            .map(|t| TaskErrorEntry {
                task_id: t.id,
                error_message: t.error_message.clone().unwrap_or_default(),
                timestamp: t.completed_at,
            })
            .collect();
        errors.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        errors.truncate(limit as usize);
        Ok(errors)
    }
}

// ============================================================================
// Clients
// ============================================================================

#[derive(Clone)]
pub struct MockClientRepository {
    store: Arc<InMemoryStore>,
}

impl MockClientRepository {
    pub fn new(store: Arc<InMemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ClientRepository for MockClientRepository {
    async fn insert(&self, client: &DownloadClient) -> DispatchResult<()> {
        self.store
            .clients
            .lock()
            .unwrap()
            .insert(client.id, client.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DispatchResult<Option<DownloadClient>> {
        Ok(self.store.clients.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_api_key(&self, api_key: &str) -> DispatchResult<Option<DownloadClient>> {
        let clients = self.store.clients.lock().unwrap();
        Ok(clients
            .values()
            .find(|c| c.api_key.as_deref() == Some(api_key))
            .cloned())
    }

    async fn find_registration(
        &self,
        client_name: &str,
        api_key: Option<&str>,
    ) -> DispatchResult<Option<DownloadClient>> {
        let clients = self.store.clients.lock().unwrap();
        Ok(clients
            .values()
            .find(|c| c.client_name == client_name && c.api_key.as_deref() == api_key)
            .cloned())
    }

    async fn list(&self) -> DispatchResult<Vec<DownloadClient>> {
        let clients = self.store.clients.lock().unwrap();
        let mut all: Vec<DownloadClient> = clients.values().cloned().collect();
        all.sort_by(|a, b| b.last_heartbeat.cmp(&a.last_heartbeat));
        Ok(all)
    }

    async fn heartbeat(&self, id: Uuid) -> DispatchResult<bool> {
        let mut clients = self.store.clients.lock().unwrap();
        match clients.get_mut(&id) {
            Some(client) => {
                client.last_heartbeat = client.last_heartbeat.max(Utc::now());
                client.status = ClientStatus::Active;
                client.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_inactive_stale(
        &self,
        stale_before: DateTime<Utc>,
    ) -> DispatchResult<Vec<Uuid>> {
        let mut clients = self.store.clients.lock().unwrap();
        let mut flipped = Vec::new();
        for client in clients.values_mut() {
            if client.status == ClientStatus::Active && client.last_heartbeat < stale_before {
                client.status = ClientStatus::Inactive;
                client.updated_at = Utc::now();
                flipped.push(client.id);
            }
        }
        Ok(flipped)
    }

    async fn mark_error(&self, id: Uuid) -> DispatchResult<bool> {
        let mut clients = self.store.clients.lock().unwrap();
        match clients.get_mut(&id) {
            Some(client) => {
                client.status = ClientStatus::Error;
                client.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ============================================================================
// Documents
// ============================================================================

#[derive(Clone)]
pub struct MockDocumentRepository {
    store: Arc<InMemoryStore>,
}

impl MockDocumentRepository {
    pub fn new(store: Arc<InMemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DocumentRepository for MockDocumentRepository {
    async fn register(
        &self,
        incoming: &Document,
        credit_client: Option<Uuid>,
    ) -> DispatchResult<DocumentRegistration> {
        let mut documents = self.store.documents.lock().unwrap();

        let (document, created, client_credited) = if documents.contains_key(&incoming.external_id)
        {
            let stored = documents.get_mut(&incoming.external_id).unwrap();
            let previous_client = stored.client_id;
            let changed = stored.merge_from(incoming);
            if changed {
                stored.updated_at = Utc::now();
            }
            let credited = credit_client.is_some() && credit_client != previous_client;
            (stored.clone(), false, credited)
        } else {
            documents.insert(incoming.external_id.clone(), incoming.clone());
            (incoming.clone(), true, credit_client.is_some())
        };
        drop(documents);

        if client_credited {
            if let Some(client_id) = credit_client {
                let mut clients = self.store.clients.lock().unwrap();
                if let Some(client) = clients.get_mut(&client_id) {
                    client.total_documents_downloaded += 1;
                    client.updated_at = Utc::now();
                }
            }
        }

        Ok(DocumentRegistration {
            document,
            created,
            client_credited,
        })
    }

    async fn get_by_system_id(&self, system_id: Uuid) -> DispatchResult<Option<Document>> {
        let documents = self.store.documents.lock().unwrap();
        Ok(documents
            .values()
            .find(|d| d.system_id == system_id)
            .cloned())
    }

    async fn get_by_external_id(&self, external_id: &str) -> DispatchResult<Option<Document>> {
        Ok(self.store.documents.lock().unwrap().get(external_id).cloned())
    }

    async fn client_document_stats(
        &self,
        client_id: Uuid,
    ) -> DispatchResult<ClientDocumentStats> {
        let documents = self.store.documents.lock().unwrap();
        let mut stats = ClientDocumentStats::default();
        let mut regions = std::collections::HashSet::new();
        let mut instances = std::collections::HashSet::new();
        let mut case_types = std::collections::HashSet::new();

        for doc in documents.values().filter(|d| d.client_id == Some(client_id)) {
            stats.total_documents += 1;
            if let Some(region) = &doc.court_region {
                regions.insert(region.clone());
            }
            if let Some(instance) = &doc.instance_type {
                instances.insert(instance.clone());
            }
            if let Some(case_type) = &doc.case_type {
                case_types.insert(case_type.clone());
            }
            if doc.classification_date.is_some() {
                stats.classified_documents += 1;
            }
            stats.first_document_date = Some(
                stats
                    .first_document_date
                    .map_or(doc.created_at, |d| d.min(doc.created_at)),
            );
            stats.last_document_date = Some(
                stats
                    .last_document_date
                    .map_or(doc.created_at, |d| d.max(doc.created_at)),
            );
        }
        stats.unique_regions = regions.len() as i64;
        stats.unique_instance_types = instances.len() as i64;
        stats.unique_case_types = case_types.len() as i64;
        Ok(stats)
    }
}

// ============================================================================
// Progress records
// ============================================================================

#[derive(Clone)]
pub struct MockProgressRepository {
    store: Arc<InMemoryStore>,
}

impl MockProgressRepository {
    pub fn new(store: Arc<InMemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProgressRepository for MockProgressRepository {
    async fn open(&self, progress: &DocumentProgress) -> DispatchResult<()> {
        let mut records = self.store.progress.lock().unwrap();
        let key = (progress.task_id, progress.document_id.clone());
        match records.entry(key) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                existing.started_at = progress.started_at;
                existing.status = ProgressStatus::InProgress;
                existing.completed_at = None;
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(progress.clone());
            }
        }
        Ok(())
    }

    async fn close(
        &self,
        task_id: Uuid,
        document_id: &str,
        status: ProgressStatus,
    ) -> DispatchResult<bool> {
        let mut records = self.store.progress.lock().unwrap();
        match records.get_mut(&(task_id, document_id.to_string())) {
            Some(record) => {
                record.status = status;
                record.completed_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(
        &self,
        task_id: Uuid,
        document_id: &str,
    ) -> DispatchResult<Option<DocumentProgress>> {
        let records = self.store.progress.lock().unwrap();
        Ok(records.get(&(task_id, document_id.to_string())).cloned())
    }

    async fn aggregates(&self, task_id: Uuid) -> DispatchResult<ProgressAggregates> {
        let records = self.store.progress.lock().unwrap();
        let mut aggregates = ProgressAggregates::default();
        let mut completed: Vec<&DocumentProgress> = Vec::new();

        for record in records.values().filter(|r| r.task_id == task_id) {
            aggregates.started_count += 1;
            match record.status {
                ProgressStatus::Completed => {
                    aggregates.completed_count += 1;
                    completed.push(record);
                }
                ProgressStatus::Failed => aggregates.failed_count += 1,
                ProgressStatus::InProgress => {}
            }
        }

        let durations: Vec<f64> = completed
            .iter()
            .filter_map(|r| r.download_seconds())
            .collect();
        if !durations.is_empty() {
            aggregates.avg_download_time_seconds =
                Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }

        completed.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        aggregates.recent_download_seconds = completed
            .iter()
            .take(10)
            .filter_map(|r| r.download_seconds())
            .collect();

        Ok(aggregates)
    }
}
