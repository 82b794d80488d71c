//! Document registration and per-document progress records.
//!
//! Registration is idempotent on the external id: the first call mints the
//! system id, later calls only fill fields the store does not have yet.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reyestr_config::CacheConfig;
use reyestr_domain::classification::{classify, Classification};
use reyestr_domain::entities::{Document, DocumentProgress, ProgressStatus};
use reyestr_domain::repositories::{
    ClientRepository, DocumentRepository, ProgressRepository, TaskRepository,
};
use reyestr_domain::search_params::parse_registry_date;
use reyestr_domain::SearchParams;
use reyestr_errors::{DispatchError, DispatchResult};
use reyestr_infrastructure::cache::{self, keys, CacheService};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Metadata reported by a worker for one downloaded document. Dates arrive
/// in the registry's `DD.MM.YYYY` spelling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub external_id: Option<String>,
    pub reg_number: Option<String>,
    pub url: Option<String>,
    pub court_name: Option<String>,
    pub judge_name: Option<String>,
    pub decision_type: Option<String>,
    pub decision_date: Option<String>,
    pub law_date: Option<String>,
    pub case_type: Option<String>,
    pub case_number: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationOutcome {
    pub system_id: Uuid,
    pub external_id: String,
    pub reg_number: Option<String>,
    pub created: bool,
    pub classified: bool,
    pub classification: Classification,
}

pub struct RegistrarService {
    document_repo: Arc<dyn DocumentRepository>,
    task_repo: Arc<dyn TaskRepository>,
    client_repo: Arc<dyn ClientRepository>,
    progress_repo: Arc<dyn ProgressRepository>,
    cache: Arc<dyn CacheService>,
    ttl_documents: Duration,
}

impl RegistrarService {
    pub fn new(
        document_repo: Arc<dyn DocumentRepository>,
        task_repo: Arc<dyn TaskRepository>,
        client_repo: Arc<dyn ClientRepository>,
        progress_repo: Arc<dyn ProgressRepository>,
        cache: Arc<dyn CacheService>,
        cache_config: &CacheConfig,
    ) -> Self {
        Self {
            document_repo,
            task_repo,
            client_repo,
            progress_repo,
            cache,
            ttl_documents: Duration::from_secs(cache_config.ttl_documents_seconds),
        }
    }

    /// Register a document under its external id, classifying it and
    /// crediting the registering worker when the document is new for it.
    #[instrument(skip(self, metadata, search_params), fields(task_id = ?task_id, client_id = ?client_id))]
    pub async fn register(
        &self,
        metadata: DocumentMetadata,
        task_id: Option<Uuid>,
        client_id: Option<Uuid>,
        search_params: Option<SearchParams>,
    ) -> DispatchResult<RegistrationOutcome> {
        if let Some(client_id) = client_id {
            if !self.client_repo.heartbeat(client_id).await? {
                return Err(DispatchError::client_not_found(client_id));
            }
        }

        let external_id = external_id_for(&metadata);

        let classification = classify(metadata.court_name.as_deref(), search_params.as_ref());
        let classified = classification.is_complete();

        // A reference to a task that does not exist is dropped, not an
        // error: registration must survive reclamation races.
        let task_ref = match task_id {
            Some(id) => self.task_repo.get(id).await?.map(|t| t.id),
            None => None,
        };

        let now = Utc::now();
        let incoming = Document {
            system_id: Uuid::new_v4(),
            external_id: external_id.clone(),
            reg_number: metadata
                .reg_number
                .clone()
                .or_else(|| Some(external_id.clone())),
            url: metadata.url,
            decision_type: metadata.decision_type,
            decision_date: metadata.decision_date.as_deref().and_then(parse_registry_date),
            law_date: metadata.law_date.as_deref().and_then(parse_registry_date),
            case_type: metadata.case_type,
            case_number: metadata.case_number,
            court_name: metadata.court_name,
            judge_name: metadata.judge_name,
            court_region: classified.then(|| classification.court_region.clone()).flatten(),
            instance_type: classified.then(|| classification.instance_type.clone()).flatten(),
            classification_source: if classified { classification.source } else { None },
            classification_date: if classified { Some(now) } else { None },
            client_id,
            download_task_id: task_ref,
            created_at: now,
            updated_at: now,
        };

        let registration = self.document_repo.register(&incoming, client_id).await?;

        cache::invalidate(
            self.cache.as_ref(),
            &keys::document(registration.document.system_id),
        )
        .await;
        if registration.client_credited {
            if let Some(client_id) = client_id {
                cache::invalidate(self.cache.as_ref(), &keys::client_statistics(client_id)).await;
            }
        }

        info!(
            system_id = %registration.document.system_id,
            external_id = %external_id,
            created = registration.created,
            classified,
            "document registration processed"
        );

        Ok(RegistrationOutcome {
            system_id: registration.document.system_id,
            external_id,
            reg_number: registration.document.reg_number.clone(),
            created: registration.created,
            classified,
            classification,
        })
    }

    #[instrument(skip(self), fields(system_id = %system_id))]
    pub async fn get_document(&self, system_id: Uuid) -> DispatchResult<Document> {
        let key = keys::document(system_id);
        if let Some(document) = cache::read_json::<Document>(self.cache.as_ref(), &key).await {
            return Ok(document);
        }

        let document = self
            .document_repo
            .get_by_system_id(system_id)
            .await?
            .ok_or_else(|| DispatchError::DocumentNotFound {
                id: system_id.to_string(),
            })?;

        cache::write_json(self.cache.as_ref(), &key, &document, self.ttl_documents).await;
        Ok(document)
    }

    /// Open a progress record for one document download attempt.
    #[instrument(skip(self), fields(task_id = %task_id, document_id = %document_id))]
    pub async fn open_progress(
        &self,
        task_id: Uuid,
        document_id: String,
        reg_number: Option<String>,
        client_id: Option<Uuid>,
    ) -> DispatchResult<()> {
        if self.task_repo.get(task_id).await?.is_none() {
            return Err(DispatchError::TaskNotFound { id: task_id });
        }
        if let Some(client_id) = client_id {
            self.client_repo.heartbeat(client_id).await?;
        }

        let progress = DocumentProgress {
            task_id,
            document_id,
            reg_number,
            client_id,
            status: ProgressStatus::InProgress,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.progress_repo.open(&progress).await
    }

    /// Close a progress record. A missing record is logged, not fatal —
    /// throughput just loses one sample.
    #[instrument(skip(self), fields(task_id = %task_id, document_id = %document_id))]
    pub async fn close_progress(
        &self,
        task_id: Uuid,
        document_id: &str,
        status: ProgressStatus,
    ) -> DispatchResult<()> {
        let closed = self.progress_repo.close(task_id, document_id, status).await?;
        if closed {
            debug!(task_id = %task_id, document_id = %document_id, ?status, "progress closed");
        } else {
            warn!(task_id = %task_id, document_id = %document_id,
                  "no progress record to close");
        }
        Ok(())
    }
}

/// The external id is the registry id when given, the registration number
/// otherwise; documents arriving with neither get a synthetic id so the
/// registration still lands.
fn external_id_for(metadata: &DocumentMetadata) -> String {
    metadata
        .external_id
        .clone()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| {
            metadata
                .reg_number
                .clone()
                .filter(|s| !s.trim().is_empty())
        })
        .unwrap_or_else(|| {
            let suffix = Uuid::new_v4().simple().to_string();
            format!("temp_{}", &suffix[..12])
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_id_prefers_registry_id() {
        let metadata = DocumentMetadata {
            external_id: Some("101476997".to_string()),
            reg_number: Some("other".to_string()),
            ..Default::default()
        };
        assert_eq!(external_id_for(&metadata), "101476997");
    }

    #[test]
    fn external_id_falls_back_to_reg_number() {
        let metadata = DocumentMetadata {
            external_id: Some("  ".to_string()),
            reg_number: Some("101476997".to_string()),
            ..Default::default()
        };
        assert_eq!(external_id_for(&metadata), "101476997");
    }

    #[test]
    fn external_id_synthesizes_when_absent() {
        let metadata = DocumentMetadata::default();
        let id = external_id_for(&metadata);
        assert!(id.starts_with("temp_"));
        assert_eq!(id.len(), "temp_".len() + 12);

        // And a second call does not collide.
        assert_ne!(id, external_id_for(&metadata));
    }
}
