use std::time::Duration;

use async_trait::async_trait;
use reyestr_domain::entities::Document;
use reyestr_domain::repositories::{ClientDocumentStats, DocumentRegistration, DocumentRepository};
use reyestr_errors::{DispatchError, DispatchResult};
use sqlx::{PgPool, Row};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::database::with_deadline;

const DOCUMENT_COLUMNS: &str = "system_id, external_id, reg_number, url, decision_type, \
     decision_date, law_date, case_type, case_number, court_name, judge_name, \
     court_region, instance_type, classification_source, classification_date, \
     client_id, download_task_id, created_at, updated_at";

pub struct PostgresDocumentRepository {
    pool: PgPool,
    deadline: Duration,
}

impl PostgresDocumentRepository {
    pub fn new(pool: PgPool, deadline: Duration) -> Self {
        Self { pool, deadline }
    }

    fn row_to_document(row: &sqlx::postgres::PgRow) -> DispatchResult<Document> {
        Ok(Document {
            system_id: row.try_get("system_id")?,
            external_id: row.try_get("external_id")?,
            reg_number: row.try_get("reg_number")?,
            url: row.try_get("url")?,
            decision_type: row.try_get("decision_type")?,
            decision_date: row.try_get("decision_date")?,
            law_date: row.try_get("law_date")?,
            case_type: row.try_get("case_type")?,
            case_number: row.try_get("case_number")?,
            court_name: row.try_get("court_name")?,
            judge_name: row.try_get("judge_name")?,
            court_region: row.try_get("court_region")?,
            instance_type: row.try_get("instance_type")?,
            classification_source: row.try_get("classification_source")?,
            classification_date: row.try_get("classification_date")?,
            client_id: row.try_get("client_id")?,
            download_task_id: row.try_get("download_task_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl DocumentRepository for PostgresDocumentRepository {
    /// Lookup, merge and client crediting run in one transaction; the
    /// row lock on the external id serializes concurrent registrations of
    /// the same document.
    #[instrument(skip(self, incoming), fields(external_id = %incoming.external_id))]
    async fn register(
        &self,
        incoming: &Document,
        credit_client: Option<Uuid>,
    ) -> DispatchResult<DocumentRegistration> {
        let select = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE external_id = $1 FOR UPDATE"
        );

        with_deadline(self.deadline, "document register", async {
            let mut tx = self.pool.begin().await.map_err(DispatchError::store)?;

            let existing = sqlx::query(&select)
                .bind(&incoming.external_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(DispatchError::store)?;

            let (document, created, client_credited) = match existing {
                None => {
                    sqlx::query(
                        r#"
                        INSERT INTO documents (
                            system_id, external_id, reg_number, url, decision_type,
                            decision_date, law_date, case_type, case_number, court_name,
                            judge_name, court_region, instance_type, classification_source,
                            classification_date, client_id, download_task_id,
                            created_at, updated_at
                        )
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                                $14, $15, $16, $17, $18, $18)
                        "#,
                    )
                    .bind(incoming.system_id)
                    .bind(&incoming.external_id)
                    .bind(&incoming.reg_number)
                    .bind(&incoming.url)
                    .bind(&incoming.decision_type)
                    .bind(incoming.decision_date)
                    .bind(incoming.law_date)
                    .bind(&incoming.case_type)
                    .bind(&incoming.case_number)
                    .bind(&incoming.court_name)
                    .bind(&incoming.judge_name)
                    .bind(&incoming.court_region)
                    .bind(&incoming.instance_type)
                    .bind(incoming.classification_source)
                    .bind(incoming.classification_date)
                    .bind(incoming.client_id)
                    .bind(incoming.download_task_id)
                    .bind(incoming.created_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(DispatchError::store)?;

                    (incoming.clone(), true, credit_client.is_some())
                }
                Some(row) => {
                    let mut stored = Self::row_to_document(&row)?;
                    let previous_client = stored.client_id;
                    let changed = stored.merge_from(incoming);

                    if changed {
                        sqlx::query(
                            r#"
                            UPDATE documents
                            SET reg_number = $2, url = $3, decision_type = $4,
                                decision_date = $5, law_date = $6, case_type = $7,
                                case_number = $8, court_name = $9, judge_name = $10,
                                court_region = $11, instance_type = $12,
                                classification_source = $13, classification_date = $14,
                                client_id = $15, download_task_id = $16,
                                updated_at = NOW()
                            WHERE system_id = $1
                            "#,
                        )
                        .bind(stored.system_id)
                        .bind(&stored.reg_number)
                        .bind(&stored.url)
                        .bind(&stored.decision_type)
                        .bind(stored.decision_date)
                        .bind(stored.law_date)
                        .bind(&stored.case_type)
                        .bind(&stored.case_number)
                        .bind(&stored.court_name)
                        .bind(&stored.judge_name)
                        .bind(&stored.court_region)
                        .bind(&stored.instance_type)
                        .bind(stored.classification_source)
                        .bind(stored.classification_date)
                        .bind(stored.client_id)
                        .bind(stored.download_task_id)
                        .execute(&mut *tx)
                        .await
                        .map_err(DispatchError::store)?;
                    } else {
                        debug!(external_id = %incoming.external_id,
                               "repeat registration, no fields to fill");
                    }

                    let credited = credit_client.is_some() && credit_client != previous_client;
                    (stored, false, credited)
                }
            };

            if client_credited {
                if let Some(client_id) = credit_client {
                    sqlx::query(
                        r#"
                        UPDATE download_clients
                        SET total_documents_downloaded = total_documents_downloaded + 1,
                            updated_at = NOW()
                        WHERE id = $1
                        "#,
                    )
                    .bind(client_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(DispatchError::store)?;
                }
            }

            tx.commit().await.map_err(DispatchError::store)?;

            if created {
                info!(system_id = %document.system_id, external_id = %document.external_id,
                      "document registered");
            }

            Ok(DocumentRegistration {
                document,
                created,
                client_credited,
            })
        })
        .await
    }

    #[instrument(skip(self), fields(system_id = %system_id))]
    async fn get_by_system_id(&self, system_id: Uuid) -> DispatchResult<Option<Document>> {
        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE system_id = $1");
        let row = with_deadline(self.deadline, "document by system id", async {
            sqlx::query(&query)
                .bind(system_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DispatchError::store)
        })
        .await?;

        row.as_ref().map(Self::row_to_document).transpose()
    }

    #[instrument(skip(self), fields(external_id = %external_id))]
    async fn get_by_external_id(&self, external_id: &str) -> DispatchResult<Option<Document>> {
        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE external_id = $1");
        let row = with_deadline(self.deadline, "document by external id", async {
            sqlx::query(&query)
                .bind(external_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DispatchError::store)
        })
        .await?;

        row.as_ref().map(Self::row_to_document).transpose()
    }

    #[instrument(skip(self), fields(client_id = %client_id))]
    async fn client_document_stats(
        &self,
        client_id: Uuid,
    ) -> DispatchResult<ClientDocumentStats> {
        let row = with_deadline(self.deadline, "client document stats", async {
            sqlx::query(
                r#"
                SELECT
                    COUNT(*) AS total_documents,
                    COUNT(DISTINCT court_region) AS unique_regions,
                    COUNT(DISTINCT instance_type) AS unique_instance_types,
                    COUNT(DISTINCT case_type) AS unique_case_types,
                    COUNT(*) FILTER (WHERE classification_date IS NOT NULL) AS classified_documents,
                    MIN(created_at) AS first_document_date,
                    MAX(created_at) AS last_document_date
                FROM documents
                WHERE client_id = $1
                "#,
            )
            .bind(client_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DispatchError::store)
        })
        .await?;

        Ok(ClientDocumentStats {
            total_documents: row.try_get("total_documents")?,
            unique_regions: row.try_get("unique_regions")?,
            unique_instance_types: row.try_get("unique_instance_types")?,
            unique_case_types: row.try_get("unique_case_types")?,
            classified_documents: row.try_get("classified_documents")?,
            first_document_date: row.try_get("first_document_date")?,
            last_document_date: row.try_get("last_document_date")?,
        })
    }
}
