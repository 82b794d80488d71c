use std::time::Duration;

use async_trait::async_trait;
use reyestr_domain::entities::{DocumentProgress, ProgressStatus};
use reyestr_domain::repositories::{ProgressAggregates, ProgressRepository};
use reyestr_errors::{DispatchError, DispatchResult};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::database::with_deadline;

pub struct PostgresProgressRepository {
    pool: PgPool,
    deadline: Duration,
}

impl PostgresProgressRepository {
    pub fn new(pool: PgPool, deadline: Duration) -> Self {
        Self { pool, deadline }
    }

    fn row_to_progress(row: &sqlx::postgres::PgRow) -> DispatchResult<DocumentProgress> {
        Ok(DocumentProgress {
            task_id: row.try_get("task_id")?,
            document_id: row.try_get("document_id")?,
            reg_number: row.try_get("reg_number")?,
            client_id: row.try_get("client_id")?,
            status: row.try_get("status")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

#[async_trait]
impl ProgressRepository for PostgresProgressRepository {
    #[instrument(skip(self, progress), fields(task_id = %progress.task_id, document_id = %progress.document_id))]
    async fn open(&self, progress: &DocumentProgress) -> DispatchResult<()> {
        with_deadline(self.deadline, "progress open", async {
            sqlx::query(
                r#"
                INSERT INTO document_download_progress (
                    task_id, document_id, reg_number, client_id, status, started_at
                )
                VALUES ($1, $2, $3, $4, 'in_progress', NOW())
                ON CONFLICT (task_id, document_id)
                DO UPDATE SET started_at = EXCLUDED.started_at,
                              status = 'in_progress',
                              completed_at = NULL
                "#,
            )
            .bind(progress.task_id)
            .bind(&progress.document_id)
            .bind(&progress.reg_number)
            .bind(progress.client_id)
            .execute(&self.pool)
            .await
            .map_err(DispatchError::store)?;
            Ok(())
        })
        .await?;

        debug!(task_id = %progress.task_id, document_id = %progress.document_id,
               "download progress opened");
        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %task_id, document_id = %document_id))]
    async fn close(
        &self,
        task_id: Uuid,
        document_id: &str,
        status: ProgressStatus,
    ) -> DispatchResult<bool> {
        let result = with_deadline(self.deadline, "progress close", async {
            sqlx::query(
                r#"
                UPDATE document_download_progress
                SET status = $3, completed_at = NOW()
                WHERE task_id = $1 AND document_id = $2
                "#,
            )
            .bind(task_id)
            .bind(document_id)
            .bind(status)
            .execute(&self.pool)
            .await
            .map_err(DispatchError::store)
        })
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(task_id = %task_id, document_id = %document_id))]
    async fn get(
        &self,
        task_id: Uuid,
        document_id: &str,
    ) -> DispatchResult<Option<DocumentProgress>> {
        let row = with_deadline(self.deadline, "progress get", async {
            sqlx::query(
                r#"
                SELECT task_id, document_id, reg_number, client_id, status,
                       started_at, completed_at
                FROM document_download_progress
                WHERE task_id = $1 AND document_id = $2
                "#,
            )
            .bind(task_id)
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DispatchError::store)
        })
        .await?;

        row.as_ref().map(Self::row_to_progress).transpose()
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    async fn aggregates(&self, task_id: Uuid) -> DispatchResult<ProgressAggregates> {
        let totals = with_deadline(self.deadline, "progress aggregates", async {
            sqlx::query(
                r#"
                SELECT
                    COUNT(*) AS started_count,
                    COUNT(*) FILTER (WHERE status = 'completed') AS completed_count,
                    COUNT(*) FILTER (WHERE status = 'failed') AS failed_count,
                    AVG(EXTRACT(EPOCH FROM (completed_at - started_at)))::DOUBLE PRECISION
                        AS avg_download_time_seconds
                FROM document_download_progress
                WHERE task_id = $1
                "#,
            )
            .bind(task_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DispatchError::store)
        })
        .await?;

        let recent = with_deadline(self.deadline, "progress recent", async {
            sqlx::query(
                r#"
                SELECT EXTRACT(EPOCH FROM (completed_at - started_at))::DOUBLE PRECISION
                           AS download_time_seconds
                FROM document_download_progress
                WHERE task_id = $1 AND status = 'completed' AND completed_at IS NOT NULL
                ORDER BY completed_at DESC
                LIMIT 10
                "#,
            )
            .bind(task_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DispatchError::store)
        })
        .await?;

        let recent_download_seconds = recent
            .iter()
            .filter_map(|row| row.try_get::<Option<f64>, _>("download_time_seconds").ok())
            .flatten()
            .collect();

        Ok(ProgressAggregates {
            started_count: totals.try_get("started_count")?,
            completed_count: totals.try_get("completed_count")?,
            failed_count: totals.try_get("failed_count")?,
            avg_download_time_seconds: totals.try_get("avg_download_time_seconds")?,
            recent_download_seconds,
        })
    }
}
