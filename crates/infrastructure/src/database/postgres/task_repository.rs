use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reyestr_domain::entities::{DownloadTask, TaskStatus};
use reyestr_domain::repositories::{
    ClientTaskStats, SessionStats, TaskCounters, TaskErrorEntry, TaskFilter, TaskIndexBucket,
    TaskRepository, TaskStatusCounts,
};
use reyestr_domain::SearchParams;
use reyestr_errors::{DispatchError, DispatchResult};
use sqlx::{PgPool, Row};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::database::with_deadline;

const TASK_COLUMNS: &str = "id, search_params, start_page, max_documents, concurrent_connections, \
     client_id, status, created_at, assigned_at, started_at, completed_at, \
     documents_downloaded, documents_failed, documents_skipped, error_message, result_summary, \
     updated_at";

pub struct PostgresTaskRepository {
    pool: PgPool,
    deadline: Duration,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool, deadline: Duration) -> Self {
        Self { pool, deadline }
    }

    fn row_to_task(row: &sqlx::postgres::PgRow) -> DispatchResult<DownloadTask> {
        let params_value: serde_json::Value = row.try_get("search_params")?;
        let search_params = SearchParams::from_value(params_value)?;

        Ok(DownloadTask {
            id: row.try_get("id")?,
            search_params,
            start_page: row.try_get("start_page")?,
            max_documents: row.try_get("max_documents")?,
            concurrent_connections: row.try_get("concurrent_connections")?,
            client_id: row.try_get("client_id")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            assigned_at: row.try_get("assigned_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            documents_downloaded: row.try_get("documents_downloaded")?,
            documents_failed: row.try_get("documents_failed")?,
            documents_skipped: row.try_get("documents_skipped")?,
            error_message: row.try_get("error_message")?,
            result_summary: row.try_get("result_summary")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn insert(&self, task: &DownloadTask) -> DispatchResult<()> {
        let params = task.search_params.to_value();

        with_deadline(self.deadline, "task insert", async {
            sqlx::query(
                r#"
                INSERT INTO download_tasks (
                    id, search_params, start_page, max_documents, concurrent_connections,
                    status, created_at, updated_at,
                    documents_downloaded, documents_failed, documents_skipped
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $7, 0, 0, 0)
                "#,
            )
            .bind(task.id)
            .bind(&params)
            .bind(task.start_page)
            .bind(task.max_documents)
            .bind(task.concurrent_connections)
            .bind(task.status)
            .bind(task.created_at)
            .execute(&self.pool)
            .await
            .map_err(DispatchError::store)?;
            Ok(())
        })
        .await?;

        info!(task_id = %task.id, start_page = task.start_page,
              max_documents = task.max_documents, "task created");
        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn get(&self, id: Uuid) -> DispatchResult<Option<DownloadTask>> {
        let query = format!("SELECT {TASK_COLUMNS} FROM download_tasks WHERE id = $1");
        let row = with_deadline(self.deadline, "task get", async {
            sqlx::query(&query)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DispatchError::store)
        })
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    /// One atomic statement: the inner select row-locks the oldest pending
    /// task, skipping rows another claimer already holds, so two concurrent
    /// requesters never receive the same task.
    #[instrument(skip(self), fields(client_id = %client_id))]
    async fn claim_pending(&self, client_id: Uuid) -> DispatchResult<Option<DownloadTask>> {
        let query = format!(
            r#"
            UPDATE download_tasks
            SET status = 'assigned', client_id = $1, assigned_at = NOW(), updated_at = NOW()
            WHERE id = (
                SELECT id FROM download_tasks
                WHERE status = 'pending'
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {TASK_COLUMNS}
            "#
        );

        let row = with_deadline(self.deadline, "task claim", async {
            sqlx::query(&query)
                .bind(client_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DispatchError::store)
        })
        .await?;

        match row {
            Some(row) => {
                let task = Self::row_to_task(&row)?;
                info!(task_id = %task.id, client_id = %client_id, "task claimed");
                Ok(Some(task))
            }
            None => {
                debug!(client_id = %client_id, "no pending task to claim");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self), fields(task_id = %task_id, client_id = %client_id))]
    async fn try_report_progress(
        &self,
        task_id: Uuid,
        client_id: Uuid,
        counters: TaskCounters,
    ) -> DispatchResult<Option<DownloadTask>> {
        let query = format!(
            r#"
            UPDATE download_tasks
            SET status = 'in_progress',
                started_at = COALESCE(started_at, NOW()),
                documents_downloaded = $3,
                documents_failed = $4,
                documents_skipped = $5,
                updated_at = NOW()
            WHERE id = $1 AND client_id = $2
              AND status IN ('assigned', 'in_progress')
              AND documents_downloaded <= $3
              AND documents_failed <= $4
              AND documents_skipped <= $5
            RETURNING {TASK_COLUMNS}
            "#
        );

        let row = with_deadline(self.deadline, "task progress", async {
            sqlx::query(&query)
                .bind(task_id)
                .bind(client_id)
                .bind(counters.downloaded)
                .bind(counters.failed)
                .bind(counters.skipped)
                .fetch_optional(&self.pool)
                .await
                .map_err(DispatchError::store)
        })
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    /// Task transition and client lifetime counters commit together, so a
    /// reader on a committed snapshot always sees a consistent pair.
    #[instrument(skip(self, result_summary), fields(task_id = %task_id, client_id = %client_id))]
    async fn try_complete(
        &self,
        task_id: Uuid,
        client_id: Uuid,
        counters: TaskCounters,
        result_summary: Option<serde_json::Value>,
    ) -> DispatchResult<Option<DownloadTask>> {
        let query = format!(
            r#"
            UPDATE download_tasks
            SET status = 'completed',
                started_at = COALESCE(started_at, NOW()),
                completed_at = NOW(),
                documents_downloaded = $3,
                documents_failed = $4,
                documents_skipped = $5,
                result_summary = $6,
                updated_at = NOW()
            WHERE id = $1 AND client_id = $2
              AND status IN ('assigned', 'in_progress')
            RETURNING {TASK_COLUMNS}
            "#
        );

        with_deadline(self.deadline, "task complete", async {
            let mut tx = self.pool.begin().await.map_err(DispatchError::store)?;

            let row = sqlx::query(&query)
                .bind(task_id)
                .bind(client_id)
                .bind(counters.downloaded)
                .bind(counters.failed)
                .bind(counters.skipped)
                .bind(&result_summary)
                .fetch_optional(&mut *tx)
                .await
                .map_err(DispatchError::store)?;

            let Some(row) = row else {
                tx.rollback().await.ok();
                return Ok(None);
            };
            let task = Self::row_to_task(&row)?;

            sqlx::query(
                r#"
                UPDATE download_clients
                SET total_tasks_completed = total_tasks_completed + 1,
                    total_documents_downloaded = total_documents_downloaded + $2,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(client_id)
            .bind(counters.downloaded as i64)
            .execute(&mut *tx)
            .await
            .map_err(DispatchError::store)?;

            tx.commit().await.map_err(DispatchError::store)?;

            info!(task_id = %task_id, downloaded = counters.downloaded,
                  failed = counters.failed, "task completed");
            Ok(Some(task))
        })
        .await
    }

    #[instrument(skip(self, error_message), fields(task_id = %task_id, client_id = %client_id))]
    async fn try_fail(
        &self,
        task_id: Uuid,
        client_id: Uuid,
        error_message: &str,
    ) -> DispatchResult<Option<DownloadTask>> {
        let query = format!(
            r#"
            UPDATE download_tasks
            SET status = 'failed',
                started_at = COALESCE(started_at, NOW()),
                completed_at = NOW(),
                error_message = $3,
                updated_at = NOW()
            WHERE id = $1 AND client_id = $2
              AND status IN ('assigned', 'in_progress')
            RETURNING {TASK_COLUMNS}
            "#
        );

        with_deadline(self.deadline, "task fail", async {
            let mut tx = self.pool.begin().await.map_err(DispatchError::store)?;

            let row = sqlx::query(&query)
                .bind(task_id)
                .bind(client_id)
                .bind(error_message)
                .fetch_optional(&mut *tx)
                .await
                .map_err(DispatchError::store)?;

            let Some(row) = row else {
                tx.rollback().await.ok();
                return Ok(None);
            };
            let task = Self::row_to_task(&row)?;

            sqlx::query(
                r#"
                UPDATE download_clients
                SET total_tasks_failed = total_tasks_failed + 1, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(client_id)
            .execute(&mut *tx)
            .await
            .map_err(DispatchError::store)?;

            tx.commit().await.map_err(DispatchError::store)?;

            warn!(task_id = %task_id, error = error_message, "task failed");
            Ok(Some(task))
        })
        .await
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    async fn try_cancel(&self, task_id: Uuid) -> DispatchResult<Option<DownloadTask>> {
        let query = format!(
            r#"
            UPDATE download_tasks
            SET status = 'cancelled', completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'assigned', 'in_progress')
            RETURNING {TASK_COLUMNS}
            "#
        );

        let row = with_deadline(self.deadline, "task cancel", async {
            sqlx::query(&query)
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DispatchError::store)
        })
        .await?;

        match row {
            Some(row) => {
                info!(task_id = %task_id, "task cancelled");
                Ok(Some(Self::row_to_task(&row)?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn reclaim_stalled(&self, stale_before: DateTime<Utc>) -> DispatchResult<Vec<Uuid>> {
        let rows = with_deadline(self.deadline, "task reclaim", async {
            sqlx::query(
                r#"
                UPDATE download_tasks
                SET status = 'pending', client_id = NULL, assigned_at = NULL,
                    started_at = NULL, updated_at = NOW()
                WHERE status IN ('assigned', 'in_progress')
                  AND client_id IN (
                      SELECT id FROM download_clients WHERE last_heartbeat < $1
                  )
                RETURNING id
                "#,
            )
            .bind(stale_before)
            .fetch_all(&self.pool)
            .await
            .map_err(DispatchError::store)
        })
        .await?;

        let ids: Vec<Uuid> = rows
            .iter()
            .map(|row| row.try_get("id"))
            .collect::<Result<_, _>>()
            .map_err(DispatchError::store)?;

        if !ids.is_empty() {
            warn!(count = ids.len(), "reclaimed stalled tasks");
        }
        Ok(ids)
    }

    #[instrument(skip(self, filter), fields(status = ?filter.status, limit = ?filter.limit))]
    async fn list(&self, filter: &TaskFilter) -> DispatchResult<Vec<DownloadTask>> {
        let limit = filter.limit.unwrap_or(100);

        let rows = with_deadline(self.deadline, "task list", async {
            match filter.status {
                Some(status) => {
                    let query = format!(
                        "SELECT {TASK_COLUMNS} FROM download_tasks WHERE status = $1 \
                         ORDER BY created_at DESC LIMIT $2"
                    );
                    sqlx::query(&query)
                        .bind(status)
                        .bind(limit)
                        .fetch_all(&self.pool)
                        .await
                }
                None => {
                    let query = format!(
                        "SELECT {TASK_COLUMNS} FROM download_tasks \
                         ORDER BY created_at DESC LIMIT $1"
                    );
                    sqlx::query(&query).bind(limit).fetch_all(&self.pool).await
                }
            }
            .map_err(DispatchError::store)
        })
        .await?;

        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self))]
    async fn status_counts(&self) -> DispatchResult<TaskStatusCounts> {
        let row = with_deadline(self.deadline, "task status counts", async {
            sqlx::query(
                r#"
                SELECT
                    COUNT(*) FILTER (WHERE status = 'pending')     AS pending,
                    COUNT(*) FILTER (WHERE status = 'assigned')    AS assigned,
                    COUNT(*) FILTER (WHERE status = 'in_progress') AS in_progress,
                    COUNT(*) FILTER (WHERE status = 'completed')   AS completed,
                    COUNT(*) FILTER (WHERE status = 'failed')      AS failed,
                    COUNT(*) FILTER (WHERE status = 'cancelled')   AS cancelled
                FROM download_tasks
                "#,
            )
            .fetch_one(&self.pool)
            .await
            .map_err(DispatchError::store)
        })
        .await?;

        Ok(TaskStatusCounts {
            pending: row.try_get("pending")?,
            assigned: row.try_get("assigned")?,
            in_progress: row.try_get("in_progress")?,
            completed: row.try_get("completed")?,
            failed: row.try_get("failed")?,
            cancelled: row.try_get("cancelled")?,
        })
    }

    #[instrument(skip(self))]
    async fn indexes(&self) -> DispatchResult<Vec<TaskIndexBucket>> {
        let rows = with_deadline(self.deadline, "task indexes", async {
            sqlx::query(
                r#"
                SELECT
                    search_params->>'CourtRegion' AS court_region,
                    search_params->>'INSType'     AS instance_type,
                    MIN(created_at) AS date_start,
                    MAX(created_at) AS date_end,
                    COUNT(*) AS total_tasks,
                    COUNT(*) FILTER (WHERE status = 'pending')     AS pending_tasks,
                    COUNT(*) FILTER (WHERE status = 'assigned')    AS assigned_tasks,
                    COUNT(*) FILTER (WHERE status = 'in_progress') AS in_progress_tasks,
                    COUNT(*) FILTER (WHERE status = 'completed')   AS completed_tasks,
                    COUNT(*) FILTER (WHERE status = 'failed')      AS failed_tasks
                FROM download_tasks
                WHERE search_params->>'CourtRegion' IS NOT NULL
                  AND search_params->>'INSType' IS NOT NULL
                GROUP BY 1, 2
                ORDER BY 1, 2
                "#,
            )
            .fetch_all(&self.pool)
            .await
            .map_err(DispatchError::store)
        })
        .await?;

        rows.iter()
            .map(|row| {
                Ok(TaskIndexBucket {
                    court_region: row.try_get("court_region")?,
                    instance_type: row.try_get("instance_type")?,
                    date_start: row.try_get("date_start")?,
                    date_end: row.try_get("date_end")?,
                    total_tasks: row.try_get("total_tasks")?,
                    pending_tasks: row.try_get("pending_tasks")?,
                    assigned_tasks: row.try_get("assigned_tasks")?,
                    in_progress_tasks: row.try_get("in_progress_tasks")?,
                    completed_tasks: row.try_get("completed_tasks")?,
                    failed_tasks: row.try_get("failed_tasks")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn list_by_index(
        &self,
        court_region: &str,
        instance_type: &str,
        date_start: Option<DateTime<Utc>>,
        date_end: Option<DateTime<Utc>>,
    ) -> DispatchResult<Vec<DownloadTask>> {
        let mut query = format!(
            "SELECT {TASK_COLUMNS} FROM download_tasks \
             WHERE search_params->>'CourtRegion' = $1 AND search_params->>'INSType' = $2"
        );
        let mut next_param = 3;
        if date_start.is_some() {
            query.push_str(&format!(" AND created_at >= ${next_param}"));
            next_param += 1;
        }
        if date_end.is_some() {
            query.push_str(&format!(" AND created_at <= ${next_param}"));
        }
        query.push_str(" ORDER BY created_at DESC");

        let rows = with_deadline(self.deadline, "tasks by index", async {
            let mut q = sqlx::query(&query).bind(court_region).bind(instance_type);
            if let Some(start) = date_start {
                q = q.bind(start);
            }
            if let Some(end) = date_end {
                q = q.bind(end);
            }
            q.fetch_all(&self.pool).await.map_err(DispatchError::store)
        })
        .await?;

        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self), fields(client_id = %client_id))]
    async fn client_task_stats(&self, client_id: Uuid) -> DispatchResult<ClientTaskStats> {
        let row = with_deadline(self.deadline, "client task stats", async {
            sqlx::query(
                r#"
                SELECT
                    COUNT(*) AS total_tasks,
                    COUNT(*) FILTER (WHERE status = 'pending')     AS pending_tasks,
                    COUNT(*) FILTER (WHERE status = 'assigned')    AS assigned_tasks,
                    COUNT(*) FILTER (WHERE status = 'in_progress') AS in_progress_tasks,
                    COUNT(*) FILTER (WHERE status = 'completed')   AS completed_tasks,
                    COUNT(*) FILTER (WHERE status = 'failed')      AS failed_tasks,
                    COALESCE(SUM(documents_downloaded) FILTER (WHERE status = 'completed'), 0)::BIGINT AS total_docs_from_tasks,
                    COALESCE(SUM(documents_failed) FILTER (WHERE status = 'completed'), 0)::BIGINT AS total_docs_failed,
                    COALESCE(SUM(documents_skipped) FILTER (WHERE status = 'completed'), 0)::BIGINT AS total_docs_skipped,
                    MIN(created_at) AS first_task_date,
                    MAX(completed_at) AS last_task_date
                FROM download_tasks
                WHERE client_id = $1
                "#,
            )
            .bind(client_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DispatchError::store)
        })
        .await?;

        Ok(ClientTaskStats {
            total_tasks: row.try_get("total_tasks")?,
            pending_tasks: row.try_get("pending_tasks")?,
            assigned_tasks: row.try_get("assigned_tasks")?,
            in_progress_tasks: row.try_get("in_progress_tasks")?,
            completed_tasks: row.try_get("completed_tasks")?,
            failed_tasks: row.try_get("failed_tasks")?,
            total_docs_from_tasks: row.try_get("total_docs_from_tasks")?,
            total_docs_failed: row.try_get("total_docs_failed")?,
            total_docs_skipped: row.try_get("total_docs_skipped")?,
            first_task_date: row.try_get("first_task_date")?,
            last_task_date: row.try_get("last_task_date")?,
        })
    }

    #[instrument(skip(self), fields(client_id = %client_id))]
    async fn current_task_for_client(
        &self,
        client_id: Uuid,
    ) -> DispatchResult<Option<DownloadTask>> {
        let query = format!(
            "SELECT {TASK_COLUMNS} FROM download_tasks \
             WHERE client_id = $1 AND status IN ('assigned', 'in_progress') \
             ORDER BY assigned_at DESC LIMIT 1"
        );

        let row = with_deadline(self.deadline, "current task", async {
            sqlx::query(&query)
                .bind(client_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DispatchError::store)
        })
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self), fields(client_id = %client_id))]
    async fn session_stats(
        &self,
        client_id: Uuid,
        since: DateTime<Utc>,
    ) -> DispatchResult<SessionStats> {
        let row = with_deadline(self.deadline, "session stats", async {
            sqlx::query(
                r#"
                SELECT
                    COUNT(*) FILTER (WHERE status = 'completed') AS tasks_completed,
                    COALESCE(SUM(documents_downloaded), 0)::BIGINT AS documents_downloaded
                FROM download_tasks
                WHERE client_id = $1 AND started_at >= $2
                "#,
            )
            .bind(client_id)
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(DispatchError::store)
        })
        .await?;

        Ok(SessionStats {
            tasks_completed: row.try_get("tasks_completed")?,
            documents_downloaded: row.try_get("documents_downloaded")?,
            start_time: since,
        })
    }

    #[instrument(skip(self), fields(client_id = %client_id))]
    async fn recent_errors(
        &self,
        client_id: Uuid,
        limit: i64,
    ) -> DispatchResult<Vec<TaskErrorEntry>> {
        let rows = with_deadline(self.deadline, "recent errors", async {
            sqlx::query(
                r#"
                SELECT id, error_message, completed_at
                FROM download_tasks
                WHERE client_id = $1 AND error_message IS NOT NULL
                ORDER BY completed_at DESC NULLS LAST
                LIMIT $2
                "#,
            )
            .bind(client_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DispatchError::store)
        })
        .await?;

        rows.iter()
            .map(|row| {
                Ok(TaskErrorEntry {
                    task_id: row.try_get("id")?,
                    error_message: row.try_get("error_message")?,
                    timestamp: row.try_get("completed_at")?,
                })
            })
            .collect()
    }
}
