use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reyestr_domain::entities::DownloadClient;
use reyestr_domain::repositories::ClientRepository;
use reyestr_errors::{DispatchError, DispatchResult};
use sqlx::{PgPool, Row};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::database::with_deadline;

const CLIENT_COLUMNS: &str = "id, client_name, client_host, api_key, status, last_heartbeat, \
     total_tasks_completed, total_tasks_failed, total_documents_downloaded, created_at, updated_at";

pub struct PostgresClientRepository {
    pool: PgPool,
    deadline: Duration,
}

impl PostgresClientRepository {
    pub fn new(pool: PgPool, deadline: Duration) -> Self {
        Self { pool, deadline }
    }

    fn row_to_client(row: &sqlx::postgres::PgRow) -> DispatchResult<DownloadClient> {
        Ok(DownloadClient {
            id: row.try_get("id")?,
            client_name: row.try_get("client_name")?,
            client_host: row.try_get("client_host")?,
            api_key: row.try_get("api_key")?,
            status: row.try_get("status")?,
            last_heartbeat: row.try_get("last_heartbeat")?,
            total_tasks_completed: row.try_get("total_tasks_completed")?,
            total_tasks_failed: row.try_get("total_tasks_failed")?,
            total_documents_downloaded: row.try_get("total_documents_downloaded")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ClientRepository for PostgresClientRepository {
    #[instrument(skip(self, client), fields(client_id = %client.id, client_name = %client.client_name))]
    async fn insert(&self, client: &DownloadClient) -> DispatchResult<()> {
        with_deadline(self.deadline, "client insert", async {
            sqlx::query(
                r#"
                INSERT INTO download_clients (
                    id, client_name, client_host, api_key, status, last_heartbeat,
                    total_tasks_completed, total_tasks_failed, total_documents_downloaded,
                    created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, 0, 0, 0, $7, $7)
                "#,
            )
            .bind(client.id)
            .bind(&client.client_name)
            .bind(&client.client_host)
            .bind(&client.api_key)
            .bind(client.status)
            .bind(client.last_heartbeat)
            .bind(client.created_at)
            .execute(&self.pool)
            .await
            .map_err(DispatchError::store)?;
            Ok(())
        })
        .await?;

        info!(client_id = %client.id, client_name = %client.client_name, "client registered");
        Ok(())
    }

    #[instrument(skip(self), fields(client_id = %id))]
    async fn get(&self, id: Uuid) -> DispatchResult<Option<DownloadClient>> {
        let query = format!("SELECT {CLIENT_COLUMNS} FROM download_clients WHERE id = $1");
        let row = with_deadline(self.deadline, "client get", async {
            sqlx::query(&query)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DispatchError::store)
        })
        .await?;

        row.as_ref().map(Self::row_to_client).transpose()
    }

    #[instrument(skip(self, api_key))]
    async fn find_by_api_key(&self, api_key: &str) -> DispatchResult<Option<DownloadClient>> {
        let query = format!("SELECT {CLIENT_COLUMNS} FROM download_clients WHERE api_key = $1");
        let row = with_deadline(self.deadline, "client by key", async {
            sqlx::query(&query)
                .bind(api_key)
                .fetch_optional(&self.pool)
                .await
                .map_err(DispatchError::store)
        })
        .await?;

        row.as_ref().map(Self::row_to_client).transpose()
    }

    #[instrument(skip(self, api_key), fields(client_name = %client_name))]
    async fn find_registration(
        &self,
        client_name: &str,
        api_key: Option<&str>,
    ) -> DispatchResult<Option<DownloadClient>> {
        let row = with_deadline(self.deadline, "client registration lookup", async {
            match api_key {
                Some(key) => {
                    let query = format!(
                        "SELECT {CLIENT_COLUMNS} FROM download_clients \
                         WHERE client_name = $1 AND api_key = $2"
                    );
                    sqlx::query(&query)
                        .bind(client_name)
                        .bind(key)
                        .fetch_optional(&self.pool)
                        .await
                }
                None => {
                    let query = format!(
                        "SELECT {CLIENT_COLUMNS} FROM download_clients \
                         WHERE client_name = $1 AND api_key IS NULL"
                    );
                    sqlx::query(&query)
                        .bind(client_name)
                        .fetch_optional(&self.pool)
                        .await
                }
            }
            .map_err(DispatchError::store)
        })
        .await?;

        row.as_ref().map(Self::row_to_client).transpose()
    }

    #[instrument(skip(self))]
    async fn list(&self) -> DispatchResult<Vec<DownloadClient>> {
        let query = format!(
            "SELECT {CLIENT_COLUMNS} FROM download_clients ORDER BY last_heartbeat DESC"
        );
        let rows = with_deadline(self.deadline, "client list", async {
            sqlx::query(&query)
                .fetch_all(&self.pool)
                .await
                .map_err(DispatchError::store)
        })
        .await?;

        rows.iter().map(Self::row_to_client).collect()
    }

    /// `GREATEST` keeps the heartbeat monotonic even if two updates race
    /// out of order.
    #[instrument(skip(self), fields(client_id = %id))]
    async fn heartbeat(&self, id: Uuid) -> DispatchResult<bool> {
        let result = with_deadline(self.deadline, "client heartbeat", async {
            sqlx::query(
                r#"
                UPDATE download_clients
                SET last_heartbeat = GREATEST(last_heartbeat, NOW()),
                    status = 'active',
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DispatchError::store)
        })
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn mark_inactive_stale(&self, stale_before: DateTime<Utc>) -> DispatchResult<Vec<Uuid>> {
        let rows = with_deadline(self.deadline, "client inactivity sweep", async {
            sqlx::query(
                r#"
                UPDATE download_clients
                SET status = 'inactive', updated_at = NOW()
                WHERE status = 'active' AND last_heartbeat < $1
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
            warn!(count = ids.len(), "marked stale clients inactive");
        }
        Ok(ids)
    }

    #[instrument(skip(self), fields(client_id = %id))]
    async fn mark_error(&self, id: Uuid) -> DispatchResult<bool> {
        let result = with_deadline(self.deadline, "client mark error", async {
            sqlx::query(
                "UPDATE download_clients SET status = 'error', updated_at = NOW() WHERE id = $1",
            )
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DispatchError::store)
        })
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
