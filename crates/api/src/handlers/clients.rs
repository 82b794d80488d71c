use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use reyestr_domain::entities::{ClientStatus, DownloadClient};
use reyestr_domain::repositories::ClientRepository;
use reyestr_errors::DispatchError;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::auth::{generate_api_key, require_admin_or_self, resolve_worker, Principal};
use crate::error::{ApiError, ApiResult};
use crate::routes::AppState;
use crate::types::{
    ClientRegisterRequest, ClientRegisterResponse, ClientSummary, ClientsSummaryResponse,
    TaskRequestBody,
};
use crate::validation::validate_client_name;

/// Anonymous registration: a worker announcing the same name and key gets
/// its existing row back; otherwise a new row is created with a freshly
/// minted key when none was supplied.
pub async fn register_client(
    State(state): State<AppState>,
    Json(request): Json<ClientRegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_client_name(&request.client_name)
        .map_err(|_| ApiError::Validation("client_name must be 1-255 characters".to_string()))?;

    if let Some(existing) = state
        .client_repo
        .find_registration(&request.client_name, request.api_key.as_deref())
        .await?
    {
        state.client_repo.heartbeat(existing.id).await?;
        return Ok(Json(ClientRegisterResponse {
            client_id: existing.id,
            api_key: existing.api_key,
        }));
    }

    let api_key = request.api_key.clone().or_else(|| Some(generate_api_key()));
    let client = DownloadClient::new(
        request.client_name.trim().to_string(),
        request.client_host,
        api_key.clone(),
    );
    state.client_repo.insert(&client).await?;

    info!(client_id = %client.id, client_name = %client.client_name, "new worker registered");
    Ok(Json(ClientRegisterResponse {
        client_id: client.id,
        api_key,
    }))
}

pub async fn client_heartbeat(
    State(state): State<AppState>,
    principal: Principal,
    body: Option<Json<TaskRequestBody>>,
) -> ApiResult<impl IntoResponse> {
    let client_id = resolve_worker(
        &state.auth,
        &principal,
        body.and_then(|Json(b)| b.client_id),
    )?;

    if !state.client_repo.heartbeat(client_id).await? {
        return Err(DispatchError::client_not_found(client_id).into());
    }
    Ok(Json(json!({})))
}

pub async fn list_clients(
    State(state): State<AppState>,
    principal: Principal,
) -> ApiResult<impl IntoResponse> {
    principal.require_admin()?;

    let clients = state.client_repo.list().await?;
    let active_clients = clients
        .iter()
        .filter(|c| c.status == ClientStatus::Active)
        .count();

    Ok(Json(ClientsSummaryResponse {
        total_clients: clients.len(),
        active_clients,
        clients: clients.into_iter().map(ClientSummary::from).collect(),
    }))
}

pub async fn client_statistics(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    require_admin_or_self(&principal, id)?;
    let statistics = state.statistics.client_statistics(id).await?;
    Ok(Json(statistics))
}

/// Convenience self-statistics for the calling worker.
pub async fn my_statistics(
    State(state): State<AppState>,
    principal: Principal,
) -> ApiResult<impl IntoResponse> {
    let client_id = principal.worker_id().ok_or(ApiError::Unauthorized)?;
    let statistics = state.statistics.client_statistics(client_id).await?;
    Ok(Json(statistics))
}

pub async fn client_activity(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    principal.require_admin()?;
    let activity = state.statistics.client_activity(id).await?;
    Ok(Json(activity))
}
