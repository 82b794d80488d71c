use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use reyestr_domain::entities::ProgressStatus;
use reyestr_domain::SearchParams;
use serde_json::json;
use uuid::Uuid;

use crate::auth::{resolve_worker, Principal};
use crate::error::{ApiError, ApiResult};
use crate::routes::AppState;
use crate::types::{
    ClassificationResponse, DocumentRegisterRequest, DocumentRegisterResponse,
    DownloadCompleteRequest, DownloadStartRequest,
};

pub async fn register_document(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<DocumentRegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let client_id = resolve_worker(&state.auth, &principal, request.client_id)?;

    let search_params = request
        .search_params
        .map(SearchParams::from_value)
        .transpose()
        .map_err(|err| ApiError::Validation(format!("search_params: {err}")))?;

    let outcome = state
        .registrar
        .register(
            request.metadata,
            request.task_id,
            Some(client_id),
            search_params,
        )
        .await?;

    let classification = outcome
        .classified
        .then(|| ClassificationResponse::from(outcome.classification.clone()));

    Ok(Json(DocumentRegisterResponse {
        system_id: outcome.system_id,
        external_id: outcome.external_id,
        reg_number: outcome.reg_number,
        classified: outcome.classified,
        classification,
    }))
}

pub async fn get_document(
    State(state): State<AppState>,
    principal: Principal,
    Path(system_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    if principal == Principal::Anonymous {
        return Err(ApiError::Unauthorized);
    }
    let document = state.registrar.get_document(system_id).await?;
    Ok(Json(document))
}

/// Record the start of one document download; the response carries the
/// task's current throughput snapshot so workers can pace themselves.
pub async fn download_start(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<DownloadStartRequest>,
) -> ApiResult<impl IntoResponse> {
    let client_id = resolve_worker(&state.auth, &principal, request.client_id)?;

    state
        .registrar
        .open_progress(
            request.task_id,
            request.document_id,
            request.reg_number,
            Some(client_id),
        )
        .await?;

    let statistics = state
        .statistics
        .task_download_statistics(request.task_id)
        .await?;
    Ok(Json(json!({ "statistics": statistics })))
}

pub async fn download_complete(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<DownloadCompleteRequest>,
) -> ApiResult<impl IntoResponse> {
    resolve_worker(&state.auth, &principal, request.client_id)?;

    let status = match request.status.as_str() {
        "completed" => ProgressStatus::Completed,
        "failed" => ProgressStatus::Failed,
        other => {
            return Err(ApiError::Validation(format!(
                "status must be \"completed\" or \"failed\", got \"{other}\""
            )))
        }
    };

    state
        .registrar
        .close_progress(request.task_id, &request.document_id, status)
        .await?;

    Ok(Json(json!({})))
}
