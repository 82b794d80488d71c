use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use reyestr_domain::repositories::TaskCounters;
use serde_json::json;
use uuid::Uuid;

use crate::auth::{resolve_worker, Principal};
use crate::error::{ApiError, ApiResult};
use crate::routes::AppState;
use crate::types::{
    CancelRequest, CompleteRequest, CreateTaskRequest, CreateTaskResponse, FailRequest,
    ProgressRequest, TaskDescriptor, TaskRequestBody, TaskStatusResponse, TasksByIndexQuery,
    TasksQuery, TasksSummaryResponse,
};
use crate::validation::{parse_counters, parse_create_task, parse_limit, parse_status_filter};

pub async fn create_task(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<impl IntoResponse> {
    principal.require_admin()?;

    let params = parse_create_task(
        request.search_params,
        request.start_page,
        request.max_documents,
        request.concurrent_connections,
    )?;

    let task_id = state
        .task_service
        .create(
            params,
            request.start_page,
            request.max_documents,
            request.concurrent_connections,
        )
        .await?;

    Ok(Json(CreateTaskResponse { task_id }))
}

/// Short-poll for work: a task descriptor, or 204 when the queue is empty.
pub async fn request_task(
    State(state): State<AppState>,
    principal: Principal,
    body: Option<Json<TaskRequestBody>>,
) -> ApiResult<impl IntoResponse> {
    let client_id = resolve_worker(
        &state.auth,
        &principal,
        body.and_then(|Json(b)| b.client_id),
    )?;

    match state.task_service.request(client_id).await? {
        Some(task) => Ok(Json(TaskDescriptor::from(task)).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

pub async fn report_progress(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<ProgressRequest>,
) -> ApiResult<impl IntoResponse> {
    let client_id = resolve_worker(&state.auth, &principal, request.client_id)?;
    parse_counters(request.downloaded, request.failed, request.skipped)?;

    state
        .task_service
        .report_progress(
            request.task_id,
            client_id,
            TaskCounters {
                downloaded: request.downloaded,
                failed: request.failed,
                skipped: request.skipped,
            },
        )
        .await?;

    Ok(Json(json!({})))
}

pub async fn complete_task(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<CompleteRequest>,
) -> ApiResult<impl IntoResponse> {
    let client_id = resolve_worker(&state.auth, &principal, request.client_id)?;
    parse_counters(
        request.documents_downloaded,
        request.documents_failed,
        request.documents_skipped,
    )?;

    state
        .task_service
        .complete(
            request.task_id,
            client_id,
            TaskCounters {
                downloaded: request.documents_downloaded,
                failed: request.documents_failed,
                skipped: request.documents_skipped,
            },
            request.result_summary,
        )
        .await?;

    Ok(Json(json!({})))
}

pub async fn fail_task(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<FailRequest>,
) -> ApiResult<impl IntoResponse> {
    let client_id = resolve_worker(&state.auth, &principal, request.client_id)?;
    if request.error_message.trim().is_empty() {
        return Err(ApiError::Validation(
            "error_message must not be empty".to_string(),
        ));
    }

    state
        .task_service
        .fail(request.task_id, client_id, &request.error_message)
        .await?;

    Ok(Json(json!({})))
}

pub async fn cancel_task(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<CancelRequest>,
) -> ApiResult<impl IntoResponse> {
    principal.require_admin()?;
    state.task_service.cancel(request.task_id).await?;
    Ok(Json(json!({})))
}

pub async fn list_tasks(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<TasksQuery>,
) -> ApiResult<impl IntoResponse> {
    principal.require_admin()?;

    let status = parse_status_filter(query.status_filter.as_deref())?;
    let limit = parse_limit(query.limit)?;

    let listing = state.task_service.list_tasks(status, limit).await?;
    Ok(Json(TasksSummaryResponse::from(listing)))
}

pub async fn get_task(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    principal.require_admin()?;
    let task = state.task_service.get_task(id).await?;
    Ok(Json(TaskStatusResponse::from(task)))
}

pub async fn task_indexes(
    State(state): State<AppState>,
    principal: Principal,
) -> ApiResult<impl IntoResponse> {
    principal.require_admin()?;
    let buckets = state.task_service.indexes().await?;
    Ok(Json(buckets))
}

pub async fn tasks_by_index(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<TasksByIndexQuery>,
) -> ApiResult<impl IntoResponse> {
    principal.require_admin()?;

    let tasks = state
        .task_service
        .list_by_index(
            &query.court_region,
            &query.instance_type,
            query.date_start,
            query.date_end,
        )
        .await?;

    let responses: Vec<TaskStatusResponse> =
        tasks.into_iter().map(TaskStatusResponse::from).collect();
    Ok(Json(responses))
}

/// Throughput and ETA snapshot for one task.
pub async fn task_download_statistics(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    if principal == Principal::Anonymous {
        return Err(ApiError::Unauthorized);
    }
    let statistics = state.statistics.task_download_statistics(id).await?;
    Ok(Json(statistics))
}
