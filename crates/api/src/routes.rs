use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use reyestr_dispatcher::{RegistrarService, StatisticsService, TaskService};
use reyestr_domain::repositories::ClientRepository;

use crate::auth::{auth_middleware, AuthLayerState, AuthSettings};
use crate::handlers::{
    clients::{
        client_activity, client_heartbeat, client_statistics, list_clients, my_statistics,
        register_client,
    },
    documents::{download_complete, download_start, get_document, register_document},
    health::health_check,
    tasks::{
        cancel_task, complete_task, create_task, fail_task, get_task, list_tasks,
        report_progress, request_task, task_download_statistics, task_indexes, tasks_by_index,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub task_service: Arc<TaskService>,
    pub registrar: Arc<RegistrarService>,
    pub statistics: Arc<StatisticsService>,
    pub client_repo: Arc<dyn ClientRepository>,
    pub auth: Arc<AuthSettings>,
}

pub fn create_router(state: AppState) -> Router {
    let auth_state = AuthLayerState {
        settings: state.auth.clone(),
        client_repo: state.client_repo.clone(),
    };

    let api = Router::new()
        .route("/health", get(health_check))
        .route("/tasks/create", post(create_task))
        .route("/tasks/request", post(request_task))
        .route("/tasks/progress", post(report_progress))
        .route("/tasks/complete", post(complete_task))
        .route("/tasks/fail", post(fail_task))
        .route("/tasks/cancel", post(cancel_task))
        .route("/tasks", get(list_tasks))
        .route("/tasks/indexes", get(task_indexes))
        .route("/tasks/by-index", get(tasks_by_index))
        .route("/tasks/document-download-start", post(download_start))
        .route("/tasks/document-download-complete", post(download_complete))
        .route("/tasks/{id}", get(get_task))
        .route(
            "/tasks/{id}/download-statistics",
            get(task_download_statistics),
        )
        .route("/documents/register", post(register_document))
        .route("/documents/{system_id}", get(get_document))
        .route("/clients/register", post(register_client))
        .route("/clients/heartbeat", post(client_heartbeat))
        .route("/clients", get(list_clients))
        .route("/clients/me/statistics", get(my_statistics))
        .route("/clients/{id}/statistics", get(client_statistics))
        .route("/clients/{id}/activity", get(client_activity))
        .with_state(state)
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    Router::new().nest("/api/v1", api)
}
