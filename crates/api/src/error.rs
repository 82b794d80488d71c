//! API error mapping: every failure renders the typed envelope
//! `{ kind, message, details? }` with the matching status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use reyestr_errors::DispatchError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Error kinds surfaced in the response envelope.
fn kind_and_status(error: &ApiError) -> (&'static str, StatusCode) {
    match error {
        ApiError::Validation(_) => ("BadRequest", StatusCode::BAD_REQUEST),
        ApiError::Unauthorized => ("Unauthorized", StatusCode::UNAUTHORIZED),
        ApiError::Forbidden(_) => ("Forbidden", StatusCode::FORBIDDEN),
        ApiError::Dispatch(err) => match err {
            DispatchError::Validation(_) => ("BadRequest", StatusCode::BAD_REQUEST),
            DispatchError::Unauthorized => ("Unauthorized", StatusCode::UNAUTHORIZED),
            DispatchError::Forbidden(_) => ("Forbidden", StatusCode::FORBIDDEN),
            DispatchError::TaskNotFound { .. }
            | DispatchError::ClientNotFound { .. }
            | DispatchError::DocumentNotFound { .. } => ("NotFound", StatusCode::NOT_FOUND),
            DispatchError::TaskNotHeld { .. }
            | DispatchError::TerminalState { .. }
            | DispatchError::InvalidProgress { .. } => ("Conflict", StatusCode::CONFLICT),
            DispatchError::Timeout(_) => ("Timeout", StatusCode::REQUEST_TIMEOUT),
            DispatchError::StoreUnavailable(_) => {
                ("StoreUnavailable", StatusCode::SERVICE_UNAVAILABLE)
            }
            _ => ("Internal", StatusCode::INTERNAL_SERVER_ERROR),
        },
    }
}

/// Conflict responses carry the ids a worker needs to react correctly.
fn details(error: &ApiError) -> Option<serde_json::Value> {
    match error {
        ApiError::Dispatch(DispatchError::TaskNotHeld { task_id, client_id }) => Some(json!({
            "task_id": task_id,
            "client_id": client_id,
        })),
        ApiError::Dispatch(DispatchError::TerminalState { task_id, status }) => Some(json!({
            "task_id": task_id,
            "status": status,
        })),
        ApiError::Dispatch(DispatchError::InvalidProgress { task_id }) => Some(json!({
            "task_id": task_id,
        })),
        _ => None,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (kind, status) = kind_and_status(&self);

        // Store internals never leak to the wire.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal error");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let mut body = json!({
            "kind": kind,
            "message": message,
        });
        if let Some(details) = details(&self) {
            body["details"] = details;
        }

        (status, Json(body)).into_response()
    }
}
