use thiserror::Error;
use uuid::Uuid;

/// Unified error type for the dispatcher workspace.
///
/// Store-level failures are split into connection-class problems
/// (`StoreUnavailable`) and everything else (`Database`); state-machine
/// rejections carry the ids needed to render a useful conflict response.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("database operation failed: {0}")]
    DatabaseOperation(String),
    #[error("task not found: {id}")]
    TaskNotFound { id: Uuid },
    #[error("client not found: {id}")]
    ClientNotFound { id: Uuid },
    #[error("document not found: {id}")]
    DocumentNotFound { id: String },
    #[error("task {task_id} is not held by client {client_id}")]
    TaskNotHeld { task_id: Uuid, client_id: Uuid },
    #[error("task {task_id} is already in terminal state {status}")]
    TerminalState { task_id: Uuid, status: String },
    #[error("progress counters for task {task_id} regressed")]
    InvalidProgress { task_id: Uuid },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("authentication required")]
    Unauthorized,
    #[error("operation not permitted: {0}")]
    Forbidden(String),
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

impl DispatchError {
    /// Classify an sqlx error: pool and connection failures surface as
    /// `StoreUnavailable` so callers can retry with backoff.
    pub fn store(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::StoreUnavailable(err.to_string())
            }
            sqlx::Error::Io(_) => Self::StoreUnavailable(err.to_string()),
            other => Self::Database(other),
        }
    }

    pub fn task_not_found(id: Uuid) -> Self {
        Self::TaskNotFound { id }
    }

    pub fn client_not_found(id: Uuid) -> Self {
        Self::ClientNotFound { id }
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn forbidden<S: Into<String>>(msg: S) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// State-machine rejections that map to HTTP 409.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::TaskNotHeld { .. } | Self::TerminalState { .. } | Self::InvalidProgress { .. }
        )
    }

    /// Whether the caller can reasonably retry the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::Timeout(_) | Self::DatabaseOperation(_)
        )
    }
}

impl From<sqlx::Error> for DispatchError {
    fn from(err: sqlx::Error) -> Self {
        Self::store(err)
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for DispatchError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests;
