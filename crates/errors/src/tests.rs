use super::*;

#[test]
fn store_classifies_pool_exhaustion_as_unavailable() {
    let err = DispatchError::store(sqlx::Error::PoolTimedOut);
    assert!(matches!(err, DispatchError::StoreUnavailable(_)));
    assert!(err.is_retryable());

    let err = DispatchError::store(sqlx::Error::PoolClosed);
    assert!(matches!(err, DispatchError::StoreUnavailable(_)));
}

#[test]
fn store_keeps_row_not_found_as_database() {
    let err = DispatchError::store(sqlx::Error::RowNotFound);
    assert!(matches!(err, DispatchError::Database(_)));
    assert!(!err.is_retryable());
}

#[test]
fn conflict_classification() {
    let task_id = Uuid::new_v4();
    let client_id = Uuid::new_v4();

    assert!(DispatchError::TaskNotHeld { task_id, client_id }.is_conflict());
    assert!(DispatchError::TerminalState {
        task_id,
        status: "completed".to_string()
    }
    .is_conflict());
    assert!(DispatchError::InvalidProgress { task_id }.is_conflict());

    assert!(!DispatchError::task_not_found(task_id).is_conflict());
    assert!(!DispatchError::Unauthorized.is_conflict());
}

#[test]
fn retryable_classification() {
    assert!(DispatchError::StoreUnavailable("pool exhausted".to_string()).is_retryable());
    assert!(DispatchError::Timeout("statement deadline".to_string()).is_retryable());

    assert!(!DispatchError::Validation("bad page".to_string()).is_retryable());
    assert!(!DispatchError::Unauthorized.is_retryable());
    assert!(!DispatchError::Forbidden("not your stats".to_string()).is_retryable());
}

#[test]
fn display_includes_ids() {
    let task_id = Uuid::new_v4();
    let client_id = Uuid::new_v4();
    let msg = DispatchError::TaskNotHeld { task_id, client_id }.to_string();
    assert!(msg.contains(&task_id.to_string()));
    assert!(msg.contains(&client_id.to_string()));
}

#[test]
fn serde_json_errors_become_serialization() {
    let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let err: DispatchError = json_err.into();
    assert!(matches!(err, DispatchError::Serialization(_)));
}

#[test]
fn helper_constructors() {
    assert!(matches!(
        DispatchError::validation("start_page must be >= 1"),
        DispatchError::Validation(_)
    ));
    assert!(matches!(
        DispatchError::config("DB_PORT is not a number"),
        DispatchError::Configuration(_)
    ));
    assert!(matches!(
        DispatchError::internal("unexpected"),
        DispatchError::Internal(_)
    ));
}
