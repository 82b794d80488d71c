//! Edge validation. Everything here runs before any store access; a
//! rejected request performs no writes.

use reyestr_domain::entities::TaskStatus;
use reyestr_domain::search_params::parse_registry_date;
use reyestr_domain::SearchParams;
use validator::ValidationError;

use crate::error::ApiError;

pub const MAX_DOCUMENTS_LIMIT: i32 = 1000;
pub const MAX_CONCURRENT_CONNECTIONS: i32 = 20;
pub const MAX_LIST_LIMIT: i64 = 1000;
pub const DEFAULT_LIST_LIMIT: i64 = 100;

pub fn validate_start_page(start_page: i32) -> Result<(), ValidationError> {
    if start_page < 1 {
        return Err(ValidationError::new("start_page_out_of_range"));
    }
    Ok(())
}

pub fn validate_max_documents(max_documents: i32) -> Result<(), ValidationError> {
    if !(1..=MAX_DOCUMENTS_LIMIT).contains(&max_documents) {
        return Err(ValidationError::new("max_documents_out_of_range"));
    }
    Ok(())
}

pub fn validate_concurrent_connections(connections: i32) -> Result<(), ValidationError> {
    if !(1..=MAX_CONCURRENT_CONNECTIONS).contains(&connections) {
        return Err(ValidationError::new("concurrent_connections_out_of_range"));
    }
    Ok(())
}

pub fn validate_counter(value: i32) -> Result<(), ValidationError> {
    if value < 0 {
        return Err(ValidationError::new("counter_negative"));
    }
    Ok(())
}

pub fn validate_client_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("client_name_empty"));
    }
    if trimmed.len() > 255 {
        return Err(ValidationError::new("client_name_too_long"));
    }
    Ok(())
}

pub fn validate_search_params(params: &SearchParams) -> Result<(), ValidationError> {
    if let Some(instance) = params.instance_type.as_deref() {
        if !matches!(instance, "1" | "2" | "3") {
            return Err(ValidationError::new("instance_type_invalid"));
        }
    }
    for (_, value) in params.date_fields() {
        if let Some(date) = value {
            if parse_registry_date(date).is_none() {
                return Err(ValidationError::new("date_not_dd_mm_yyyy"));
            }
        }
    }
    Ok(())
}

/// Parse and validate a create-task request's pieces.
pub fn parse_create_task(
    search_params: serde_json::Value,
    start_page: i32,
    max_documents: i32,
    concurrent_connections: Option<i32>,
) -> Result<SearchParams, ApiError> {
    validate_start_page(start_page)
        .map_err(|_| ApiError::Validation("start_page must be >= 1".to_string()))?;
    validate_max_documents(max_documents).map_err(|_| {
        ApiError::Validation(format!(
            "max_documents must be between 1 and {MAX_DOCUMENTS_LIMIT}"
        ))
    })?;
    if let Some(connections) = concurrent_connections {
        validate_concurrent_connections(connections).map_err(|_| {
            ApiError::Validation(format!(
                "concurrent_connections must be between 1 and {MAX_CONCURRENT_CONNECTIONS}"
            ))
        })?;
    }

    let params = SearchParams::from_value(search_params)
        .map_err(|err| ApiError::Validation(format!("search_params: {err}")))?;
    validate_search_params(&params).map_err(|err| match err.code.as_ref() {
        "instance_type_invalid" => {
            ApiError::Validation("INSType must be one of \"1\", \"2\", \"3\"".to_string())
        }
        _ => ApiError::Validation("dates must use the DD.MM.YYYY format".to_string()),
    })?;

    Ok(params)
}

pub fn parse_counters(downloaded: i32, failed: i32, skipped: i32) -> Result<(), ApiError> {
    for value in [downloaded, failed, skipped] {
        validate_counter(value)
            .map_err(|_| ApiError::Validation("counters must be non-negative".to_string()))?;
    }
    Ok(())
}

pub fn parse_status_filter(raw: Option<&str>) -> Result<Option<TaskStatus>, ApiError> {
    match raw {
        None | Some("") => Ok(None),
        Some(value) => TaskStatus::parse(value).map(Some).ok_or_else(|| {
            ApiError::Validation(format!("unknown status_filter value: {value}"))
        }),
    }
}

pub fn parse_limit(limit: Option<i64>) -> Result<i64, ApiError> {
    let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(ApiError::Validation(format!(
            "limit must be between 1 and {MAX_LIST_LIMIT}"
        )));
    }
    Ok(limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn start_page_bounds() {
        assert!(validate_start_page(1).is_ok());
        assert!(validate_start_page(500).is_ok());
        assert!(validate_start_page(0).is_err());
        assert!(validate_start_page(-3).is_err());
    }

    #[test]
    fn max_documents_bounds() {
        assert!(validate_max_documents(1).is_ok());
        assert!(validate_max_documents(1000).is_ok());
        assert!(validate_max_documents(0).is_err());
        assert!(validate_max_documents(1001).is_err());
    }

    #[test]
    fn create_task_parses_recognized_params_and_drops_the_rest() {
        let params = parse_create_task(
            json!({"CourtRegion": "11", "INSType": "1", "Extra": "dropped"}),
            1,
            100,
            Some(5),
        )
        .unwrap();
        assert_eq!(params.court_region.as_deref(), Some("11"));
        assert!(params.to_value().get("Extra").is_none());
    }

    #[test]
    fn create_task_rejects_bad_instance_type() {
        let result = parse_create_task(json!({"INSType": "9"}), 1, 100, None);
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[test]
    fn create_task_rejects_bad_dates() {
        let result = parse_create_task(json!({"RegDateBegin": "2024-03-01"}), 1, 100, None);
        assert!(matches!(result, Err(ApiError::Validation(_))));

        assert!(parse_create_task(json!({"RegDateBegin": "01.03.2024"}), 1, 100, None).is_ok());
    }

    #[test]
    fn create_task_rejects_connection_hint_out_of_range() {
        assert!(parse_create_task(json!({}), 1, 100, Some(0)).is_err());
        assert!(parse_create_task(json!({}), 1, 100, Some(21)).is_err());
        assert!(parse_create_task(json!({}), 1, 100, Some(20)).is_ok());
    }

    #[test]
    fn counters_must_be_non_negative() {
        assert!(parse_counters(0, 0, 0).is_ok());
        assert!(parse_counters(10, 2, 1).is_ok());
        assert!(parse_counters(-1, 0, 0).is_err());
    }

    #[test]
    fn status_filter_parsing() {
        assert_eq!(parse_status_filter(None).unwrap(), None);
        assert_eq!(parse_status_filter(Some("")).unwrap(), None);
        assert_eq!(
            parse_status_filter(Some("pending")).unwrap(),
            Some(TaskStatus::Pending)
        );
        assert!(parse_status_filter(Some("bogus")).is_err());
    }

    #[test]
    fn limit_defaults_and_bounds() {
        assert_eq!(parse_limit(None).unwrap(), DEFAULT_LIST_LIMIT);
        assert_eq!(parse_limit(Some(10)).unwrap(), 10);
        assert!(parse_limit(Some(0)).is_err());
        assert!(parse_limit(Some(5000)).is_err());
    }

    #[test]
    fn client_name_rules() {
        assert!(validate_client_name("worker-1").is_ok());
        assert!(validate_client_name("  ").is_err());
        assert!(validate_client_name(&"x".repeat(300)).is_err());
    }
}
