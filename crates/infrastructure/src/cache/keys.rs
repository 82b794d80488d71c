//! Canonical cache keys. Everything cached lives under one of these
//! families so invalidation can work by prefix.

use uuid::Uuid;

/// Prefix covering single tasks, filtered lists and the summary.
pub const TASKS_PREFIX: &str = "tasks:";
pub const TASK_PREFIX: &str = "task:";

pub fn task(id: Uuid) -> String {
    format!("task:{id}")
}

pub fn tasks_list(status_filter: Option<&str>, limit: i64) -> String {
    format!("tasks:{}:{limit}", status_filter.unwrap_or("all"))
}

pub fn tasks_summary() -> String {
    "tasks:summary".to_string()
}

pub fn client_statistics(client_id: Uuid) -> String {
    format!("worker:{client_id}:statistics")
}

pub fn document(system_id: Uuid) -> String {
    format!("document:{system_id}")
}
