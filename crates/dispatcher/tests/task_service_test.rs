use std::sync::Arc;

use reyestr_config::CacheConfig;
use reyestr_dispatcher::task_service::TaskService;
use reyestr_dispatcher::test_utils::{
    test_client, test_task, InMemoryStore, MockClientRepository, MockTaskRepository,
};
use reyestr_domain::entities::TaskStatus;
use reyestr_domain::repositories::{TaskCounters, TaskRepository};
use reyestr_domain::SearchParams;
use reyestr_errors::DispatchError;
use reyestr_infrastructure::cache::DisabledCache;

fn service(store: &Arc<InMemoryStore>) -> TaskService {
    TaskService::new(
        Arc::new(MockTaskRepository::new(store.clone())),
        Arc::new(MockClientRepository::new(store.clone())),
        Arc::new(DisabledCache),
        &CacheConfig::default(),
    )
}

fn counters(downloaded: i32, failed: i32, skipped: i32) -> TaskCounters {
    TaskCounters {
        downloaded,
        failed,
        skipped,
    }
}

#[tokio::test]
async fn request_on_empty_queue_returns_none() {
    let store = InMemoryStore::new();
    let client_id = store.seed_client(test_client("worker-1"));
    let service = service(&store);

    assert!(service.request(client_id).await.unwrap().is_none());
}

#[tokio::test]
async fn request_from_unknown_client_is_rejected() {
    let store = InMemoryStore::new();
    store.seed_task(test_task());
    let service = service(&store);

    let result = service.request(uuid::Uuid::new_v4()).await;
    assert!(matches!(result, Err(DispatchError::ClientNotFound { .. })));
}

#[tokio::test]
async fn exclusive_claim_under_contention() {
    let store = InMemoryStore::new();
    let task_id = store.seed_task(test_task());
    let workers: Vec<_> = (0..10)
        .map(|i| store.seed_client(test_client(&format!("worker-{i}"))))
        .collect();
    let service = Arc::new(service(&store));

    let handles: Vec<_> = workers
        .iter()
        .map(|&worker| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.request(worker).await.unwrap() })
        })
        .collect();

    let mut winners = Vec::new();
    for handle in handles {
        if let Some(task) = handle.await.unwrap() {
            winners.push(task);
        }
    }

    // exactly one worker received the task, nine got none
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].id, task_id);

    let task = store.tasks.lock().unwrap().get(&task_id).cloned().unwrap();
    assert_eq!(task.status, TaskStatus::Assigned);
    assert!(workers.contains(&task.client_id.unwrap()));
    assert_eq!(task.client_id, winners[0].client_id);
}

#[tokio::test]
async fn oldest_task_is_claimed_first() {
    let store = InMemoryStore::new();
    let client_id = store.seed_client(test_client("worker-1"));

    let mut older = test_task();
    older.created_at -= chrono::Duration::minutes(5);
    let older_id = store.seed_task(older);
    store.seed_task(test_task());

    let service = service(&store);
    let claimed = service.request(client_id).await.unwrap().unwrap();
    assert_eq!(claimed.id, older_id);
}

#[tokio::test]
async fn create_request_complete_round_trip() {
    let store = InMemoryStore::new();
    let client_id = store.seed_client(test_client("worker-1"));
    let service = service(&store);

    let params = SearchParams {
        court_region: Some("11".to_string()),
        instance_type: Some("1".to_string()),
        ..Default::default()
    };
    let created_id = service.create(params, 1, 50, None).await.unwrap();

    let claimed = service.request(client_id).await.unwrap().unwrap();
    assert_eq!(claimed.id, created_id);
    assert_eq!(claimed.status, TaskStatus::Assigned);
    assert!(claimed.assigned_at.is_some());

    let completed = service
        .complete(created_id, client_id, counters(50, 0, 0), None)
        .await
        .unwrap();
    assert_eq!(completed.id, created_id);
    assert_eq!(completed.status, TaskStatus::Completed);
    assert!(completed.completed_at.is_some());
}

#[tokio::test]
async fn first_progress_report_starts_the_task() {
    let store = InMemoryStore::new();
    let client_id = store.seed_client(test_client("worker-1"));
    let service = service(&store);

    let task_id = service.create(SearchParams::default(), 1, 20, None).await.unwrap();
    service.request(client_id).await.unwrap().unwrap();

    let task = service
        .report_progress(task_id, client_id, counters(3, 0, 0))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert!(task.started_at.is_some());
    assert_eq!(task.documents_downloaded, 3);

    // second report keeps started_at
    let started_at = task.started_at;
    let task = service
        .report_progress(task_id, client_id, counters(7, 1, 0))
        .await
        .unwrap();
    assert_eq!(task.started_at, started_at);
    assert_eq!(task.documents_downloaded, 7);
}

#[tokio::test]
async fn counter_regression_is_invalid_progress() {
    let store = InMemoryStore::new();
    let client_id = store.seed_client(test_client("worker-1"));
    let service = service(&store);

    let task_id = service.create(SearchParams::default(), 1, 20, None).await.unwrap();
    service.request(client_id).await.unwrap().unwrap();
    service
        .report_progress(task_id, client_id, counters(10, 0, 0))
        .await
        .unwrap();

    let result = service
        .report_progress(task_id, client_id, counters(5, 0, 0))
        .await;
    assert!(matches!(
        result,
        Err(DispatchError::InvalidProgress { .. })
    ));
}

#[tokio::test]
async fn progress_from_non_holder_is_rejected() {
    let store = InMemoryStore::new();
    let holder = store.seed_client(test_client("worker-1"));
    let other = store.seed_client(test_client("worker-2"));
    let service = service(&store);

    let task_id = service.create(SearchParams::default(), 1, 20, None).await.unwrap();
    service.request(holder).await.unwrap().unwrap();

    let result = service
        .report_progress(task_id, other, counters(1, 0, 0))
        .await;
    assert!(matches!(result, Err(DispatchError::TaskNotHeld { .. })));
}

#[tokio::test]
async fn complete_on_terminal_task_is_a_conflict_without_writes() {
    let store = InMemoryStore::new();
    let client_id = store.seed_client(test_client("worker-1"));
    let service = service(&store);

    let task_id = service.create(SearchParams::default(), 1, 20, None).await.unwrap();
    service.request(client_id).await.unwrap().unwrap();
    service
        .complete(task_id, client_id, counters(20, 0, 0), None)
        .await
        .unwrap();

    let before = store.tasks.lock().unwrap().get(&task_id).cloned().unwrap();
    let result = service
        .complete(task_id, client_id, counters(99, 0, 0), None)
        .await;
    assert!(matches!(result, Err(DispatchError::TerminalState { .. })));

    // terminal tasks are never mutated
    let after = store.tasks.lock().unwrap().get(&task_id).cloned().unwrap();
    assert_eq!(before, after);

    // and the worker was not credited twice
    let client = store.clients.lock().unwrap().get(&client_id).cloned().unwrap();
    assert_eq!(client.total_tasks_completed, 1);
}

#[tokio::test]
async fn complete_on_missing_task_is_not_found() {
    let store = InMemoryStore::new();
    let client_id = store.seed_client(test_client("worker-1"));
    let service = service(&store);

    let result = service
        .complete(uuid::Uuid::new_v4(), client_id, counters(0, 0, 0), None)
        .await;
    assert!(matches!(result, Err(DispatchError::TaskNotFound { .. })));
}

#[tokio::test]
async fn complete_credits_worker_lifetime_counters() {
    let store = InMemoryStore::new();
    let client_id = store.seed_client(test_client("worker-1"));
    let service = service(&store);

    for downloaded in [10, 20, 5] {
        let task_id = service.create(SearchParams::default(), 1, 100, None).await.unwrap();
        service.request(client_id).await.unwrap().unwrap();
        service
            .complete(task_id, client_id, counters(downloaded, 0, 0), None)
            .await
            .unwrap();
    }

    let client = store.clients.lock().unwrap().get(&client_id).cloned().unwrap();
    assert_eq!(client.total_tasks_completed, 3);
    assert_eq!(client.total_documents_downloaded, 35);

    let task_repo = MockTaskRepository::new(store.clone());
    let task_stats = task_repo.client_task_stats(client_id).await.unwrap();
    // lifetime counters agree with per-task aggregation
    assert_eq!(task_stats.completed_tasks, client.total_tasks_completed);
    assert_eq!(task_stats.total_docs_from_tasks, client.total_documents_downloaded);
}

#[tokio::test]
async fn fail_records_error_and_flips_worker_to_error() {
    let store = InMemoryStore::new();
    let client_id = store.seed_client(test_client("worker-1"));
    let service = service(&store);

    let task_id = service.create(SearchParams::default(), 1, 20, None).await.unwrap();
    service.request(client_id).await.unwrap().unwrap();

    let task = service
        .fail(task_id, client_id, "browser session lost")
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_message.as_deref(), Some("browser session lost"));

    let client = store.clients.lock().unwrap().get(&client_id).cloned().unwrap();
    assert_eq!(
        client.status,
        reyestr_domain::entities::ClientStatus::Error
    );
    assert_eq!(client.total_tasks_failed, 1);
}

#[tokio::test]
async fn cancel_works_from_any_non_terminal_state() {
    let store = InMemoryStore::new();
    let client_id = store.seed_client(test_client("worker-1"));
    let service = service(&store);

    // pending
    let pending_id = service.create(SearchParams::default(), 1, 20, None).await.unwrap();
    let cancelled = service.cancel(pending_id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);

    // assigned
    let assigned_id = service.create(SearchParams::default(), 1, 20, None).await.unwrap();
    service.request(client_id).await.unwrap().unwrap();
    let cancelled = service.cancel(assigned_id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);

    // terminal cancel is a conflict
    let result = service.cancel(assigned_id).await;
    assert!(matches!(result, Err(DispatchError::TerminalState { .. })));
}

#[tokio::test]
async fn listing_reports_status_counts() {
    let store = InMemoryStore::new();
    let client_id = store.seed_client(test_client("worker-1"));
    let service = service(&store);

    for _ in 0..3 {
        service.create(SearchParams::default(), 1, 20, None).await.unwrap();
    }
    let claimed = service.request(client_id).await.unwrap().unwrap();
    service
        .complete(claimed.id, client_id, counters(20, 0, 0), None)
        .await
        .unwrap();

    let listing = service.list_tasks(None, 100).await.unwrap();
    assert_eq!(listing.counts.pending, 2);
    assert_eq!(listing.counts.completed, 1);
    assert_eq!(listing.tasks.len(), 3);

    let pending_only = service
        .list_tasks(Some(TaskStatus::Pending), 100)
        .await
        .unwrap();
    assert!(pending_only
        .tasks
        .iter()
        .all(|t| t.status == TaskStatus::Pending));
}

#[tokio::test]
async fn indexes_group_by_region_and_instance() {
    let store = InMemoryStore::new();
    let service = service(&store);

    for (region, instance) in [("11", "1"), ("11", "1"), ("14", "2")] {
        let params = SearchParams {
            court_region: Some(region.to_string()),
            instance_type: Some(instance.to_string()),
            ..Default::default()
        };
        service.create(params, 1, 20, None).await.unwrap();
    }
    // a task without index keys stays out of the map
    service.create(SearchParams::default(), 1, 20, None).await.unwrap();

    let buckets = service.indexes().await.unwrap();
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].court_region, "11");
    assert_eq!(buckets[0].total_tasks, 2);
    assert_eq!(buckets[0].pending_tasks, 2);
    assert_eq!(buckets[1].court_region, "14");

    let tasks = service
        .list_by_index("11", "1", None, None)
        .await
        .unwrap();
    assert_eq!(tasks.len(), 2);
}
