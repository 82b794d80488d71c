use std::sync::Arc;

use chrono::{Duration, Utc};
use reyestr_config::CacheConfig;
use reyestr_dispatcher::registrar::{DocumentMetadata, RegistrarService};
use reyestr_dispatcher::statistics::StatisticsService;
use reyestr_dispatcher::task_service::TaskService;
use reyestr_dispatcher::test_utils::{
    test_client, test_task, InMemoryStore, MockClientRepository, MockDocumentRepository,
    MockProgressRepository, MockTaskRepository,
};
use reyestr_domain::entities::ProgressStatus;
use reyestr_domain::repositories::TaskCounters;
use reyestr_domain::SearchParams;
use reyestr_errors::DispatchError;
use reyestr_infrastructure::cache::DisabledCache;

fn services(store: &Arc<InMemoryStore>) -> (TaskService, RegistrarService, StatisticsService) {
    let task_repo = Arc::new(MockTaskRepository::new(store.clone()));
    let client_repo = Arc::new(MockClientRepository::new(store.clone()));
    let document_repo = Arc::new(MockDocumentRepository::new(store.clone()));
    let progress_repo = Arc::new(MockProgressRepository::new(store.clone()));
    let cache = Arc::new(DisabledCache);
    let cache_config = CacheConfig::default();

    (
        TaskService::new(
            task_repo.clone(),
            client_repo.clone(),
            cache.clone(),
            &cache_config,
        ),
        RegistrarService::new(
            document_repo.clone(),
            task_repo.clone(),
            client_repo.clone(),
            progress_repo.clone(),
            cache.clone(),
            &cache_config,
        ),
        StatisticsService::new(
            task_repo,
            client_repo,
            document_repo,
            progress_repo,
            cache,
            &cache_config,
        ),
    )
}

#[tokio::test]
async fn client_statistics_aggregate_tasks_and_documents() {
    let store = InMemoryStore::new();
    let client_id = store.seed_client(test_client("worker-1"));
    let (tasks, registrar, statistics) = services(&store);

    // two completed tasks, one failed
    for downloaded in [10, 5] {
        let task_id = tasks.create(SearchParams::default(), 1, 50, None).await.unwrap();
        tasks.request(client_id).await.unwrap().unwrap();
        tasks
            .complete(
                task_id,
                client_id,
                TaskCounters {
                    downloaded,
                    failed: 1,
                    skipped: 2,
                },
                None,
            )
            .await
            .unwrap();
    }
    let failing = tasks.create(SearchParams::default(), 1, 50, None).await.unwrap();
    tasks.request(client_id).await.unwrap().unwrap();
    tasks.fail(failing, client_id, "registry unreachable").await.unwrap();

    // documents across two regions
    for (id, court) in [
        ("1001", "Львівський апеляційний суд"),
        ("1002", "Львівський апеляційний суд"),
        ("1003", "Харківський районний суд"),
    ] {
        registrar
            .register(
                DocumentMetadata {
                    external_id: Some(id.to_string()),
                    court_name: Some(court.to_string()),
                    ..Default::default()
                },
                None,
                Some(client_id),
                None,
            )
            .await
            .unwrap();
    }

    let stats = statistics.client_statistics(client_id).await.unwrap();
    assert_eq!(stats.task_statistics.completed_tasks, 2);
    assert_eq!(stats.task_statistics.failed_tasks, 1);
    assert_eq!(stats.task_statistics.total_docs_from_tasks, 15);
    assert_eq!(stats.task_statistics.total_docs_skipped, 4);
    assert_eq!(stats.document_statistics.total_documents, 3);
    assert_eq!(stats.document_statistics.unique_regions, 2);
    assert_eq!(stats.document_statistics.classified_documents, 3);
    assert_eq!(stats.total_tasks_completed, 2);
    assert_eq!(stats.total_tasks_failed, 1);
}

#[tokio::test]
async fn statistics_for_unknown_client_is_not_found() {
    let store = InMemoryStore::new();
    let (_, _, statistics) = services(&store);

    let result = statistics.client_statistics(uuid::Uuid::new_v4()).await;
    assert!(matches!(result, Err(DispatchError::ClientNotFound { .. })));
}

#[tokio::test]
async fn activity_reports_the_held_task_and_recent_errors() {
    let store = InMemoryStore::new();
    let client_id = store.seed_client(test_client("worker-1"));
    let (tasks, _, statistics) = services(&store);

    // one failed task in the history
    let failed = tasks.create(SearchParams::default(), 1, 50, None).await.unwrap();
    tasks.request(client_id).await.unwrap().unwrap();
    tasks.fail(failed, client_id, "captcha wall").await.unwrap();

    // one task currently in progress
    let current = tasks.create(SearchParams::default(), 1, 50, None).await.unwrap();
    tasks.request(client_id).await.unwrap().unwrap();
    tasks
        .report_progress(
            current,
            client_id,
            TaskCounters {
                downloaded: 12,
                failed: 0,
                skipped: 0,
            },
        )
        .await
        .unwrap();

    let activity = statistics.client_activity(client_id).await.unwrap();
    let current_task = activity.current_task.unwrap();
    assert_eq!(current_task.task_id, current);
    assert_eq!(current_task.documents_downloaded, 12);
    assert_eq!(activity.errors.len(), 1);
    assert_eq!(activity.errors[0].error_message, "captcha wall");
    assert_eq!(activity.session_stats.documents_downloaded, 12);
}

#[tokio::test]
async fn activity_without_a_held_task_has_no_current_entry() {
    let store = InMemoryStore::new();
    let client_id = store.seed_client(test_client("worker-1"));
    let (_, _, statistics) = services(&store);

    let activity = statistics.client_activity(client_id).await.unwrap();
    assert!(activity.current_task.is_none());
    assert!(activity.errors.is_empty());
}

#[tokio::test]
async fn task_download_statistics_compute_speed_and_eta() {
    let store = InMemoryStore::new();
    let client_id = store.seed_client(test_client("worker-1"));
    let task_id = store.seed_task(test_task());
    let (tasks, registrar, statistics) = services(&store);

    tasks.request(client_id).await.unwrap().unwrap();
    tasks
        .report_progress(
            task_id,
            client_id,
            TaskCounters {
                downloaded: 2,
                failed: 0,
                skipped: 0,
            },
        )
        .await
        .unwrap();

    // two completed downloads, two seconds each
    for doc in ["d1", "d2"] {
        registrar
            .open_progress(task_id, doc.to_string(), None, Some(client_id))
            .await
            .unwrap();
        {
            let mut records = store.progress.lock().unwrap();
            let record = records.get_mut(&(task_id, doc.to_string())).unwrap();
            record.started_at = Utc::now() - Duration::seconds(2);
        }
        registrar
            .close_progress(task_id, doc, ProgressStatus::Completed)
            .await
            .unwrap();
    }

    let stats = statistics.task_download_statistics(task_id).await.unwrap();
    assert_eq!(stats.total_documents, 100);
    assert_eq!(stats.started_count, 2);
    assert_eq!(stats.completed_count, 2);

    let speed = stats.download_speed_docs_per_second.unwrap();
    assert!(speed > 0.3 && speed < 0.7, "speed was {speed}");

    // 98 documents remain at ~0.5 docs/s
    let eta = stats.estimated_time_remaining_seconds.unwrap();
    assert!(eta > 120.0 && eta < 400.0, "eta was {eta}");
}

#[tokio::test]
async fn throughput_is_undefined_before_the_first_completion() {
    let store = InMemoryStore::new();
    let task_id = store.seed_task(test_task());
    let (_, registrar, statistics) = services(&store);

    registrar
        .open_progress(task_id, "d1".to_string(), None, None)
        .await
        .unwrap();

    let stats = statistics.task_download_statistics(task_id).await.unwrap();
    assert_eq!(stats.started_count, 1);
    assert!(stats.download_speed_docs_per_second.is_none());
    assert!(stats.estimated_time_remaining_seconds.is_none());
}
