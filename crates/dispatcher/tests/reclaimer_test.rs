use std::sync::Arc;

use chrono::{Duration, Utc};
use reyestr_config::CacheConfig;
use reyestr_dispatcher::reclaimer::{ReclaimConfig, TaskReclaimer};
use reyestr_dispatcher::liveness::{LivenessConfig, LivenessMonitor};
use reyestr_dispatcher::task_service::TaskService;
use reyestr_dispatcher::test_utils::{
    test_client, test_task, InMemoryStore, MockClientRepository, MockTaskRepository,
};
use reyestr_domain::entities::{ClientStatus, TaskStatus};
use reyestr_domain::repositories::TaskCounters;
use reyestr_errors::DispatchError;
use reyestr_infrastructure::cache::DisabledCache;

fn task_service(store: &Arc<InMemoryStore>) -> TaskService {
    TaskService::new(
        Arc::new(MockTaskRepository::new(store.clone())),
        Arc::new(MockClientRepository::new(store.clone())),
        Arc::new(DisabledCache),
        &CacheConfig::default(),
    )
}

fn reclaimer(store: &Arc<InMemoryStore>) -> TaskReclaimer {
    TaskReclaimer::new(
        Arc::new(MockTaskRepository::new(store.clone())),
        ReclaimConfig {
            inactivity_threshold_seconds: 180,
        },
    )
}

fn go_silent(store: &Arc<InMemoryStore>, client_id: uuid::Uuid, seconds: i64) {
    let mut clients = store.clients.lock().unwrap();
    let client = clients.get_mut(&client_id).unwrap();
    client.last_heartbeat = Utc::now() - Duration::seconds(seconds);
}

#[tokio::test]
async fn stalled_task_returns_to_the_queue_and_is_reclaimable() {
    let store = InMemoryStore::new();
    let stalled_worker = store.seed_client(test_client("worker-1"));
    let fresh_worker = store.seed_client(test_client("worker-2"));
    let task_id = store.seed_task(test_task());

    let service = task_service(&store);
    service.request(stalled_worker).await.unwrap().unwrap();

    // worker stops heartbeating past the inactivity threshold
    go_silent(&store, stalled_worker, 600);

    let reclaimed = reclaimer(&store).run_once().await.unwrap();
    assert_eq!(reclaimed, vec![task_id]);

    let task = store.tasks.lock().unwrap().get(&task_id).cloned().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.client_id.is_none());
    assert!(task.assigned_at.is_none());

    // a fresh worker immediately claims it
    let claimed = service.request(fresh_worker).await.unwrap().unwrap();
    assert_eq!(claimed.id, task_id);
    assert_eq!(claimed.client_id, Some(fresh_worker));
}

#[tokio::test]
async fn late_complete_after_reclaim_is_a_conflict() {
    let store = InMemoryStore::new();
    let stalled_worker = store.seed_client(test_client("worker-1"));
    let fresh_worker = store.seed_client(test_client("worker-2"));
    let task_id = store.seed_task(test_task());

    let service = task_service(&store);
    service.request(stalled_worker).await.unwrap().unwrap();
    go_silent(&store, stalled_worker, 600);
    reclaimer(&store).run_once().await.unwrap();
    let reclaimed_by = service.request(fresh_worker).await.unwrap().unwrap();

    // the original worker wakes and reports completion
    let result = service
        .complete(
            task_id,
            stalled_worker,
            TaskCounters {
                downloaded: 42,
                failed: 0,
                skipped: 0,
            },
            None,
        )
        .await;
    assert!(matches!(result, Err(DispatchError::TaskNotHeld { .. })));

    // the task stays exactly as the new holder left it
    let task = store.tasks.lock().unwrap().get(&task_id).cloned().unwrap();
    assert_eq!(task.status, TaskStatus::Assigned);
    assert_eq!(task.client_id, reclaimed_by.client_id);
    assert_eq!(task.documents_downloaded, 0);
}

#[tokio::test]
async fn reclamation_does_not_penalize_the_previous_worker() {
    let store = InMemoryStore::new();
    let worker = store.seed_client(test_client("worker-1"));
    store.seed_task(test_task());

    let service = task_service(&store);
    service.request(worker).await.unwrap().unwrap();
    go_silent(&store, worker, 600);
    reclaimer(&store).run_once().await.unwrap();

    let client = store.clients.lock().unwrap().get(&worker).cloned().unwrap();
    assert_eq!(client.total_tasks_failed, 0);
    assert_eq!(client.total_tasks_completed, 0);
}

#[tokio::test]
async fn fresh_holders_are_left_alone() {
    let store = InMemoryStore::new();
    let worker = store.seed_client(test_client("worker-1"));
    let task_id = store.seed_task(test_task());

    let service = task_service(&store);
    service.request(worker).await.unwrap().unwrap();

    let reclaimed = reclaimer(&store).run_once().await.unwrap();
    assert!(reclaimed.is_empty());

    let task = store.tasks.lock().unwrap().get(&task_id).cloned().unwrap();
    assert_eq!(task.status, TaskStatus::Assigned);
}

#[tokio::test]
async fn liveness_sweep_flips_silent_workers_only() {
    let store = InMemoryStore::new();
    let silent = store.seed_client(test_client("worker-1"));
    let healthy = store.seed_client(test_client("worker-2"));
    go_silent(&store, silent, 600);

    let monitor = LivenessMonitor::new(
        Arc::new(MockClientRepository::new(store.clone())),
        LivenessConfig {
            inactivity_threshold_seconds: 180,
        },
    );
    let flipped = monitor.run_once().await.unwrap();
    assert_eq!(flipped, vec![silent]);

    let clients = store.clients.lock().unwrap();
    assert_eq!(clients.get(&silent).unwrap().status, ClientStatus::Inactive);
    assert_eq!(clients.get(&healthy).unwrap().status, ClientStatus::Active);
}

#[tokio::test]
async fn liveness_sweep_does_not_touch_assignments() {
    let store = InMemoryStore::new();
    let worker = store.seed_client(test_client("worker-1"));
    let task_id = store.seed_task(test_task());

    let service = task_service(&store);
    service.request(worker).await.unwrap().unwrap();
    go_silent(&store, worker, 600);

    let monitor = LivenessMonitor::new(
        Arc::new(MockClientRepository::new(store.clone())),
        LivenessConfig::default(),
    );
    monitor.run_once().await.unwrap();

    // the assignment survives; only the reclaimer returns tasks
    let task = store.tasks.lock().unwrap().get(&task_id).cloned().unwrap();
    assert_eq!(task.status, TaskStatus::Assigned);
    assert_eq!(task.client_id, Some(worker));
}

#[tokio::test]
async fn heartbeat_reactivates_an_inactive_worker() {
    let store = InMemoryStore::new();
    let worker = store.seed_client(test_client("worker-1"));
    go_silent(&store, worker, 600);

    let monitor = LivenessMonitor::new(
        Arc::new(MockClientRepository::new(store.clone())),
        LivenessConfig::default(),
    );
    monitor.run_once().await.unwrap();
    assert_eq!(
        store.clients.lock().unwrap().get(&worker).unwrap().status,
        ClientStatus::Inactive
    );

    use reyestr_domain::repositories::ClientRepository;
    let repo = MockClientRepository::new(store.clone());
    assert!(repo.heartbeat(worker).await.unwrap());
    assert_eq!(
        store.clients.lock().unwrap().get(&worker).unwrap().status,
        ClientStatus::Active
    );
}
