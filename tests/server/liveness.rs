use chrono::{DateTime, Duration as ChronoDuration, Utc};
use conductor_core::config::{ServerConfig, WorkerConfig};
use conductor_core::runner::{InMemoryQueue, Worker, WorkerTask, WorkerTaskResult};
use conductor_core::server::{
    InMemoryServiceInstanceStore, LivenessTask, ServerInstance, ServerType,
    ServiceEventPublisher, ServiceInstanceStore, ServiceLivenessCoordinator,
    ServiceLivenessManager, ServiceRegistry, ServiceState, ServiceType, ShutdownSignal, Service,
};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::common::ManualService;

fn manager(server_type: ServerType, store: Arc<InMemoryServiceInstanceStore>) -> ServiceLivenessManager {
    ServiceLivenessManager::new(
        ServerConfig::default(),
        ServerInstance::new(server_type),
        Arc::new(ServiceRegistry::new()),
        store,
        ShutdownSignal::new(),
    )
}

/// Far enough in the future for every liveness delay to have elapsed
fn after_timeouts() -> DateTime<Utc> {
    let config = ServerConfig::default();
    let longest = config
        .liveness
        .initial_delay()
        .max(config.liveness.timeout());
    Utc::now() + ChronoDuration::from_std(longest).unwrap() + ChronoDuration::seconds(5)
}

async fn wait_for_state(store: &InMemoryServiceInstanceStore, id: &str, state: ServiceState) {
    for _ in 0..200 {
        if store
            .find_by_id(id)
            .await
            .unwrap()
            .is_some_and(|instance| instance.state == state)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("service {id} never reached {state}");
}

#[tokio::test]
async fn test_silent_server_is_fenced_off() {
    let store = Arc::new(InMemoryServiceInstanceStore::new());
    let server_a = manager(ServerType::Executor, store.clone());
    let executor = ManualService::new("executor-a", ServiceType::Executor);

    server_a.register(executor.clone(), BTreeMap::new()).await.unwrap();
    executor.set(ServiceState::Running);
    server_a
        .update_service_instance_state(Utc::now(), executor.clone(), Some(ServiceState::Running))
        .await
        .unwrap()
        .unwrap();

    // server A stops heartbeating, server B notices
    let coordinator = ServiceLivenessCoordinator::new(ServerConfig::default(), "server-b", store.clone());
    let later = after_timeouts();
    coordinator.on_schedule(later).await.unwrap();
    let stored = store.find_by_id("executor-a").await.unwrap().unwrap();
    assert_eq!(stored.state, ServiceState::Disconnected);

    // server A comes back and is refused
    server_a.on_schedule(later + ChronoDuration::seconds(1)).await.unwrap();
    assert!(server_a.shutdown().is_triggered());
    assert!(!server_a.shutdown().skip_graceful_termination());
    assert_eq!(
        store.find_by_id("executor-a").await.unwrap().unwrap().seq_id,
        stored.seq_id
    );

    server_a.close().await;
    assert_eq!(executor.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_coordinator_never_disconnects_its_own_server() {
    let store = Arc::new(InMemoryServiceInstanceStore::new());
    let server = manager(ServerType::Standalone, store.clone());
    let scheduler = ManualService::new("scheduler", ServiceType::Scheduler);
    server.register(scheduler.clone(), BTreeMap::new()).await.unwrap();

    let coordinator =
        ServiceLivenessCoordinator::new(ServerConfig::default(), server.server().id.clone(), store.clone());
    let disconnected = coordinator
        .transition_all_non_responding_services(after_timeouts())
        .await
        .unwrap();

    assert!(disconnected.is_empty());
    assert_eq!(
        store.find_by_id("scheduler").await.unwrap().unwrap().state,
        ServiceState::Created
    );
}

#[tokio::test]
async fn test_worker_lifecycle_is_published_and_retired() {
    let store = Arc::new(InMemoryServiceInstanceStore::new());
    let server = Arc::new(manager(ServerType::Worker, store.clone()));
    let events = ServiceEventPublisher::default();

    let results: Arc<InMemoryQueue<WorkerTaskResult>> = Arc::new(InMemoryQueue::new("results"));
    let worker = Arc::new(Worker::new(WorkerConfig::default(), results).with_events(events.clone()));
    let registered = server
        .register(worker.clone(), BTreeMap::from([("worker.group".to_string(), "gpu".into())]))
        .await
        .unwrap();
    assert_eq!(registered.state, ServiceState::Created);
    let listener = server.spawn_event_listener(&events);

    let tasks: InMemoryQueue<WorkerTask> = InMemoryQueue::new("tasks");
    worker.start(&tasks);
    wait_for_state(&store, &registered.id, ServiceState::Running).await;

    worker.close().await.unwrap();
    wait_for_state(&store, &registered.id, ServiceState::TerminatedGracefully).await;

    let coordinator = ServiceLivenessCoordinator::new(ServerConfig::default(), "coordinator", store.clone());
    coordinator.on_schedule(Utc::now()).await.unwrap();
    let retired = store.find_by_id(&registered.id).await.unwrap().unwrap();
    assert_eq!(retired.state, ServiceState::Empty);
    assert_eq!(retired.props["worker.group"], "gpu");
    let states: Vec<_> = retired.events.iter().map(|event| event.state).collect();
    assert_eq!(
        states,
        vec![
            ServiceState::Created,
            ServiceState::Running,
            ServiceState::Terminating,
            ServiceState::TerminatedGracefully,
            ServiceState::NotRunning,
            ServiceState::Empty,
        ]
    );

    // the local copy stops fighting the retired record
    server.on_schedule(Utc::now()).await.unwrap();
    assert!(!server.registry().get(ServiceType::Worker).unwrap().is_state_updatable);
    assert!(server.shutdown().skip_graceful_termination());

    listener.abort();
}
