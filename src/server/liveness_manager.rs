//! # Service Liveness Manager
//!
//! Publishes the state of the local services to the shared store: a heartbeat on every
//! schedule, and a transition each time a local service reports a state change.
//!
//! Updates are serialized by one lock and written with an optimistic transition keyed on
//! the record id. The failure handler runs after the lock is released, since it may
//! trigger further updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::events::{ServiceEventPublisher, ServiceStateChangeEvent};
use super::liveness_task::{LivenessTask, ScheduleTracker};
use super::registry::{LocalServiceState, ServiceRegistry};
use super::service::{Service, ServiceState, ServiceType};
use super::service_instance::{ServerInstance, ServerType, ServiceInstance};
use super::shutdown::ShutdownSignal;
use super::state_transition::TransitionResult;
use super::store::ServiceInstanceStore;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::logging::log_service_operation;
use crate::utils::to_chrono;

/// A remote transition that was refused for a reason other than a stale record
#[derive(Clone)]
pub struct TransitionFailure {
    pub now: DateTime<Utc>,
    pub service: Arc<dyn Service>,
    pub new_state: ServiceState,
    /// Local copy the transition was attempted from
    pub local: ServiceInstance,
    /// Stored copy that refused it
    pub remote: Option<ServiceInstance>,
}

impl TransitionFailure {
    /// State of the stored copy, the local one when unknown
    pub fn remote_state(&self) -> ServiceState {
        self.remote
            .as_ref()
            .map_or(self.local.state, |remote| remote.state)
    }
}

impl std::fmt::Debug for TransitionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionFailure")
            .field("now", &self.now)
            .field("service_id", &self.service.id())
            .field("new_state", &self.new_state)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .finish()
    }
}

#[async_trait]
pub trait TransitionFailureHandler: Send + Sync {
    async fn on_failure(&self, manager: &ServiceLivenessManager, failure: TransitionFailure);
}

/// Standalone servers and webservers are forced back to RUNNING, they must never be
/// stopped from the outside. Any other service shuts the process down when liveness is
/// enabled or when the stored record is in ERROR.
#[derive(Debug, Default)]
pub struct DefaultTransitionFailureHandler;

#[async_trait]
impl TransitionFailureHandler for DefaultTransitionFailureHandler {
    async fn on_failure(&self, manager: &ServiceLivenessManager, failure: TransitionFailure) {
        let remote_state = failure.remote_state();

        if manager.server().server_type == ServerType::Standalone
            || failure.service.service_type() == ServiceType::Webserver
        {
            warn!(
                service_id = %failure.service.id(),
                service_type = %failure.service.service_type(),
                remote_state = %remote_state,
                "Service state transition refused, forcing the service back to RUNNING"
            );
            let base = failure.remote.as_ref().unwrap_or(&failure.local);
            let reason = format!(
                "Service was forced back to the 'RUNNING' state after the transition to '{}' was refused.",
                failure.new_state
            );
            if let Err(e) = manager
                .force_state(base, ServiceState::Running, failure.now, Some(&reason))
                .await
            {
                error!(service_id = %failure.service.id(), error = %e, "Unable to force service state");
            }
            return;
        }

        if manager.config().liveness.enabled || remote_state == ServiceState::Error {
            // the tasks of a NOT_RUNNING service were already handed to other workers
            let skip_graceful_termination =
                matches!(remote_state, ServiceState::NotRunning | ServiceState::Empty);
            error!(
                service_id = %failure.service.id(),
                service_type = %failure.service.service_type(),
                remote_state = %remote_state,
                skip_graceful_termination,
                "Service state transition refused by the cluster, shutting down"
            );
            manager.shutdown().trigger(skip_graceful_termination);
        }
    }
}

enum UpdateOutcome {
    Updated(ServiceInstance),
    Skipped,
    Failed(TransitionFailure),
}

pub struct ServiceLivenessManager {
    config: ServerConfig,
    server: ServerInstance,
    registry: Arc<ServiceRegistry>,
    store: Arc<dyn ServiceInstanceStore>,
    shutdown: ShutdownSignal,
    failure_handler: Arc<dyn TransitionFailureHandler>,
    state_lock: tokio::sync::Mutex<()>,
    last_succeed_state_updated: parking_lot::Mutex<Option<DateTime<Utc>>>,
    tracker: ScheduleTracker,
}

impl ServiceLivenessManager {
    pub fn new(
        config: ServerConfig,
        server: ServerInstance,
        registry: Arc<ServiceRegistry>,
        store: Arc<dyn ServiceInstanceStore>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            tracker: ScheduleTracker::new(config.liveness.timeout()),
            config,
            server,
            registry,
            store,
            shutdown,
            failure_handler: Arc::new(DefaultTransitionFailureHandler),
            state_lock: tokio::sync::Mutex::new(()),
            last_succeed_state_updated: parking_lot::Mutex::new(None),
        }
    }

    pub fn with_failure_handler(mut self, handler: Arc<dyn TransitionFailureHandler>) -> Self {
        self.failure_handler = handler;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn server(&self) -> &ServerInstance {
        &self.server
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    pub fn last_succeed_state_updated(&self) -> Option<DateTime<Utc>> {
        *self.last_succeed_state_updated.lock()
    }

    /// Creates and stores the record of a local service
    pub async fn register(
        &self,
        service: Arc<dyn Service>,
        props: BTreeMap<String, Value>,
    ) -> Result<ServiceInstance> {
        let instance = ServiceInstance::create(
            service.as_ref(),
            self.server.clone(),
            self.config.clone(),
            props,
            Utc::now(),
        );
        let saved = self.store.save(instance).await?;
        self.registry
            .register(LocalServiceState::new(service, saved.clone()));
        log_service_operation(
            "register",
            &saved.id,
            saved.service_type.as_str(),
            saved.state.as_str(),
            None,
        );
        Ok(saved)
    }

    /// Forwards the state changes published by the local services until the publisher is
    /// dropped
    pub fn spawn_event_listener(self: &Arc<Self>, publisher: &ServiceEventPublisher) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut receiver = publisher.subscribe();

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if let Err(e) = manager.on_service_state_changed(event).await {
                            error!(error = %e, "Unable to publish service state change");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Service state change events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn on_service_state_changed(&self, event: ServiceStateChangeEvent) -> Result<()> {
        let Some(local) = self.registry.get(event.service_type) else {
            debug!(service_id = %event.service_id, "State change of an unregistered service");
            return Ok(());
        };
        if local.service.id() != event.service_id {
            debug!(service_id = %event.service_id, "State change of an unknown service instance");
            return Ok(());
        }

        self.update_service_instance_state(event.occurred_at, local.service, Some(event.state))
            .await
            .map(|_| ())
    }

    /// Moves the shared record of `service` to `new_state`, or refreshes it in its current
    /// state when `None`. Returns the stored record when the update went through.
    pub async fn update_service_instance_state(
        &self,
        now: DateTime<Utc>,
        service: Arc<dyn Service>,
        new_state: Option<ServiceState>,
    ) -> Result<Option<ServiceInstance>> {
        let outcome = {
            let _guard = self.state_lock.lock().await;
            self.try_update_locked(now, service.as_ref(), new_state).await?
        };

        match outcome {
            UpdateOutcome::Updated(instance) => Ok(Some(instance)),
            UpdateOutcome::Skipped => Ok(None),
            UpdateOutcome::Failed(failure) => {
                self.failure_handler.on_failure(self, failure).await;
                Ok(None)
            }
        }
    }

    async fn try_update_locked(
        &self,
        now: DateTime<Utc>,
        service: &dyn Service,
        new_state: Option<ServiceState>,
    ) -> Result<UpdateOutcome> {
        let Some(local) = self.registry.get(service.service_type()) else {
            debug!(service_id = %service.id(), "Service not registered, state not updated");
            return Ok(UpdateOutcome::Skipped);
        };
        if !local.is_state_updatable {
            debug!(service_id = %service.id(), "Service state updates are disabled");
            return Ok(UpdateOutcome::Skipped);
        }

        let target = new_state.unwrap_or(local.instance.state);
        if !local.instance.state.is_valid_transition(target) {
            warn!(
                service_id = %service.id(),
                from = %local.instance.state,
                to = %target,
                "Invalid local service state transition, ignored"
            );
            self.may_disable_state_update(&local.instance);
            return Ok(UpdateOutcome::Skipped);
        }

        let local_instance = local
            .instance
            .with_server(self.server.clone())
            .with_metrics(service.metrics());
        let response = self
            .store
            .may_transition_service_to(&local_instance, target, None, now)
            .await?;

        match (response.result, response.instance) {
            (TransitionResult::Succeed, Some(updated)) => {
                self.on_updated(&updated, now);
                Ok(UpdateOutcome::Updated(updated))
            }
            (TransitionResult::Aborted, _) | (TransitionResult::Succeed, None) => {
                // first write of this record
                let saved = self
                    .store
                    .save(local_instance.state(target, now, None))
                    .await?;
                self.on_updated(&saved, now);
                Ok(UpdateOutcome::Updated(saved))
            }
            (TransitionResult::Failed, Some(remote)) if remote.seq_id < local_instance.seq_id => {
                debug!(
                    service_id = %service.id(),
                    remote_seq_id = remote.seq_id,
                    local_seq_id = local_instance.seq_id,
                    "Stored service record is stale, overwriting it"
                );
                let saved = self
                    .store
                    .save(local_instance.state(target, now, None))
                    .await?;
                self.on_updated(&saved, now);
                Ok(UpdateOutcome::Updated(saved))
            }
            (TransitionResult::Failed, remote) => {
                warn!(
                    service_id = %service.id(),
                    local_state = %local_instance.state,
                    remote_state = ?remote.as_ref().map(|r| r.state),
                    target = %target,
                    "Service state transition refused by the store"
                );
                self.may_disable_state_update(remote.as_ref().unwrap_or(&local_instance));
                if let Some(remote) = &remote {
                    // the stored record wins, later heartbeats start from it
                    self.registry.update_instance(remote.clone());
                }
                Ok(UpdateOutcome::Failed(TransitionFailure {
                    now,
                    service: Arc::clone(&local.service),
                    new_state: target,
                    local: local_instance,
                    remote,
                }))
            }
        }
    }

    fn on_updated(&self, instance: &ServiceInstance, now: DateTime<Utc>) {
        self.registry.update_instance(instance.clone());
        *self.last_succeed_state_updated.lock() = Some(now);
        log_service_operation(
            "state",
            &instance.id,
            instance.service_type.as_str(),
            instance.state.as_str(),
            None,
        );
    }

    /// Stops fighting a record that already completed its termination
    fn may_disable_state_update(&self, instance: &ServiceInstance) {
        if instance.state.has_completed_termination() {
            info!(
                service_id = %instance.id,
                state = %instance.state,
                "Service record completed its termination, disabling state updates"
            );
            self.registry.disable_state_update(instance.service_type);
        }
    }

    /// Writes `base` in `state` without transition check
    pub async fn force_state(
        &self,
        base: &ServiceInstance,
        state: ServiceState,
        now: DateTime<Utc>,
        reason: Option<&str>,
    ) -> Result<ServiceInstance> {
        let saved = self
            .store
            .save(base.with_server(self.server.clone()).state(state, now, reason))
            .await?;
        self.on_updated(&saved, now);
        Ok(saved)
    }

    /// Closes every local service, one at a time; failures are logged
    pub async fn close(&self) {
        let skip = self.shutdown.skip_graceful_termination();
        for local in self.registry.all() {
            local.service.skip_graceful_termination(skip);
            if let Err(e) = local.service.close().await {
                error!(
                    service_id = %local.service.id(),
                    service_type = %local.service.service_type(),
                    error = %e,
                    "Unable to close service"
                );
            }
        }
    }
}

#[async_trait]
impl LivenessTask for ServiceLivenessManager {
    fn name(&self) -> &str {
        "service-liveness-manager"
    }

    fn schedule_interval(&self) -> Duration {
        self.config.liveness.heartbeat_interval()
    }

    fn tracker(&self) -> &ScheduleTracker {
        &self.tracker
    }

    async fn on_schedule(&self, now: DateTime<Utc>) -> Result<()> {
        if let Some(last) = self.last_succeed_state_updated() {
            if now - last > to_chrono(self.config.liveness.timeout()) {
                warn!(
                    last_succeed_state_updated = %last,
                    "No service state update succeeded within the session timeout"
                );
            }
        }

        for local in self.registry.all() {
            if !local.is_state_updatable {
                continue;
            }
            if let Err(e) = self
                .update_service_instance_state(now, Arc::clone(&local.service), None)
                .await
            {
                error!(
                    service_id = %local.service.id(),
                    error = %e,
                    "Heartbeat failed"
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::service_instance::tests::StaticService;
    use crate::server::store::InMemoryServiceInstanceStore;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn manager(
        server_type: ServerType,
        store: Arc<InMemoryServiceInstanceStore>,
    ) -> ServiceLivenessManager {
        ServiceLivenessManager::new(
            ServerConfig::default(),
            ServerInstance::new(server_type),
            Arc::new(ServiceRegistry::new()),
            store,
            ShutdownSignal::new(),
        )
    }

    fn service(service_type: ServiceType, state: ServiceState) -> Arc<dyn Service> {
        Arc::new(StaticService {
            id: format!("{service_type}-1"),
            service_type,
            state,
        })
    }

    #[tokio::test]
    async fn test_register_then_transition() {
        let store = Arc::new(InMemoryServiceInstanceStore::new());
        let manager = manager(ServerType::Executor, store.clone());
        let service = service(ServiceType::Executor, ServiceState::Created);

        let registered = manager.register(Arc::clone(&service), BTreeMap::new()).await.unwrap();
        assert_eq!(registered.seq_id, 0);

        let updated = manager
            .update_service_instance_state(Utc::now(), Arc::clone(&service), Some(ServiceState::Running))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.state, ServiceState::Running);
        assert_eq!(updated.seq_id, 1);
        assert_eq!(store.find_by_id(service.id()).await.unwrap().unwrap(), updated);
        assert!(manager.last_succeed_state_updated().is_some());

        // heartbeat
        manager.on_schedule(Utc::now()).await.unwrap();
        assert_eq!(store.find_by_id(service.id()).await.unwrap().unwrap().seq_id, 2);
    }

    #[tokio::test]
    async fn test_missing_record_is_written() {
        let store = Arc::new(InMemoryServiceInstanceStore::new());
        let manager = manager(ServerType::Executor, Arc::new(InMemoryServiceInstanceStore::new()));
        let service = service(ServiceType::Executor, ServiceState::Created);
        manager.register(Arc::clone(&service), BTreeMap::new()).await.unwrap();

        // same registry, empty store
        let manager = ServiceLivenessManager::new(
            ServerConfig::default(),
            manager.server().clone(),
            Arc::clone(manager.registry()),
            store.clone(),
            ShutdownSignal::new(),
        );
        let saved = manager
            .update_service_instance_state(Utc::now(), Arc::clone(&service), Some(ServiceState::Running))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.state, ServiceState::Running);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_local_transition_does_not_reach_the_store() {
        let store = Arc::new(InMemoryServiceInstanceStore::new());
        let manager = manager(ServerType::Executor, store.clone());
        let service = service(ServiceType::Executor, ServiceState::Running);
        let registered = manager.register(Arc::clone(&service), BTreeMap::new()).await.unwrap();

        let result = manager
            .update_service_instance_state(Utc::now(), Arc::clone(&service), Some(ServiceState::Created))
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(store.find_by_id(service.id()).await.unwrap().unwrap(), registered);
    }

    #[tokio::test]
    async fn test_stale_remote_is_healed() {
        let store = Arc::new(InMemoryServiceInstanceStore::new());
        let manager = manager(ServerType::Executor, store.clone());
        let service = service(ServiceType::Executor, ServiceState::Running);
        let registered = manager.register(Arc::clone(&service), BTreeMap::new()).await.unwrap();

        let now = Utc::now();
        let local = registered
            .state(ServiceState::Running, now, None)
            .state(ServiceState::Running, now, None);
        manager.registry().update_instance(local.clone());
        store
            .save(registered.state(ServiceState::Disconnected, now, None))
            .await
            .unwrap();

        let healed = manager
            .update_service_instance_state(now, Arc::clone(&service), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(healed.state, ServiceState::Running);
        assert_eq!(healed.seq_id, local.seq_id + 1);
        assert!(!manager.shutdown().is_triggered());
    }

    #[tokio::test]
    async fn test_conflict_triggers_shutdown() {
        let store = Arc::new(InMemoryServiceInstanceStore::new());
        let manager = manager(ServerType::Executor, store.clone());
        let service = service(ServiceType::Executor, ServiceState::Running);
        let registered = manager.register(Arc::clone(&service), BTreeMap::new()).await.unwrap();

        let now = Utc::now();
        let mut remote = registered.state(ServiceState::Disconnected, now, None);
        remote = remote.state(ServiceState::NotRunning, now, None);
        store.save(remote).await.unwrap();

        let result = manager
            .update_service_instance_state(now, Arc::clone(&service), None)
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(manager.shutdown().is_triggered());
        assert!(manager.shutdown().skip_graceful_termination());
        assert!(!manager.registry().get(ServiceType::Executor).unwrap().is_state_updatable);
    }

    #[tokio::test]
    async fn test_standalone_is_forced_back_to_running() {
        let store = Arc::new(InMemoryServiceInstanceStore::new());
        let manager = manager(ServerType::Standalone, store.clone());
        let service = service(ServiceType::Executor, ServiceState::Running);
        let registered = manager.register(Arc::clone(&service), BTreeMap::new()).await.unwrap();

        let now = Utc::now();
        let remote = registered
            .state(ServiceState::Disconnected, now, None)
            .state(ServiceState::Disconnected, now, None);
        store.save(remote.clone()).await.unwrap();
        let local = registered.state(ServiceState::Running, now, None);
        manager.registry().update_instance(local);

        manager
            .update_service_instance_state(now, Arc::clone(&service), None)
            .await
            .unwrap();

        let stored = store.find_by_id(service.id()).await.unwrap().unwrap();
        assert_eq!(stored.state, ServiceState::Running);
        assert_eq!(stored.seq_id, remote.seq_id + 1);
        assert!(!manager.shutdown().is_triggered());
    }

    /// Re-enters the update path from the failure callback
    struct Reentrant {
        calls: AtomicUsize,
        reentered: AtomicBool,
        reentered_state: parking_lot::Mutex<Option<ServiceState>>,
    }

    #[async_trait]
    impl TransitionFailureHandler for Reentrant {
        async fn on_failure(&self, manager: &ServiceLivenessManager, failure: TransitionFailure) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.reentered.swap(true, Ordering::SeqCst) {
                let updated = manager
                    .update_service_instance_state(failure.now, failure.service, None)
                    .await;
                *self.reentered_state.lock() = updated.ok().flatten().map(|i| i.state);
            }
        }
    }

    #[tokio::test]
    async fn test_failure_handler_runs_outside_the_lock() {
        let store = Arc::new(InMemoryServiceInstanceStore::new());
        let handler = Arc::new(Reentrant {
            calls: AtomicUsize::new(0),
            reentered: AtomicBool::new(false),
            reentered_state: parking_lot::Mutex::new(None),
        });
        let manager = manager(ServerType::Executor, store.clone()).with_failure_handler(handler.clone());
        let service = service(ServiceType::Executor, ServiceState::Running);
        let registered = manager.register(Arc::clone(&service), BTreeMap::new()).await.unwrap();

        let now = Utc::now();
        let remote = registered
            .state(ServiceState::Error, now, None)
            .state(ServiceState::Error, now, None);
        store.save(remote).await.unwrap();

        tokio::time::timeout(
            Duration::from_secs(1),
            manager.update_service_instance_state(now, Arc::clone(&service), None),
        )
        .await
        .expect("the failure handler must not deadlock")
        .unwrap();
        // the re-entrant heartbeat starts from the adopted ERROR record and goes through
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*handler.reentered_state.lock(), Some(ServiceState::Error));
    }

    #[tokio::test]
    async fn test_refused_update_adopts_the_stored_record() {
        let store = Arc::new(InMemoryServiceInstanceStore::new());
        let config = ServerConfig {
            liveness: crate::config::LivenessConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let manager = ServiceLivenessManager::new(
            config,
            ServerInstance::new(ServerType::Executor),
            Arc::new(ServiceRegistry::new()),
            store.clone(),
            ShutdownSignal::new(),
        );
        let service = service(ServiceType::Executor, ServiceState::Running);
        let registered = manager.register(Arc::clone(&service), BTreeMap::new()).await.unwrap();

        let now = Utc::now();
        let local = registered.state(ServiceState::Running, now, None);
        manager.registry().update_instance(local.clone());
        let remote = local.state(ServiceState::Disconnected, now, None);
        store.save(remote.clone()).await.unwrap();

        let first = manager
            .update_service_instance_state(now, Arc::clone(&service), None)
            .await
            .unwrap();
        assert!(first.is_none());
        assert!(!manager.shutdown().is_triggered());
        let adopted = manager.registry().get(ServiceType::Executor).unwrap().instance;
        assert_eq!(adopted.seq_id, remote.seq_id);
        assert_eq!(adopted.state, ServiceState::Disconnected);

        let second = manager
            .update_service_instance_state(now, Arc::clone(&service), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.state, ServiceState::Disconnected);
        assert_eq!(second.seq_id, remote.seq_id + 1);
    }

    struct Closing {
        closed: AtomicBool,
        skip: AtomicBool,
    }

    #[async_trait]
    impl Service for Closing {
        fn id(&self) -> &str {
            "closing"
        }

        fn service_type(&self) -> ServiceType {
            ServiceType::Scheduler
        }

        fn state(&self) -> ServiceState {
            ServiceState::Running
        }

        fn skip_graceful_termination(&self, skip: bool) {
            self.skip.store(skip, Ordering::SeqCst);
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Err(crate::error::ConductorError::InvalidState("already closed".to_string()))
        }
    }

    #[tokio::test]
    async fn test_close_closes_every_service() {
        let store = Arc::new(InMemoryServiceInstanceStore::new());
        let manager = manager(ServerType::Executor, store);
        let closing = Arc::new(Closing {
            closed: AtomicBool::new(false),
            skip: AtomicBool::new(false),
        });
        manager.register(closing.clone(), BTreeMap::new()).await.unwrap();
        manager
            .register(service(ServiceType::Executor, ServiceState::Running), BTreeMap::new())
            .await
            .unwrap();

        manager.shutdown().trigger(true);
        manager.close().await;

        assert!(closing.closed.load(Ordering::SeqCst));
        assert!(closing.skip.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_events_drive_transitions() {
        let store = Arc::new(InMemoryServiceInstanceStore::new());
        let manager = Arc::new(manager(ServerType::Executor, store.clone()));
        let service = service(ServiceType::Executor, ServiceState::Created);
        manager.register(Arc::clone(&service), BTreeMap::new()).await.unwrap();

        let publisher = ServiceEventPublisher::default();
        let listener = manager.spawn_event_listener(&publisher);
        publisher.publish(ServiceStateChangeEvent::new(
            service.id(),
            ServiceType::Executor,
            ServiceState::Running,
        ));

        for _ in 0..100 {
            let stored = store.find_by_id(service.id()).await.unwrap().unwrap();
            if stored.state == ServiceState::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            store.find_by_id(service.id()).await.unwrap().unwrap().state,
            ServiceState::Running
        );

        drop(publisher);
        tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .unwrap()
            .unwrap();
    }
}
