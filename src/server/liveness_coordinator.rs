//! # Service Liveness Coordinator
//!
//! Peer side of the liveness protocol. Each cycle scans the shared store and moves the
//! records of services that stopped heartbeating towards EMPTY:
//!
//! 1. RUNNING or CREATED services past their session timeout become DISCONNECTED
//! 2. Workers that disappeared uncleanly have their tasks resubmitted, then become NOT_RUNNING
//! 3. Other services stuck terminating past the grace period become NOT_RUNNING
//! 4. NOT_RUNNING records become EMPTY
//!
//! Every transition is attempted on its own; a failure is logged and the scan goes on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::liveness_task::{LivenessTask, ScheduleTracker};
use super::service::{ServiceState, ServiceType};
use super::service_instance::ServiceInstance;
use super::store::ServiceInstanceStore;
use crate::config::{ServerConfig, WorkerTaskRestartStrategy};
use crate::error::Result;

const MAX_SCHEDULE_JITTER_MS: u64 = 500;

pub const DISCONNECTED_REASON: &str = "The service was detected as non-responsive after the session timeout. Service transitioned to the 'DISCONNECTED' state.";

pub const NOT_RUNNING_REASON: &str = "The service was detected as non-responsive or terminated after termination grace period. Service transitioned to the 'NOT_RUNNING' state.";

/// Hands the tasks of a lost worker back to the queue
#[async_trait]
pub trait WorkerJobResubmitter: Send + Sync {
    async fn resubmit(&self, worker: &ServiceInstance) -> Result<()>;
}

pub struct ServiceLivenessCoordinator {
    config: ServerConfig,
    server_id: String,
    store: Arc<dyn ServiceInstanceStore>,
    resubmitter: Option<Arc<dyn WorkerJobResubmitter>>,
    tracker: ScheduleTracker,
}

impl ServiceLivenessCoordinator {
    /// `server_id` is the server hosting this coordinator, its services are never checked
    pub fn new(
        config: ServerConfig,
        server_id: impl Into<String>,
        store: Arc<dyn ServiceInstanceStore>,
    ) -> Self {
        Self {
            tracker: ScheduleTracker::new(config.liveness.timeout()),
            config,
            server_id: server_id.into(),
            store,
            resubmitter: None,
        }
    }

    pub fn with_resubmitter(mut self, resubmitter: Arc<dyn WorkerJobResubmitter>) -> Self {
        self.resubmitter = Some(resubmitter);
        self
    }

    /// Moves every unresponsive peer to DISCONNECTED and returns the updated records
    pub async fn transition_all_non_responding_services(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ServiceInstance>> {
        let candidates: Vec<_> = self
            .store
            .find_all_timeout_running_instances(now)
            .await?
            .into_iter()
            .filter(|instance| instance.is_liveness_enabled())
            .filter(|instance| instance.server.id != self.server_id)
            .filter(|instance| instance.is_initial_delay_elapsed(now))
            .collect();

        let mut disconnected = Vec::with_capacity(candidates.len());
        for instance in candidates {
            warn!(
                service_id = %instance.id,
                service_type = %instance.service_type,
                last_update = %instance.updated_at,
                "Service did not heartbeat within its session timeout"
            );
            let Some(updated) = self
                .safely_transition(&instance, ServiceState::Disconnected, Some(DISCONNECTED_REASON), now)
                .await
            else {
                continue;
            };

            if updated.service_type == ServiceType::Worker
                && self.config.worker_task_restart_strategy == WorkerTaskRestartStrategy::Immediately
            {
                self.resubmit(&updated).await;
            }
            disconnected.push(updated);
        }

        Ok(disconnected)
    }

    async fn handle_terminated_workers(&self, now: DateTime<Utc>) -> Result<()> {
        let workers = self
            .store
            .find_all_instances_in_states(&[
                ServiceState::Disconnected,
                ServiceState::Terminating,
                ServiceState::TerminatedGracefully,
                ServiceState::TerminatedForced,
            ])
            .await?
            .into_iter()
            .filter(|instance| instance.service_type == ServiceType::Worker);

        for worker in workers {
            let unclean = (worker.state.is_disconnected_or_terminating()
                && worker.is_termination_grace_period_elapsed(now))
                || worker.state == ServiceState::TerminatedForced;

            if unclean {
                if self.should_resubmit(worker.state) {
                    self.resubmit(&worker).await;
                }
                self.safely_transition(&worker, ServiceState::NotRunning, Some(NOT_RUNNING_REASON), now)
                    .await;
            } else if worker.state == ServiceState::TerminatedGracefully {
                self.safely_transition(&worker, ServiceState::NotRunning, None, now)
                    .await;
            }
        }

        Ok(())
    }

    /// Tasks of a worker disconnected with the IMMEDIATELY strategy were already resubmitted
    fn should_resubmit(&self, state: ServiceState) -> bool {
        match self.config.worker_task_restart_strategy {
            WorkerTaskRestartStrategy::Never => false,
            WorkerTaskRestartStrategy::AfterTerminationGracePeriod => true,
            WorkerTaskRestartStrategy::Immediately => state != ServiceState::Disconnected,
        }
    }

    async fn handle_terminated_services(&self, now: DateTime<Utc>) -> Result<()> {
        let services = self
            .store
            .find_all_instances_in_states(&[
                ServiceState::Disconnected,
                ServiceState::Terminating,
                ServiceState::TerminatedGracefully,
                ServiceState::TerminatedForced,
            ])
            .await?;

        for service in services {
            if service.service_type != ServiceType::Worker
                && service.is_termination_grace_period_elapsed(now)
            {
                self.safely_transition(&service, ServiceState::NotRunning, Some(NOT_RUNNING_REASON), now)
                    .await;
            }
        }

        Ok(())
    }

    async fn cleanup_not_running_services(&self, now: DateTime<Utc>) -> Result<()> {
        let not_running = self
            .store
            .find_all_instances_in_state(ServiceState::NotRunning)
            .await?;
        for instance in not_running {
            self.safely_transition(&instance, ServiceState::Empty, None, now)
                .await;
        }
        Ok(())
    }

    /// Logs the services connected since the previous cycle
    pub async fn may_detect_and_log_new_connected_services(&self) -> Result<Vec<ServiceInstance>> {
        let Some(since) = self.tracker.last_scheduled_execution() else {
            return Ok(Vec::new());
        };

        let connected: Vec<_> = self
            .store
            .find_all_instances_in_states(&[ServiceState::Created, ServiceState::Running])
            .await?
            .into_iter()
            .filter(|instance| instance.created_at > since)
            .collect();

        for instance in &connected {
            info!(
                service_id = %instance.id,
                service_type = %instance.service_type,
                server_id = %instance.server.id,
                "New service connected"
            );
        }
        Ok(connected)
    }

    async fn safely_transition(
        &self,
        instance: &ServiceInstance,
        state: ServiceState,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<ServiceInstance> {
        match self
            .store
            .may_transition_service_to(instance, state, reason, now)
            .await
        {
            Ok(response) if response.is_succeed() => {
                info!(
                    service_id = %instance.id,
                    service_type = %instance.service_type,
                    from = %instance.state,
                    to = %state,
                    "Service state transitioned"
                );
                response.instance
            }
            Ok(response) => {
                debug!(
                    service_id = %instance.id,
                    to = %state,
                    result = ?response.result,
                    "Service state transition not applied"
                );
                None
            }
            Err(e) => {
                error!(
                    service_id = %instance.id,
                    to = %state,
                    error = %e,
                    "Unable to transition service state"
                );
                None
            }
        }
    }

    async fn resubmit(&self, worker: &ServiceInstance) {
        let Some(resubmitter) = &self.resubmitter else {
            debug!(service_id = %worker.id, "No resubmitter, worker tasks left as is");
            return;
        };
        if let Err(e) = resubmitter.resubmit(worker).await {
            error!(service_id = %worker.id, error = %e, "Unable to resubmit worker tasks");
        }
    }
}

#[async_trait]
impl LivenessTask for ServiceLivenessCoordinator {
    fn name(&self) -> &str {
        "service-liveness-coordinator"
    }

    /// Base interval plus jitter, so that coordinators on several servers spread out
    fn schedule_interval(&self) -> Duration {
        let jitter = rand::thread_rng().gen_range(0..=MAX_SCHEDULE_JITTER_MS);
        self.config.liveness.interval() + Duration::from_millis(jitter)
    }

    fn tracker(&self) -> &ScheduleTracker {
        &self.tracker
    }

    async fn on_schedule(&self, now: DateTime<Utc>) -> Result<()> {
        self.transition_all_non_responding_services(now).await?;
        self.handle_terminated_workers(now).await?;
        self.handle_terminated_services(now).await?;
        self.cleanup_not_running_services(now).await?;
        self.may_detect_and_log_new_connected_services().await?;
        Ok(())
    }
}
