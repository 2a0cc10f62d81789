//! # Service Instance Store
//!
//! Persistence of [`ServiceInstance`] records shared by all servers. Implementations must
//! run the check and the write of [`ServiceInstanceStore::may_transition_service_to`]
//! atomically for a given id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::service::ServiceState;
use super::service_instance::ServiceInstance;
use super::state_transition::{maybe_transition, TransitionResponse};
use crate::error::Result;

#[async_trait]
pub trait ServiceInstanceStore: Send + Sync {
    /// Unconditional write
    async fn save(&self, instance: ServiceInstance) -> Result<ServiceInstance>;

    async fn find_by_id(&self, id: &str) -> Result<Option<ServiceInstance>>;

    async fn find_all(&self) -> Result<Vec<ServiceInstance>>;

    async fn find_all_instances_in_states(
        &self,
        states: &[ServiceState],
    ) -> Result<Vec<ServiceInstance>>;

    async fn may_transition_service_to(
        &self,
        instance: &ServiceInstance,
        new_state: ServiceState,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TransitionResponse>;

    async fn find_all_instances_in_state(&self, state: ServiceState) -> Result<Vec<ServiceInstance>> {
        self.find_all_instances_in_states(&[state]).await
    }

    /// CREATED or RUNNING instances whose session timeout elapsed at `now`
    async fn find_all_timeout_running_instances(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ServiceInstance>> {
        let running = self
            .find_all_instances_in_states(&[ServiceState::Created, ServiceState::Running])
            .await?;
        Ok(running
            .into_iter()
            .filter(|instance| instance.is_session_timeout_elapsed(now))
            .collect())
    }
}

/// Single process store
#[derive(Debug, Default)]
pub struct InMemoryServiceInstanceStore {
    instances: DashMap<String, ServiceInstance>,
}

impl InMemoryServiceInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[async_trait]
impl ServiceInstanceStore for InMemoryServiceInstanceStore {
    async fn save(&self, instance: ServiceInstance) -> Result<ServiceInstance> {
        self.instances.insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ServiceInstance>> {
        Ok(self.instances.get(id).map(|entry| entry.value().clone()))
    }

    async fn find_all(&self) -> Result<Vec<ServiceInstance>> {
        let mut instances: Vec<_> = self
            .instances
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        instances.sort_by_key(|instance| instance.created_at);
        Ok(instances)
    }

    async fn find_all_instances_in_states(
        &self,
        states: &[ServiceState],
    ) -> Result<Vec<ServiceInstance>> {
        let all = self.find_all().await?;
        Ok(all
            .into_iter()
            .filter(|instance| states.contains(&instance.state))
            .collect())
    }

    async fn may_transition_service_to(
        &self,
        instance: &ServiceInstance,
        new_state: ServiceState,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TransitionResponse> {
        // the entry guard holds the shard lock for the whole check and write
        match self.instances.entry(instance.id.clone()) {
            Entry::Vacant(_) => Ok(maybe_transition(None, instance, new_state, reason, now)),
            Entry::Occupied(mut entry) => {
                let response = maybe_transition(Some(entry.get()), instance, new_state, reason, now);
                if let (true, Some(updated)) = (response.is_succeed(), &response.instance) {
                    entry.insert(updated.clone());
                }
                Ok(response)
            }
        }
    }
}
