//! # Service Registry
//!
//! The services running in this process, keyed by type, with the last known copy of their
//! shared record. Built once at startup and handed to the liveness manager.

use dashmap::DashMap;
use std::sync::Arc;

use super::service::{Service, ServiceType};
use super::service_instance::ServiceInstance;

/// A local service with its last known record
#[derive(Clone)]
pub struct LocalServiceState {
    pub service: Arc<dyn Service>,
    pub instance: ServiceInstance,
    /// Cleared once the shared record reached a terminal state that must not be overwritten
    pub is_state_updatable: bool,
}

impl LocalServiceState {
    pub fn new(service: Arc<dyn Service>, instance: ServiceInstance) -> Self {
        Self {
            service,
            instance,
            is_state_updatable: true,
        }
    }

    pub fn with_instance(&self, instance: ServiceInstance) -> Self {
        Self {
            instance,
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for LocalServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalServiceState")
            .field("service_id", &self.service.id())
            .field("instance", &self.instance)
            .field("is_state_updatable", &self.is_state_updatable)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: DashMap<ServiceType, LocalServiceState>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, state: LocalServiceState) {
        self.services.insert(state.service.service_type(), state);
    }

    pub fn unregister(&self, service_type: ServiceType) -> Option<LocalServiceState> {
        self.services.remove(&service_type).map(|(_, state)| state)
    }

    pub fn get(&self, service_type: ServiceType) -> Option<LocalServiceState> {
        self.services.get(&service_type).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, service_type: ServiceType) -> bool {
        self.services.contains_key(&service_type)
    }

    /// Replaces the known record of an already registered service
    pub fn update_instance(&self, instance: ServiceInstance) {
        if let Some(mut entry) = self.services.get_mut(&instance.service_type) {
            entry.instance = instance;
        }
    }

    pub fn disable_state_update(&self, service_type: ServiceType) {
        if let Some(mut entry) = self.services.get_mut(&service_type) {
            entry.is_state_updatable = false;
        }
    }

    /// Snapshot of every registered service, ordered by type
    pub fn all(&self) -> Vec<LocalServiceState> {
        let mut all: Vec<_> = self
            .services
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(|state| state.instance.service_type);
        all
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
