//! Broadcast of local service state changes, consumed by the liveness manager.
//!
//! ```rust
//! use conductor_core::server::{ServiceEventPublisher, ServiceState, ServiceStateChangeEvent, ServiceType};
//!
//! # tokio_test::block_on(async {
//! let publisher = ServiceEventPublisher::default();
//! let mut events = publisher.subscribe();
//!
//! publisher.publish(ServiceStateChangeEvent::new("worker-1", ServiceType::Worker, ServiceState::Running));
//! assert_eq!(events.recv().await.unwrap().state, ServiceState::Running);
//! # });
//! ```

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use super::service::{ServiceState, ServiceType};

/// A local service moved to `state`
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceStateChangeEvent {
    pub service_id: String,
    pub service_type: ServiceType,
    pub state: ServiceState,
    pub occurred_at: DateTime<Utc>,
}

impl ServiceStateChangeEvent {
    pub fn new(service_id: impl Into<String>, service_type: ServiceType, state: ServiceState) -> Self {
        Self {
            service_id: service_id.into(),
            service_type,
            state,
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceEventPublisher {
    sender: broadcast::Sender<ServiceStateChangeEvent>,
}

impl ServiceEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishing without subscribers is not an error
    pub fn publish(&self, event: ServiceStateChangeEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("No subscriber for service state change event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceStateChangeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ServiceEventPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}
