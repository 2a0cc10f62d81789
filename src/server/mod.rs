//! # Server Services and Liveness
//!
//! Local services publish their lifecycle to a shared [`ServiceInstanceStore`] through the
//! [`ServiceLivenessManager`]; the [`ServiceLivenessCoordinator`] of any server detects the
//! peers that stopped heartbeating and retires their records.
//!
//! ```text
//! Service --state change--> ServiceEventPublisher --> ServiceLivenessManager
//!                                                          |  heartbeat / transition
//!                                                          v
//!                         ServiceLivenessCoordinator --> ServiceInstanceStore
//! ```

pub mod events;
pub mod liveness_coordinator;
pub mod liveness_manager;
pub mod liveness_task;
pub mod registry;
pub mod service;
pub mod service_instance;
pub mod shutdown;
pub mod state_transition;
pub mod store;

pub use events::{ServiceEventPublisher, ServiceStateChangeEvent};
pub use liveness_coordinator::{ServiceLivenessCoordinator, WorkerJobResubmitter};
pub use liveness_manager::{
    DefaultTransitionFailureHandler, ServiceLivenessManager, TransitionFailure,
    TransitionFailureHandler,
};
pub use liveness_task::{LivenessTask, LivenessTaskHandle, ScheduleTracker};
pub use registry::{LocalServiceState, ServiceRegistry};
pub use service::{Service, ServiceState, ServiceType};
pub use service_instance::{
    ServerInstance, ServerType, ServiceInstance, TimestampedEvent, SERVICE_STATE_UPDATED_EVENT,
};
pub use shutdown::ShutdownSignal;
pub use state_transition::{maybe_transition, TransitionResponse, TransitionResult};
pub use store::{InMemoryServiceInstanceStore, ServiceInstanceStore};
