//! Remote state transitions of service instances.
//!
//! Conflicts are outcomes, not errors: callers match on [`TransitionResult`].

use chrono::{DateTime, Utc};

use super::service::ServiceState;
use super::service_instance::ServiceInstance;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// The stored record moved to the new state
    Succeed,
    /// The stored record cannot move to the new state; the response carries it
    Failed,
    /// No stored record for this id
    Aborted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionResponse {
    pub result: TransitionResult,
    pub instance: Option<ServiceInstance>,
}

impl TransitionResponse {
    pub fn succeed(instance: ServiceInstance) -> Self {
        Self {
            result: TransitionResult::Succeed,
            instance: Some(instance),
        }
    }

    pub fn failed(instance: ServiceInstance) -> Self {
        Self {
            result: TransitionResult::Failed,
            instance: Some(instance),
        }
    }

    pub fn aborted() -> Self {
        Self {
            result: TransitionResult::Aborted,
            instance: None,
        }
    }

    pub fn is_succeed(&self) -> bool {
        self.result == TransitionResult::Succeed
    }
}

/// Transition of the stored record `from` to `new_state`, taking server and metrics from
/// the caller's copy `to`
pub fn maybe_transition(
    from: Option<&ServiceInstance>,
    to: &ServiceInstance,
    new_state: ServiceState,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> TransitionResponse {
    let Some(from) = from else {
        return TransitionResponse::aborted();
    };

    if from.state.is_valid_transition(new_state) {
        let updated = from
            .state(new_state, now, reason)
            .with_server(to.server.clone())
            .with_metrics(to.metrics.clone());
        return TransitionResponse::succeed(updated);
    }

    TransitionResponse::failed(from.clone())
}
