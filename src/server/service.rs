//! # Services
//!
//! A service is a long running component of a server (executor, worker, scheduler...) whose
//! lifecycle is published to the other servers through its [`ServiceInstance`] record.
//!
//! [`ServiceInstance`]: super::ServiceInstance

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    Executor,
    Indexer,
    Scheduler,
    Webserver,
    Worker,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executor => "EXECUTOR",
            Self::Indexer => "INDEXER",
            Self::Scheduler => "SCHEDULER",
            Self::Webserver => "WEBSERVER",
            Self::Worker => "WORKER",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a service instance.
///
/// ```text
/// CREATED -> RUNNING, ERROR, DISCONNECTED
/// RUNNING -> ERROR, DISCONNECTED, TERMINATING
/// ERROR -> TERMINATING
/// DISCONNECTED -> TERMINATING, NOT_RUNNING
/// TERMINATING -> TERMINATED_GRACEFULLY, TERMINATED_FORCED, NOT_RUNNING
/// TERMINATED_GRACEFULLY, TERMINATED_FORCED -> NOT_RUNNING
/// NOT_RUNNING -> EMPTY
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    Created,
    Running,
    Error,
    Disconnected,
    Terminating,
    TerminatedGracefully,
    TerminatedForced,
    NotRunning,
    Empty,
}

impl ServiceState {
    pub const ALL: [ServiceState; 9] = [
        Self::Created,
        Self::Running,
        Self::Error,
        Self::Disconnected,
        Self::Terminating,
        Self::TerminatedGracefully,
        Self::TerminatedForced,
        Self::NotRunning,
        Self::Empty,
    ];

    /// Targets reachable from this state, itself excluded
    pub fn allowed_transitions(&self) -> &'static [ServiceState] {
        use ServiceState::*;
        match self {
            Created => &[Running, Error, Disconnected],
            Running => &[Error, Disconnected, Terminating],
            Error => &[Terminating],
            Disconnected => &[Terminating, NotRunning],
            Terminating => &[TerminatedGracefully, TerminatedForced, NotRunning],
            TerminatedGracefully | TerminatedForced => &[NotRunning],
            NotRunning => &[Empty],
            Empty => &[],
        }
    }

    /// Self transitions are always valid, they are heartbeats
    pub fn is_valid_transition(&self, new_state: ServiceState) -> bool {
        *self == new_state || self.allowed_transitions().contains(&new_state)
    }

    pub fn has_completed_termination(&self) -> bool {
        matches!(
            self,
            Self::TerminatedGracefully | Self::TerminatedForced | Self::NotRunning | Self::Empty
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Created | Self::Running)
    }

    pub fn is_disconnected_or_terminating(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Terminating)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Error => "ERROR",
            Self::Disconnected => "DISCONNECTED",
            Self::Terminating => "TERMINATING",
            Self::TerminatedGracefully => "TERMINATED_GRACEFULLY",
            Self::TerminatedForced => "TERMINATED_FORCED",
            Self::NotRunning => "NOT_RUNNING",
            Self::Empty => "EMPTY",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A locally running service
#[async_trait]
pub trait Service: Send + Sync {
    fn id(&self) -> &str;

    fn service_type(&self) -> ServiceType;

    fn state(&self) -> ServiceState;

    /// Gauges published with every heartbeat
    fn metrics(&self) -> BTreeMap<String, f64> {
        BTreeMap::new()
    }

    /// Asks the next `close` not to wait for in-flight work
    fn skip_graceful_termination(&self, _skip: bool) {}

    async fn close(&self) -> Result<()>;
}
