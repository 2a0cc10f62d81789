//! Error types for the Conductor core.
//!

use thiserror::Error;

use crate::runner::queue::QueueError;
use crate::validation::ConstraintViolations;

#[derive(Debug, Error)]
pub enum ConductorError {
    /// Lookup or invariant failure that indicates a bug rather than a retryable condition.
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Validation error: {0}")]
    Validation(#[from] ConstraintViolations),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("Store error: {0}")]
    Store(String),
    #[error("Render error: {0}")]
    Render(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConductorError {
    /// Lookup failure for a task run that is expected to be part of an execution.
    pub fn task_run_not_found(task_run_id: &str, execution_id: &str, state: &str) -> Self {
        ConductorError::Internal(format!(
            "Can't find taskrun with taskrunId '{task_run_id}' on execution '{execution_id}' {state}"
        ))
    }

    /// Lookup failure for a task id that is not part of a flow.
    pub fn task_not_found(task_id: &str, flow_uid: &str) -> Self {
        ConductorError::Internal(format!("Can't find task '{task_id}' on flow '{flow_uid}'"))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, ConductorError::Internal(_))
    }
}

impl From<config::ConfigError> for ConductorError {
    fn from(err: config::ConfigError) -> Self {
        ConductorError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConductorError>;
