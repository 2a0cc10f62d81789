//! Log lines produced by task bodies and by the executor recovery path.
//!
//! These are user facing records attached to an execution, distinct from the process
//! diagnostics emitted through `tracing`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::execution::Execution;
use super::task_run::TaskRun;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        };
        f.write_str(level)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub namespace: String,
    pub flow_id: String,
    pub execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_number: Option<usize>,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    /// Entry attached to the execution itself
    pub fn of_execution(execution: &Execution, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            namespace: execution.namespace.clone(),
            flow_id: execution.flow_id.clone(),
            execution_id: execution.id.clone(),
            task_id: None,
            task_run_id: None,
            attempt_number: None,
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Entry attached to the current attempt of a task run
    pub fn of_task_run(task_run: &TaskRun, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            namespace: task_run.namespace.clone(),
            flow_id: task_run.flow_id.clone(),
            execution_id: task_run.execution_id.clone(),
            task_id: Some(task_run.task_id.clone()),
            task_run_id: Some(task_run.id.clone()),
            attempt_number: Some(task_run.attempt_number()),
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// ERROR entries describing `error` and its whole source chain
    pub fn from_error(template: &LogEntry, error: &(dyn std::error::Error + 'static)) -> Vec<LogEntry> {
        let mut entries = vec![LogEntry {
            level: LogLevel::Error,
            message: error.to_string(),
            ..template.clone()
        }];
        let mut source = error.source();
        while let Some(cause) = source {
            entries.push(LogEntry {
                level: LogLevel::Error,
                message: format!("Caused by: {cause}"),
                ..template.clone()
            });
            source = cause.source();
        }
        entries
    }
}
