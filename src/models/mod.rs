//! # Models
//!
//! The persisted and wire-level records of the orchestration engine: flows and their
//! task trees, executions with their task runs, states and retry policies.

pub mod execution;
pub mod flow;
pub mod log_entry;
pub mod metric_entry;
pub mod retry;
pub mod state;
pub mod task;
pub mod task_run;

pub use execution::{Execution, ExecutionTrigger, FailedExecutionWithLog};
pub use flow::{Flow, Label};
pub use log_entry::{LogEntry, LogLevel};
pub use metric_entry::{MetricEntry, MetricKind};
pub use retry::{RetryBehavior, RetryPolicy};
pub use state::{History, State, StateType};
pub use task::{DagTask, NextTaskRun, ResolvedTask, Task, TaskKind};
pub use task_run::{TaskRun, TaskRunAttempt};
