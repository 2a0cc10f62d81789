//! Messages exchanged between the executor and the workers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{Task, TaskRun};

/// A runnable task run handed to a worker, with the variable scope it renders against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerTask {
    pub task_run: TaskRun,
    pub task: Task,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl WorkerTask {
    pub fn new(task_run: TaskRun, task: Task, variables: Map<String, Value>) -> Self {
        Self {
            task_run,
            task,
            variables,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.task_run.execution_id
    }
}

/// Progress of a task run reported by a worker: RUNNING on start, one per failed attempt
/// that is retried, then the final state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerTaskResult {
    pub task_run: TaskRun,
}

impl WorkerTaskResult {
    pub fn new(task_run: TaskRun) -> Self {
        Self { task_run }
    }
}
