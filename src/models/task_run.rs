//! # Task Runs
//!
//! A [`TaskRun`] is one instantiation of a task inside an execution. For-each containers
//! produce one task run per iterated `value`. Task runs form a tree through
//! `parent_task_run_id`, looked up by id in the owning execution's flat list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::execution::Execution;
use super::metric_entry::MetricEntry;
use super::retry::RetryPolicy;
use super::state::{State, StateType};
use super::task::ResolvedTask;
use crate::error::{ConductorError, Result};
use crate::utils::id_utils;

/// One execution try of a task run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRunAttempt {
    #[serde(default)]
    pub metrics: Vec<MetricEntry>,
    pub state: State,
}

impl TaskRunAttempt {
    pub fn new(state: State) -> Self {
        Self {
            metrics: Vec::new(),
            state,
        }
    }

    pub fn with_state(&self, state: StateType) -> Self {
        Self {
            metrics: self.metrics.clone(),
            state: self.state.with_state(state),
        }
    }

    pub fn with_metrics(mut self, metrics: Vec<MetricEntry>) -> Self {
        self.metrics = metrics;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRun {
    pub id: String,
    pub execution_id: String,
    pub namespace: String,
    pub flow_id: String,
    pub task_id: String,
    #[serde(default)]
    pub parent_task_run_id: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub attempts: Vec<TaskRunAttempt>,
    #[serde(default)]
    pub outputs: Option<Map<String, Value>>,
    pub state: State,
    #[serde(default)]
    pub iteration: Option<u32>,
}

impl TaskRun {
    /// A new CREATED task run for `resolved_task` in `execution`
    pub fn of(execution: &Execution, resolved_task: &ResolvedTask) -> Self {
        Self {
            id: id_utils::create(),
            execution_id: execution.id.clone(),
            namespace: execution.namespace.clone(),
            flow_id: execution.flow_id.clone(),
            task_id: resolved_task.task.id.clone(),
            parent_task_run_id: resolved_task.parent_id.clone(),
            value: resolved_task.value.clone(),
            attempts: Vec::new(),
            outputs: None,
            state: State::new(),
            iteration: None,
        }
    }

    pub fn with_state(&self, state: StateType) -> Self {
        self.replace_state(self.state.with_state(state))
    }

    pub fn replace_state(&self, state: State) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }

    pub fn with_attempts(&self, attempts: Vec<TaskRunAttempt>) -> Self {
        Self {
            attempts,
            ..self.clone()
        }
    }

    pub fn with_outputs(&self, outputs: Map<String, Value>) -> Self {
        Self {
            outputs: Some(outputs),
            ..self.clone()
        }
    }

    pub fn with_value(&self, value: Option<String>) -> Self {
        Self {
            value,
            ..self.clone()
        }
    }

    /// Appends a FAILED attempt and moves the task run to FAILED
    pub fn fail(&self) -> Self {
        let mut attempts = self.attempts.clone();
        attempts.push(TaskRunAttempt::new(State::of_type(StateType::Failed)));
        Self {
            attempts,
            state: self.state.with_state(StateType::Failed),
            ..self.clone()
        }
    }

    /// Copy of this task run for a restarted or child execution, with ids remapped
    pub fn for_child_execution(
        &self,
        remap_task_run_id: &HashMap<String, String>,
        execution_id: Option<&str>,
        state: Option<State>,
    ) -> Result<Self> {
        let id = remap_task_run_id.get(&self.id).cloned().ok_or_else(|| {
            ConductorError::Internal(format!("No remapped id for taskrun '{}'", self.id))
        })?;

        Ok(Self {
            id,
            execution_id: execution_id
                .map(str::to_string)
                .unwrap_or_else(|| self.execution_id.clone()),
            parent_task_run_id: self
                .parent_task_run_id
                .as_ref()
                .and_then(|parent| remap_task_run_id.get(parent).cloned()),
            state: state.unwrap_or_else(|| self.state.clone()),
            ..self.clone()
        })
    }

    pub fn attempt_number(&self) -> usize {
        self.attempts.len()
    }

    pub fn last_attempt(&self) -> Option<&TaskRunAttempt> {
        self.attempts.last()
    }

    /// Prepares a task run that was in flight on a lost worker for resubmission: the
    /// running attempt is marked KILLED, or a KILLED attempt is appended.
    pub fn on_running_resend(&self) -> Self {
        let mut attempts = self.attempts.clone();
        match attempts.last_mut() {
            None => attempts.push(TaskRunAttempt::new(self.state.with_state(StateType::Killed))),
            Some(last) if !last.state.is_terminated() => {
                *last = last.with_state(StateType::Killed);
            }
            Some(_) => attempts.push(TaskRunAttempt::new(
                State::new().with_state(StateType::Killed),
            )),
        }
        self.with_attempts(attempts)
    }

    /// Same id, same iteration value and same iteration counter
    pub fn is_same(&self, other: &TaskRun) -> bool {
        self.id == other.id && self.value == other.value && self.iteration == other.iteration
    }

    pub fn to_string_state(&self) -> String {
        format!(
            "TaskRun(id={}, taskId={}, value={}, state={})",
            self.id,
            self.task_id,
            self.value.as_deref().unwrap_or("null"),
            self.state.current()
        )
    }

    /// Date of the next attempt under `retry`, `None` once the attempts or the duration
    /// bound is exhausted
    pub fn next_retry_date(&self, retry: &RetryPolicy) -> Option<DateTime<Utc>> {
        let last = self.attempts.last()?;
        let first = self.attempts.first()?;
        let attempt_count = u32::try_from(self.attempts.len()).unwrap_or(u32::MAX);

        if retry
            .max_attempt
            .is_some_and(|max_attempt| attempt_count >= max_attempt)
        {
            return None;
        }

        let next = retry.next_retry_date(attempt_count, last.state.max_date());
        if let Some(max_duration) = retry.max_duration() {
            if next > first.state.min_date() + max_duration {
                return None;
            }
        }

        Some(next)
    }

    pub fn should_be_retried(&self, retry: Option<&RetryPolicy>) -> bool {
        retry.is_some_and(|retry| self.next_retry_date(retry).is_some())
    }

    pub fn increment_iteration(&self) -> Self {
        Self {
            iteration: Some(self.iteration.unwrap_or(1) + 1),
            ..self.clone()
        }
    }

    /// Back to CREATED with no attempts, keeping the first history entry
    pub fn reset_attempts(&self) -> Self {
        Self {
            state: self.state.reset(),
            attempts: Vec::new(),
            ..self.clone()
        }
    }
}
