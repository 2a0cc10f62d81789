//! # Executions
//!
//! An [`Execution`] is one run of a flow: the flat list of its task runs plus the overall
//! state. It is a value type. Every `with_*` method returns a new execution and the
//! executor replaces the stored copy wholesale, so no method here mutates in place.
//!
//! The query helpers scope task runs to a list of [`ResolvedTask`]s and an optional parent
//! task run, which is how flowable containers look at "their" children.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::warn;

use super::flow::{Flow, Label};
use super::log_entry::{LogEntry, LogLevel};
use super::state::{State, StateType};
use super::task::ResolvedTask;
use super::task_run::{TaskRun, TaskRunAttempt};
use crate::error::{ConductorError, Result};
use crate::runner::flowable_utils::is_task_run_for;
use crate::utils::{id_utils, merge_maps};

/// What started an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrigger {
    pub id: String,
    #[serde(rename = "type")]
    pub trigger_type: String,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub namespace: String,
    pub flow_id: String,
    pub flow_revision: u32,
    #[serde(default)]
    pub task_run_list: Vec<TaskRun>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub inputs: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub outputs: Map<String, Value>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub variables: Map<String, Value>,
    pub state: State,
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Stable across restarts and child executions
    pub original_id: String,
    #[serde(default)]
    pub trigger: Option<ExecutionTrigger>,
    #[serde(default)]
    pub deleted: bool,
}

/// Result of the executor crash funnel: always a valid execution plus the logs explaining it
#[derive(Debug, Clone, PartialEq)]
pub struct FailedExecutionWithLog {
    pub execution: Execution,
    pub logs: Vec<LogEntry>,
}

impl Execution {
    /// A new CREATED execution of `flow`, labelled with the flow labels then `labels`
    pub fn new_execution(
        flow: &Flow,
        inputs: Option<Map<String, Value>>,
        labels: Vec<Label>,
    ) -> Self {
        let id = id_utils::create();
        let mut execution_labels = flow.labels.clone();
        execution_labels.extend(labels);

        Self {
            original_id: id.clone(),
            id,
            namespace: flow.namespace.clone(),
            flow_id: flow.id.clone(),
            flow_revision: flow.revision,
            task_run_list: Vec::new(),
            inputs: inputs.unwrap_or_default(),
            outputs: Map::new(),
            labels: execution_labels,
            variables: Map::new(),
            state: State::new(),
            parent_id: None,
            trigger: None,
            deleted: false,
        }
    }

    pub fn with_state(&self, state: StateType) -> Self {
        Self {
            state: self.state.with_state(state),
            ..self.clone()
        }
    }

    /// Replaces the task run with the same id
    pub fn with_task_run(&self, task_run: TaskRun) -> Result<Self> {
        let position = self
            .task_run_list
            .iter()
            .position(|current| current.id == task_run.id)
            .ok_or_else(|| {
                ConductorError::task_run_not_found(&task_run.id, &self.id, &self.to_string_state())
            })?;

        let mut task_run_list = self.task_run_list.clone();
        task_run_list[position] = task_run;
        Ok(Self {
            task_run_list,
            ..self.clone()
        })
    }

    pub fn with_task_run_list(&self, task_run_list: Vec<TaskRun>) -> Self {
        Self {
            task_run_list,
            ..self.clone()
        }
    }

    pub fn with_inputs(&self, inputs: Map<String, Value>) -> Self {
        Self {
            inputs,
            ..self.clone()
        }
    }

    pub fn with_outputs(&self, outputs: Map<String, Value>) -> Self {
        Self {
            outputs,
            ..self.clone()
        }
    }

    pub fn with_variables(&self, variables: Map<String, Value>) -> Self {
        Self {
            variables,
            ..self.clone()
        }
    }

    pub fn with_labels(&self, labels: Vec<Label>) -> Self {
        Self {
            labels,
            ..self.clone()
        }
    }

    pub fn with_trigger(&self, trigger: ExecutionTrigger) -> Self {
        Self {
            trigger: Some(trigger),
            ..self.clone()
        }
    }

    /// Copy under `child_execution_id` (parented to this one), or this same id when `None`
    pub fn child_execution(
        &self,
        child_execution_id: Option<&str>,
        task_run_list: Vec<TaskRun>,
        state: State,
    ) -> Self {
        Self {
            id: child_execution_id
                .map(str::to_string)
                .unwrap_or_else(|| self.id.clone()),
            parent_id: child_execution_id.map(|_| self.id.clone()),
            task_run_list,
            state,
            ..self.clone()
        }
    }

    pub fn find_task_runs_by_task_id(&self, id: &str) -> Vec<&TaskRun> {
        self.task_run_list
            .iter()
            .filter(|task_run| task_run.task_id == id)
            .collect()
    }

    pub fn find_task_run_by_task_run_id(&self, id: &str) -> Result<&TaskRun> {
        self.task_run_list
            .iter()
            .find(|task_run| task_run.id == id)
            .ok_or_else(|| ConductorError::task_run_not_found(id, &self.id, &self.to_string_state()))
    }

    /// Task run of `id` whose chain of iteration values (own value included) is `values`
    pub fn find_task_run_by_task_id_and_value(&self, id: &str, values: &[String]) -> Result<&TaskRun> {
        self.task_run_list
            .iter()
            .find(|task_run| {
                task_run.task_id == id && self.find_parents_values(task_run, true) == values
            })
            .ok_or_else(|| {
                ConductorError::Internal(format!(
                    "Can't find taskrun with taskId '{id}' & value '{values:?}' on execution '{}' {}",
                    self.id,
                    self.to_string_state()
                ))
            })
    }

    /// The list to follow for a container: `tasks` normally, `errors` once a task failed
    /// for good, nothing while a failed task still has a retry pending.
    pub fn find_task_depending_flow_state(
        &self,
        tasks: &[ResolvedTask],
        errors: &[ResolvedTask],
        parent_task_run: Option<&TaskRun>,
    ) -> Vec<ResolvedTask> {
        let tasks = remove_disabled(tasks);
        let errors = remove_disabled(errors);

        let errors_flow = self.find_task_run_by_tasks(&errors, parent_task_run);

        if !errors_flow.is_empty() || self.has_failed_in(&tasks, parent_task_run) {
            if !self.has_failed_no_retry(&tasks, parent_task_run) {
                return Vec::new();
            }
            return errors;
        }

        tasks
    }

    pub fn find_task_run_by_tasks(
        &self,
        tasks: &[ResolvedTask],
        parent_task_run: Option<&TaskRun>,
    ) -> Vec<&TaskRun> {
        self.task_run_list
            .iter()
            .filter(|task_run| {
                tasks
                    .iter()
                    .any(|resolved| is_task_run_for(resolved, task_run, parent_task_run))
            })
            .collect()
    }

    pub fn find_first_by_state(&self, state: StateType) -> Option<&TaskRun> {
        self.task_run_list
            .iter()
            .find(|task_run| task_run.state.current() == state)
    }

    pub fn find_first_running(&self) -> Option<&TaskRun> {
        self.task_run_list
            .iter()
            .find(|task_run| task_run.state.is_running())
    }

    pub fn find_last_not_terminated(&self) -> Option<&TaskRun> {
        self.task_run_list
            .iter()
            .rev()
            .find(|task_run| !task_run.state.is_terminated())
    }

    pub fn find_last_by_state<'a>(task_runs: &[&'a TaskRun], state: StateType) -> Option<&'a TaskRun> {
        task_runs
            .iter()
            .rev()
            .find(|task_run| task_run.state.current() == state)
            .copied()
    }

    pub fn find_last_created<'a>(task_runs: &[&'a TaskRun]) -> Option<&'a TaskRun> {
        task_runs
            .iter()
            .rev()
            .find(|task_run| task_run.state.is_created())
            .copied()
    }

    pub fn find_last_running<'a>(task_runs: &[&'a TaskRun]) -> Option<&'a TaskRun> {
        task_runs
            .iter()
            .rev()
            .find(|task_run| task_run.state.is_running())
            .copied()
    }

    pub fn find_last_terminated<'a>(task_runs: &[&'a TaskRun]) -> Option<&'a TaskRun> {
        task_runs
            .iter()
            .rev()
            .find(|task_run| task_run.state.is_terminated())
            .copied()
    }

    /// True when the number of terminated matching task runs equals the number of tasks.
    ///
    /// Matches are counted, not deduplicated by task.
    pub fn is_terminated(&self, tasks: &[ResolvedTask], parent_task_run: Option<&TaskRun>) -> bool {
        let terminated_count = self
            .find_task_run_by_tasks(tasks, parent_task_run)
            .iter()
            .filter(|task_run| task_run.state.is_terminated())
            .count();

        terminated_count == tasks.len()
    }

    pub fn has_warning(&self) -> bool {
        self.task_run_list
            .iter()
            .any(|task_run| task_run.state.current() == StateType::Warning)
    }

    pub fn has_warning_in(&self, tasks: &[ResolvedTask], parent_task_run: Option<&TaskRun>) -> bool {
        self.find_task_run_by_tasks(tasks, parent_task_run)
            .iter()
            .any(|task_run| task_run.state.current() == StateType::Warning)
    }

    pub fn has_failed(&self) -> bool {
        self.task_run_list
            .iter()
            .any(|task_run| task_run.state.is_failed())
    }

    pub fn has_failed_in(&self, tasks: &[ResolvedTask], parent_task_run: Option<&TaskRun>) -> bool {
        self.find_task_run_by_tasks(tasks, parent_task_run)
            .iter()
            .any(|task_run| task_run.state.is_failed())
    }

    /// A matching task run failed and its task has no retry left
    pub fn has_failed_no_retry(
        &self,
        tasks: &[ResolvedTask],
        parent_task_run: Option<&TaskRun>,
    ) -> bool {
        self.find_task_run_by_tasks(tasks, parent_task_run)
            .iter()
            .any(|task_run| {
                let Some(resolved) = tasks.iter().find(|t| t.task.id == task_run.task_id) else {
                    warn!(
                        task_run_id = %task_run.id,
                        parent_task_run_id = ?parent_task_run.map(|p| p.id.as_str()),
                        "Can't find task for taskRun"
                    );
                    return false;
                };
                task_run.state.is_failed() && !task_run.should_be_retried(resolved.task.retry.as_ref())
            })
    }

    pub fn has_created(&self) -> bool {
        self.task_run_list
            .iter()
            .any(|task_run| task_run.state.is_created())
    }

    pub fn has_created_in(&self, tasks: &[ResolvedTask], parent_task_run: Option<&TaskRun>) -> bool {
        self.find_task_run_by_tasks(tasks, parent_task_run)
            .iter()
            .any(|task_run| task_run.state.is_created())
    }

    pub fn has_running_in(&self, tasks: &[ResolvedTask], parent_task_run: Option<&TaskRun>) -> bool {
        self.find_task_run_by_tasks(tasks, parent_task_run)
            .iter()
            .any(|task_run| task_run.state.is_running())
    }

    /// Final state for the root task list of `flow`
    pub fn guess_final_state_for_flow(&self, flow: &Flow) -> StateType {
        self.guess_final_state(&ResolvedTask::of(&flow.tasks), None, false)
    }

    /// Last KILLED, else last FAILED, else last WARNING, else last PAUSED matching task
    /// run (by list position), SUCCESS otherwise. FAILED becomes WARNING under
    /// `allow_failure`.
    pub fn guess_final_state(
        &self,
        tasks: &[ResolvedTask],
        parent_task_run: Option<&TaskRun>,
        allow_failure: bool,
    ) -> StateType {
        let task_runs = self.find_task_run_by_tasks(tasks, parent_task_run);
        let state = [
            StateType::Killed,
            StateType::Failed,
            StateType::Warning,
            StateType::Paused,
        ]
        .into_iter()
        .find_map(|state| {
            Self::find_last_by_state(&task_runs, state).map(|task_run| task_run.state.current())
        })
        .unwrap_or(StateType::Success);

        if state == StateType::Failed && allow_failure {
            return StateType::Warning;
        }
        state
    }

    /// Whether an incoming worker result for `task_run` may be applied to this execution.
    ///
    /// Rejects duplicates, stale non-terminal updates over a terminal copy, and updates
    /// that are behind the current copy.
    pub fn has_task_run_joinable(&self, task_run: &TaskRun) -> bool {
        let Some(current) = self.task_run_list.iter().find(|r| r.is_same(task_run)) else {
            return true;
        };

        // attempts & retries need to be saved
        if current.attempts.len() < task_run.attempts.len() {
            return true;
        }

        if current.state.current() == task_run.state.current() {
            return false;
        }

        // the executor already failed this task run, a late worker update can't reopen it
        if current.state.is_terminated() && !task_run.state.is_terminated() {
            return false;
        }

        // restart: the execution copy went further than the worker result
        if current.state.histories().len() > task_run.state.histories().len() {
            return false;
        }

        true
    }

    /// Converts an executor crash into a FAILED task run (or a FAILED execution when no
    /// task run is eligible). Never fails.
    pub fn failed_execution_from_executor(
        &self,
        error: &(dyn std::error::Error + 'static),
    ) -> FailedExecutionWithLog {
        warn!(
            namespace = %self.namespace,
            flow_id = %self.flow_id,
            execution_id = %self.id,
            duration = %self.state.human_duration(),
            error = %error,
            "Flow failed from executor"
        );

        let failed_task_run = self.find_last_not_terminated().map(|task_run| {
            let attempts = match task_run.last_attempt() {
                None => vec![TaskRunAttempt::new(State::new()).with_state(StateType::Failed)],
                Some(last) => {
                    let mut attempts = task_run.attempts.clone();
                    let index = attempts.len() - 1;
                    attempts[index] = last.with_state(StateType::Failed);
                    attempts
                }
            };
            let failed = task_run
                .with_attempts(attempts)
                .with_state(StateType::Failed);
            let template = LogEntry::of_task_run(&failed, LogLevel::Error, String::new());
            (failed, LogEntry::from_error(&template, error))
        });

        if let Some((task_run, logs)) = failed_task_run {
            if let Ok(execution) = self.with_task_run(task_run) {
                return FailedExecutionWithLog { execution, logs };
            }
        }

        let execution = if self.state.current() != StateType::Failed {
            self.with_state(StateType::Failed)
        } else {
            self.clone()
        };
        let template = LogEntry::of_execution(&execution, LogLevel::Error, String::new());
        FailedExecutionWithLog {
            logs: LogEntry::from_error(&template, error),
            execution,
        }
    }

    /// Output tree: `{task_id: outputs}`, nested under each valued ancestor's value and
    /// under the task run's own value when it has one
    pub fn outputs(&self) -> Map<String, Value> {
        let by_id: HashMap<&str, &TaskRun> = self
            .task_run_list
            .iter()
            .map(|task_run| (task_run.id.as_str(), task_run))
            .collect();

        let mut result = Map::new();
        for task_run in &self.task_run_list {
            if task_run.outputs.is_some() {
                merge_maps(&mut result, Self::task_run_outputs(task_run, &by_id));
            }
        }
        result
    }

    fn task_run_outputs(task_run: &TaskRun, by_id: &HashMap<&str, &TaskRun>) -> Map<String, Value> {
        let outputs = task_run.outputs.clone().unwrap_or_default();
        let parent_values: Vec<&str> = find_parents_with(task_run, |id| by_id.get(id).copied())
            .into_iter()
            .filter_map(|parent| parent.value.as_deref())
            .collect();

        let mut leaf = match &task_run.value {
            Some(value) => {
                let mut map = Map::new();
                map.insert(value.clone(), Value::Object(outputs));
                map
            }
            None => outputs,
        };

        for value in parent_values.into_iter().rev() {
            let mut wrapper = Map::new();
            wrapper.insert(value.to_string(), Value::Object(leaf));
            leaf = wrapper;
        }

        let mut result = Map::new();
        result.insert(task_run.task_id.clone(), Value::Object(leaf));
        result
    }

    /// Render context of the ancestors of `task_run`, closest first
    pub fn parents(&self, task_run: &TaskRun) -> Vec<Map<String, Value>> {
        self.find_parents(task_run)
            .into_iter()
            .rev()
            .filter_map(|parent| {
                let mut current = Map::new();
                if let Some(value) = &parent.value {
                    current.insert(
                        "taskrun".to_string(),
                        serde_json::json!({ "value": value }),
                    );
                }
                if let Some(outputs) = parent.outputs.as_ref().filter(|o| !o.is_empty()) {
                    current.insert("outputs".to_string(), Value::Object(outputs.clone()));
                }
                (!current.is_empty()).then_some(current)
            })
            .collect()
    }

    /// Ancestors of `task_run`, outermost first, the task run itself excluded
    pub fn find_parents(&self, task_run: &TaskRun) -> Vec<&TaskRun> {
        find_parents_with(task_run, |id| {
            self.task_run_list.iter().find(|candidate| candidate.id == id)
        })
    }

    pub fn find_parents_values(&self, task_run: &TaskRun, with_current: bool) -> Vec<String> {
        let mut chain = self.find_parents(task_run);
        if with_current {
            chain.push(task_run);
        }
        chain
            .into_iter()
            .filter_map(|t| t.value.clone())
            .collect()
    }

    pub fn to_deleted(&self) -> Self {
        Self {
            deleted: true,
            ..self.clone()
        }
    }

    pub fn to_string_state(&self) -> String {
        let task_runs = self
            .task_run_list
            .iter()
            .map(TaskRun::to_string_state)
            .collect::<Vec<_>>()
            .join(",\n    ");
        format!(
            "(\n  state={}\n  taskRunList=\n  [\n    {}\n  ] \n)",
            self.state.current(),
            task_runs
        )
    }

    /// Checksum of [`Self::to_string_state`], to detect whether a pass changed anything
    pub fn to_crc32_state(&self) -> u32 {
        crc32fast::hash(self.to_string_state().as_bytes())
    }
}

fn remove_disabled(tasks: &[ResolvedTask]) -> Vec<ResolvedTask> {
    tasks
        .iter()
        .filter(|resolved| !resolved.task.disabled)
        .cloned()
        .collect()
}

/// Walks `parent_task_run_id` links using `lookup`, returning ancestors outermost first
fn find_parents_with<'a>(
    task_run: &TaskRun,
    lookup: impl Fn(&str) -> Option<&'a TaskRun>,
) -> Vec<&'a TaskRun> {
    let mut result = Vec::new();
    let mut seen = HashSet::new();
    let mut next = task_run.parent_task_run_id.as_deref();

    while let Some(parent_id) = next {
        if !seen.insert(parent_id.to_string()) {
            break;
        }
        match lookup(parent_id) {
            Some(parent) => {
                result.push(parent);
                next = parent.parent_task_run_id.as_deref();
            }
            None => break,
        }
    }

    result.reverse();
    result
}
