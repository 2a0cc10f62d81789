//! # Flowable Resolution
//!
//! Pure functions deciding which child task runs a container starts next and which state
//! it ends in, given the task runs already present in the execution.

use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use super::run_context::RunContext;
use crate::error::{ConductorError, Result};
use crate::models::{DagTask, Execution, NextTaskRun, ResolvedTask, StateType, Task, TaskRun};

/// At most one pending child: the first task, then the task after the last terminated one.
pub fn resolve_sequential_nexts(
    execution: &Execution,
    tasks: &[ResolvedTask],
    errors: &[ResolvedTask],
    parent_task_run: Option<&TaskRun>,
) -> Vec<NextTaskRun> {
    let current_tasks = execution.find_task_depending_flow_state(tasks, errors, parent_task_run);
    if current_tasks.is_empty() {
        return Vec::new();
    }

    let task_runs = execution.find_task_run_by_tasks(&current_tasks, parent_task_run);
    if task_runs.is_empty() {
        return vec![current_tasks[0].to_next_task_run(execution)];
    }

    if Execution::find_last_created(&task_runs).is_some()
        || Execution::find_last_running(&task_runs).is_some()
    {
        return Vec::new();
    }

    let Some(last_terminated) = Execution::find_last_terminated(&task_runs) else {
        return Vec::new();
    };

    current_tasks
        .iter()
        .position(|resolved| is_task_run_for(resolved, last_terminated, parent_task_run))
        .and_then(|index| current_tasks.get(index + 1))
        .map(|next| vec![next.to_next_task_run(execution)])
        .unwrap_or_default()
}

/// Every child not started yet, bounded by `concurrency` running children (0 is unbounded)
pub fn resolve_parallel_nexts(
    execution: &Execution,
    tasks: &[ResolvedTask],
    errors: &[ResolvedTask],
    parent_task_run: Option<&TaskRun>,
    concurrency: usize,
) -> Vec<NextTaskRun> {
    let current_tasks = execution.find_task_depending_flow_state(tasks, errors, parent_task_run);
    let task_runs = execution.find_task_run_by_tasks(&current_tasks, parent_task_run);

    let not_found: Vec<&ResolvedTask> = current_tasks
        .iter()
        .filter(|resolved| {
            !task_runs
                .iter()
                .any(|task_run| is_task_run_for(resolved, task_run, parent_task_run))
        })
        .collect();

    let running_count = task_runs
        .iter()
        .filter(|task_run| task_run.state.is_running())
        .count();

    if concurrency > 0 && running_count >= concurrency {
        return Vec::new();
    }

    if not_found.is_empty() || Execution::find_last_created(&task_runs).is_some() {
        return Vec::new();
    }

    let limit = if concurrency > 0 {
        concurrency.saturating_sub(running_count)
    } else {
        not_found.len()
    };

    not_found
        .into_iter()
        .take(limit)
        .map(|resolved| resolved.to_next_task_run(execution))
        .collect()
}

/// Children whose dependencies all succeeded, bounded by `concurrency` unfinished children
pub fn resolve_dag_nexts(
    execution: &Execution,
    dag_tasks: &[DagTask],
    parent_task_run: &TaskRun,
    errors: &[ResolvedTask],
    concurrency: usize,
) -> Vec<NextTaskRun> {
    let tasks: Vec<Task> = dag_tasks.iter().map(|dag| dag.task.clone()).collect();
    let resolved = resolve_tasks(&tasks, parent_task_run);
    let current_tasks =
        execution.find_task_depending_flow_state(&resolved, errors, Some(parent_task_run));
    let task_runs = execution.find_task_run_by_tasks(&current_tasks, Some(parent_task_run));

    let dependencies: HashMap<&str, &[String]> = dag_tasks
        .iter()
        .map(|dag| (dag.task.id.as_str(), dag.depends_on.as_slice()))
        .collect();

    let unfinished = task_runs
        .iter()
        .filter(|task_run| !task_run.state.is_terminated())
        .count();
    if concurrency > 0 && unfinished >= concurrency {
        return Vec::new();
    }

    let ready = current_tasks.iter().filter(|resolved| {
        let started = task_runs
            .iter()
            .any(|task_run| is_task_run_for(resolved, task_run, Some(parent_task_run)));
        if started {
            return false;
        }
        dependencies
            .get(resolved.task.id.as_str())
            .copied()
            .unwrap_or_default()
            .iter()
            .all(|dependency| {
                task_runs.iter().any(|task_run| {
                    task_run.task_id == *dependency
                        && matches!(
                            task_run.state.current(),
                            StateType::Success | StateType::Warning
                        )
                })
            })
    });

    let limit = if concurrency > 0 {
        concurrency.saturating_sub(unfinished)
    } else {
        usize::MAX
    };

    ready
        .take(limit)
        .map(|resolved| resolved.to_next_task_run(execution))
        .collect()
}

/// Terminal state of a container from its children, `None` while still in progress.
///
/// `tasks == None` means the container could not resolve its children at all and fails.
pub fn resolve_state(
    execution: &Execution,
    tasks: Option<&[ResolvedTask]>,
    errors: &[ResolvedTask],
    parent_task_run: Option<&TaskRun>,
    allow_failure: bool,
) -> Option<StateType> {
    let Some(tasks) = tasks else {
        warn!(
            namespace = %execution.namespace,
            flow_id = %execution.flow_id,
            execution_id = %execution.id,
            task_id = ?parent_task_run.map(|p| p.task_id.as_str()),
            "No task found on flow"
        );
        return Some(StateType::Failed);
    };

    if tasks.iter().all(|resolved| resolved.task.disabled) {
        return Some(StateType::Success);
    }

    let current_tasks = execution.find_task_depending_flow_state(tasks, errors, parent_task_run);

    if !current_tasks.is_empty() {
        if execution.is_terminated(&current_tasks, parent_task_run) {
            return Some(execution.guess_final_state(tasks, parent_task_run, allow_failure));
        }
    } else if execution.has_failed_in(tasks, parent_task_run) {
        // the error branch has not started yet, the parent can already be failed
        return Some(execution.guess_final_state(tasks, parent_task_run, allow_failure));
    }

    None
}

/// Binds `tasks` to `parent_task_run`
pub fn resolve_tasks(tasks: &[Task], parent_task_run: &TaskRun) -> Vec<ResolvedTask> {
    tasks
        .iter()
        .map(|task| ResolvedTask {
            task: task.clone(),
            parent_id: Some(parent_task_run.id.clone()),
            value: None,
        })
        .collect()
}

/// One resolved task per (distinct value of the rendered JSON array, task) pair
pub fn resolve_each_tasks(
    run_context: &RunContext,
    parent_task_run: &TaskRun,
    tasks: &[Task],
    value: &str,
) -> Result<Vec<ResolvedTask>> {
    let rendered = run_context.render(value)?;
    let values: Vec<Value> = serde_json::from_str(&rendered).map_err(|e| {
        ConductorError::Render(format!("Invalid each values '{rendered}': {e}"))
    })?;

    let mut distinct: Vec<Value> = Vec::with_capacity(values.len());
    for value in values.iter() {
        if !distinct.contains(value) {
            distinct.push(value.clone());
        }
    }

    let null_count = distinct.iter().filter(|value| value.is_null()).count();
    if null_count > 0 {
        return Err(ConductorError::Render(format!(
            "Found '{null_count}' null values on Each, with values={rendered}"
        )));
    }

    let mut result = Vec::with_capacity(distinct.len() * tasks.len());
    for current in &distinct {
        let resolved_value = match current {
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other)?,
        };
        for task in tasks {
            result.push(ResolvedTask {
                task: task.clone(),
                parent_id: Some(parent_task_run.id.clone()),
                value: Some(resolved_value.clone()),
            });
        }
    }

    Ok(result)
}

/// Whether `task_run` instantiates `resolved` (under `parent_task_run` when given)
pub fn is_task_run_for(
    resolved: &ResolvedTask,
    task_run: &TaskRun,
    parent_task_run: Option<&TaskRun>,
) -> bool {
    resolved.task.id == task_run.task_id
        && parent_task_run
            .map_or(true, |parent| task_run.parent_task_run_id.as_deref() == Some(parent.id.as_str()))
        && resolved
            .value
            .as_ref()
            .map_or(true, |value| task_run.value.as_ref() == Some(value))
}
