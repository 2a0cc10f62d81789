//! Dispatch of the flowable operations over the task kinds.

use super::flowable_utils::{
    resolve_dag_nexts, resolve_each_tasks, resolve_parallel_nexts, resolve_sequential_nexts,
    resolve_state, resolve_tasks,
};
use super::run_context::RunContext;
use crate::error::{ConductorError, Result};
use crate::models::{DagTask, Execution, NextTaskRun, ResolvedTask, StateType, Task, TaskKind, TaskRun};

impl Task {
    /// Children of this container for `parent_task_run`, `None` when a switch selects no
    /// branch
    pub fn resolve_child_tasks(
        &self,
        run_context: &RunContext,
        parent_task_run: &TaskRun,
    ) -> Result<Option<Vec<ResolvedTask>>> {
        let resolved = match &self.kind {
            TaskKind::Runnable { .. } => return Err(self.not_flowable()),
            TaskKind::Sequential { tasks, .. } | TaskKind::Parallel { tasks, .. } => {
                resolve_tasks(tasks, parent_task_run)
            }
            TaskKind::Dag { tasks, .. } => {
                let tasks: Vec<Task> = tasks.iter().map(|dag: &DagTask| dag.task.clone()).collect();
                resolve_tasks(&tasks, parent_task_run)
            }
            TaskKind::Switch {
                value,
                cases,
                defaults,
                ..
            } => {
                let rendered = run_context.render(value)?;
                match cases.get(&rendered) {
                    Some(branch) => resolve_tasks(branch, parent_task_run),
                    None if !defaults.is_empty() => resolve_tasks(defaults, parent_task_run),
                    None => return Ok(None),
                }
            }
            TaskKind::ForEach { values, tasks, .. } => {
                resolve_each_tasks(run_context, parent_task_run, tasks, values)?
            }
        };
        Ok(Some(resolved))
    }

    /// Child task runs to start now
    pub fn resolve_nexts(
        &self,
        run_context: &RunContext,
        execution: &Execution,
        parent_task_run: &TaskRun,
    ) -> Result<Vec<NextTaskRun>> {
        let errors = resolve_tasks(self.errors(), parent_task_run);
        let parent = Some(parent_task_run);

        let nexts = match &self.kind {
            TaskKind::Runnable { .. } => return Err(self.not_flowable()),
            TaskKind::Parallel { concurrency, .. } => {
                let Some(children) = self.resolve_child_tasks(run_context, parent_task_run)? else {
                    return Ok(Vec::new());
                };
                resolve_parallel_nexts(execution, &children, &errors, parent, *concurrency)
            }
            TaskKind::Dag {
                tasks, concurrency, ..
            } => resolve_dag_nexts(execution, tasks, parent_task_run, &errors, *concurrency),
            TaskKind::Sequential { .. } | TaskKind::Switch { .. } | TaskKind::ForEach { .. } => {
                let Some(children) = self.resolve_child_tasks(run_context, parent_task_run)? else {
                    return Ok(Vec::new());
                };
                resolve_sequential_nexts(execution, &children, &errors, parent)
            }
        };

        Ok(nexts)
    }

    /// Terminal state of this container, `None` while children are still in progress
    pub fn resolve_flowable_state(
        &self,
        run_context: &RunContext,
        execution: &Execution,
        parent_task_run: &TaskRun,
    ) -> Result<Option<StateType>> {
        let children = self.resolve_child_tasks(run_context, parent_task_run)?;
        let errors = resolve_tasks(self.errors(), parent_task_run);

        Ok(resolve_state(
            execution,
            children.as_deref(),
            &errors,
            Some(parent_task_run),
            self.allow_failure,
        ))
    }

    fn not_flowable(&self) -> ConductorError {
        ConductorError::InvalidState(format!("Task '{}' is not a flowable task", self.id))
    }
}
