//! # Executor
//!
//! Reacts to an execution message: promotes the execution and its containers to RUNNING,
//! resolves which task runs start next, turns the runnable ones into [`WorkerTask`]s and
//! terminates the execution once its root task list is done.
//!
//! A reaction is a sequence of pure passes over the execution value, repeated until a pass
//! leaves the execution unchanged. Any error inside a pass is converted into a FAILED task
//! run (or execution) instead of being propagated.

use tracing::{debug, error, info};

use super::flowable_utils::{resolve_sequential_nexts, resolve_state};
use super::queue::QueueInterface;
use super::run_context::RunContext;
use super::worker_task::{WorkerTask, WorkerTaskResult};
use crate::config::ExecutorConfig;
use crate::error::Result;
use crate::models::{Execution, Flow, LogEntry, NextTaskRun, ResolvedTask, StateType};

/// Outcome of one reaction
#[derive(Debug, Clone, PartialEq)]
pub struct Executor {
    pub execution: Execution,
    /// Every task run created during the reaction
    pub next_task_runs: Vec<NextTaskRun>,
    /// Runnable task runs to dispatch to the workers
    pub worker_tasks: Vec<WorkerTask>,
    /// Logs produced by the failure funnel
    pub logs: Vec<LogEntry>,
}

impl Executor {
    pub fn new(execution: Execution) -> Self {
        Self {
            execution,
            next_task_runs: Vec::new(),
            worker_tasks: Vec::new(),
            logs: Vec::new(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.execution.state.is_terminated()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutorService {
    config: ExecutorConfig,
}

impl ExecutorService {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Runs passes over `execution` until one changes nothing
    pub fn process(&self, flow: &Flow, execution: Execution) -> Executor {
        let mut executor = Executor::new(execution);

        for pass in 0..self.config.max_process_passes {
            let before = executor.execution.to_crc32_state();

            if let Err(error) = self.process_pass(flow, &mut executor) {
                error!(
                    execution_id = %executor.execution.id,
                    flow_id = %flow.id,
                    pass = pass,
                    error = %error,
                    "Execution pass failed"
                );
                let failed = executor.execution.failed_execution_from_executor(&error);
                executor.execution = failed.execution;
                executor.logs.extend(failed.logs);
                break;
            }

            if executor.execution.to_crc32_state() == before {
                break;
            }
        }

        executor
    }

    /// Applies a worker result unless it is stale or a duplicate, `None` when rejected
    pub fn add_worker_task_result(
        &self,
        execution: &Execution,
        result: &WorkerTaskResult,
    ) -> Result<Option<Execution>> {
        if !execution.has_task_run_joinable(&result.task_run) {
            debug!(
                execution_id = %execution.id,
                task_run_id = %result.task_run.id,
                state = %result.task_run.state.current(),
                "Worker result not joinable, ignored"
            );
            return Ok(None);
        }

        execution.with_task_run(result.task_run.clone()).map(Some)
    }

    /// Requests the kill of a running execution; terminated executions are left untouched
    pub fn kill(&self, execution: &Execution) -> Execution {
        if execution.state.is_terminated() || execution.state.current() == StateType::Killing {
            return execution.clone();
        }
        execution.with_state(StateType::Killing)
    }

    pub async fn emit_worker_tasks(
        &self,
        executor: &Executor,
        queue: &dyn QueueInterface<WorkerTask>,
    ) -> Result<()> {
        for worker_task in &executor.worker_tasks {
            queue.emit(worker_task.clone()).await?;
        }
        Ok(())
    }

    fn process_pass(&self, flow: &Flow, executor: &mut Executor) -> Result<()> {
        let mut execution = executor.execution.clone();

        if execution.state.is_terminated() {
            return Ok(());
        }

        if execution.state.current() == StateType::Killing {
            executor.execution = self.handle_killing(flow, execution)?;
            return Ok(());
        }

        if execution.state.is_created() {
            execution = execution.with_state(StateType::Running);
            info!(execution_id = %execution.id, flow_id = %flow.id, "Execution started");
        }

        let mut nexts: Vec<NextTaskRun> = Vec::new();

        let pending: Vec<_> = execution
            .task_run_list
            .iter()
            .filter(|task_run| !task_run.state.is_terminated())
            .cloned()
            .collect();

        for mut task_run in pending {
            let task = flow.find_task_by_task_id(&task_run.task_id)?;
            if !task.is_flowable() {
                continue;
            }

            if task_run.state.is_created() {
                task_run = task_run.with_state(StateType::Running);
                execution = execution.with_task_run(task_run.clone())?;
            }

            let run_context = RunContext::for_execution(flow, &execution, Some(&task_run));
            match task.resolve_flowable_state(&run_context, &execution, &task_run)? {
                Some(state) => {
                    let terminated = task_run.with_state(state);
                    debug!(
                        execution_id = %execution.id,
                        task_run_id = %terminated.id,
                        task_id = %terminated.task_id,
                        state = %state,
                        "Flowable task run terminated"
                    );
                    execution = execution.with_task_run(terminated)?;
                }
                None => nexts.extend(task.resolve_nexts(&run_context, &execution, &task_run)?),
            }
        }

        let root_tasks = ResolvedTask::of(&flow.tasks);
        let root_errors = ResolvedTask::of(&flow.errors);
        nexts.extend(resolve_sequential_nexts(&execution, &root_tasks, &root_errors, None));

        if !nexts.is_empty() {
            let mut task_runs = execution.task_run_list.clone();
            task_runs.extend(nexts.iter().map(|next| next.task_run.clone()));
            execution = execution.with_task_run_list(task_runs);

            for next in &nexts {
                debug!(
                    execution_id = %execution.id,
                    task_run_id = %next.task_run.id,
                    task_id = %next.task.id,
                    value = ?next.task_run.value,
                    "Task run created"
                );
                if next.task.is_runnable() {
                    let run_context =
                        RunContext::for_execution(flow, &execution, Some(&next.task_run));
                    executor.worker_tasks.push(WorkerTask::new(
                        next.task_run.clone(),
                        next.task.clone(),
                        run_context.variables().clone(),
                    ));
                }
            }
            executor.next_task_runs.extend(nexts);
        }

        if let Some(state) = resolve_state(&execution, Some(&root_tasks), &root_errors, None, false) {
            execution = execution.with_state(state);
            info!(
                execution_id = %execution.id,
                flow_id = %flow.id,
                state = %state,
                duration = %execution.state.human_duration(),
                "Execution terminated"
            );
        }

        executor.execution = execution;
        Ok(())
    }

    /// Kills every task run that is not on a worker; the execution is KILLED once nothing
    /// is left running
    fn handle_killing(&self, flow: &Flow, mut execution: Execution) -> Result<Execution> {
        let pending: Vec<_> = execution
            .task_run_list
            .iter()
            .filter(|task_run| !task_run.state.is_terminated())
            .cloned()
            .collect();

        for task_run in pending {
            let task = flow.find_task_by_task_id(&task_run.task_id)?;
            if task_run.state.is_created() || task.is_flowable() {
                execution = execution.with_task_run(task_run.with_state(StateType::Killed))?;
            }
        }

        if execution.find_last_not_terminated().is_none() {
            execution = execution.with_state(StateType::Killed);
            info!(execution_id = %execution.id, flow_id = %flow.id, "Execution killed");
        }

        Ok(execution)
    }
}
