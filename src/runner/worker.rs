//! # Worker
//!
//! Executes runnable task runs received from the executor. Every dispatch reports RUNNING
//! first, then runs the task body under its retry policy, reporting each failed attempt
//! that is retried, and finally reports the state of the last attempt.
//!
//! Task bodies never take the worker down: errors, timeouts and panics all end up as a
//! FAILED attempt with the cause in the task logs.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::queue::{CancelHandle, Consumer, QueueInterface};
use super::run_context::RunContext;
use super::worker_task::{WorkerTask, WorkerTaskResult};
use crate::config::WorkerConfig;
use crate::error::{ConductorError, Result};
use crate::logging::{log_service_operation, log_task_run_operation};
use crate::models::{LogEntry, LogLevel, State, StateType, Task, TaskRun, TaskRunAttempt};
use crate::server::{
    Service, ServiceEventPublisher, ServiceState, ServiceStateChangeEvent, ServiceType,
};
use crate::utils::id_utils;

/// What a task body produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutput {
    pub outputs: Map<String, Value>,
    /// Overrides the SUCCESS state of the attempt, e.g. WARNING
    pub state: Option<StateType>,
}

impl TaskOutput {
    pub fn new(outputs: Map<String, Value>) -> Self {
        Self {
            outputs,
            state: None,
        }
    }

    pub fn with_state(mut self, state: StateType) -> Self {
        self.state = Some(state);
        self
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task failed: {0}")]
    Failed(String),
    #[error("Task timed out after {0:?}")]
    Timeout(Duration),
    #[error("Task panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Body of a runnable task type
#[async_trait]
pub trait RunnableTask: Send + Sync {
    async fn run(
        &self,
        run_context: &RunContext,
        task: &Task,
    ) -> std::result::Result<TaskOutput, TaskError>;
}

pub struct Worker {
    id: String,
    config: WorkerConfig,
    runnables: DashMap<String, Arc<dyn RunnableTask>>,
    permits: Arc<Semaphore>,
    killed_executions: DashSet<String>,
    /// task run id -> execution id
    in_flight: DashMap<String, String>,
    state: RwLock<ServiceState>,
    skip_graceful_termination: AtomicBool,
    result_queue: Arc<dyn QueueInterface<WorkerTaskResult>>,
    log_queue: Option<Arc<dyn QueueInterface<LogEntry>>>,
    events: Option<ServiceEventPublisher>,
    consumers: Mutex<Vec<CancelHandle>>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("state", &*self.state.read())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl Worker {
    pub fn new(config: WorkerConfig, result_queue: Arc<dyn QueueInterface<WorkerTaskResult>>) -> Self {
        Self {
            id: id_utils::create(),
            permits: Arc::new(Semaphore::new(config.threads.max(1))),
            config,
            runnables: DashMap::new(),
            killed_executions: DashSet::new(),
            in_flight: DashMap::new(),
            state: RwLock::new(ServiceState::Created),
            skip_graceful_termination: AtomicBool::new(false),
            result_queue,
            log_queue: None,
            events: None,
            consumers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_log_queue(mut self, log_queue: Arc<dyn QueueInterface<LogEntry>>) -> Self {
        self.log_queue = Some(log_queue);
        self
    }

    pub fn with_events(mut self, events: ServiceEventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    pub fn register(&self, task_type: impl Into<String>, runnable: Arc<dyn RunnableTask>) {
        self.runnables.insert(task_type.into(), runnable);
    }

    /// Tasks of this execution are reported KILLED instead of being run or retried
    pub fn kill(&self, execution_id: impl Into<String>) {
        self.killed_executions.insert(execution_id.into());
    }

    pub fn is_killed(&self, execution_id: &str) -> bool {
        self.killed_executions.contains(execution_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Starts consuming `task_queue`, running at most `threads` tasks at a time
    pub fn start(self: &Arc<Self>, task_queue: &dyn QueueInterface<WorkerTask>) {
        let worker = Arc::clone(self);
        let consumer: Consumer<WorkerTask> = Arc::new(move |worker_task: WorkerTask| {
            let worker = Arc::clone(&worker);
            async move {
                let Ok(permit) = Arc::clone(&worker.permits).acquire_owned().await else {
                    warn!(
                        worker_id = %worker.id,
                        task_run_id = %worker_task.task_run.id,
                        "Worker closed, task not started"
                    );
                    return;
                };
                tokio::spawn(async move {
                    let _permit = permit;
                    let task_run_id = worker_task.task_run.id.clone();
                    if let Err(e) = worker.run(worker_task).await {
                        error!(
                            worker_id = %worker.id,
                            task_run_id = %task_run_id,
                            error = %e,
                            "Unable to report task run result"
                        );
                    }
                });
            }
            .boxed()
        });

        self.consumers.lock().push(task_queue.receive(consumer));
        self.set_state(ServiceState::Running);
        info!(worker_id = %self.id, threads = self.config.threads, "Worker started");
    }

    /// Runs one dispatched task run to completion and returns the final result.
    ///
    /// Only failures to report on the queues are returned as errors.
    pub async fn run(&self, worker_task: WorkerTask) -> Result<WorkerTaskResult> {
        let WorkerTask {
            task_run,
            task,
            variables,
        } = worker_task;

        if self.is_killed(&task_run.execution_id) {
            return self.finish(task_run.with_state(StateType::Killed)).await;
        }

        let running = task_run.with_state(StateType::Running);
        log_task_run_operation(
            "start",
            &running.execution_id,
            &running.id,
            &running.task_id,
            running.value.as_deref(),
            StateType::Running.as_str(),
            None,
        );
        self.emit(running.clone()).await?;

        self.in_flight
            .insert(running.id.clone(), running.execution_id.clone());
        let task_run_id = running.id.clone();
        let outcome = self.run_with_retry(running, &task, &variables).await;
        self.in_flight.remove(&task_run_id);

        self.finish(outcome?).await
    }

    async fn run_with_retry(
        &self,
        mut current: TaskRun,
        task: &Task,
        variables: &Map<String, Value>,
    ) -> Result<TaskRun> {
        let runnable = task
            .task_type()
            .and_then(|task_type| self.runnables.get(task_type))
            .map(|entry| Arc::clone(entry.value()));

        let Some(runnable) = runnable else {
            let failed = current.fail();
            let message = match task.task_type() {
                Some(task_type) => format!("No runnable task registered for type '{task_type}'"),
                None => format!("Task '{}' is not runnable", task.id),
            };
            self.emit_logs(vec![LogEntry::of_task_run(&failed, LogLevel::Error, message)])
                .await?;
            return Ok(failed);
        };

        loop {
            let (attempted, logs) = self
                .run_attempt(Arc::clone(&runnable), task, variables, &current)
                .await;
            current = attempted;
            self.emit_logs(logs).await?;

            let last_failed = current
                .last_attempt()
                .is_some_and(|attempt| attempt.state.is_failed());
            let next_retry = match &task.retry {
                Some(retry) if last_failed => current.next_retry_date(retry),
                _ => None,
            };
            let Some(next_retry) = next_retry else {
                break;
            };

            self.emit(current.clone()).await?;
            let delay = (next_retry - Utc::now()).to_std().unwrap_or_default();
            debug!(
                task_run_id = %current.id,
                attempt = current.attempt_number(),
                delay_ms = delay.as_millis() as u64,
                "Retrying failed attempt"
            );
            tokio::time::sleep(delay).await;

            if self.is_killed(&current.execution_id) {
                return Ok(current.with_state(StateType::Killed));
            }
        }

        let mut final_state = current
            .last_attempt()
            .map(|attempt| attempt.state.current())
            .unwrap_or(StateType::Failed);

        if final_state == StateType::Failed && task.allow_failure {
            final_state = StateType::Warning;
        }
        if final_state == StateType::Success
            && current.attempt_number() > 1
            && task.retry.as_ref().is_some_and(|retry| retry.warning_on_retry)
        {
            final_state = StateType::Warning;
        }

        Ok(current.with_state(final_state))
    }

    /// One attempt appended to `task_run`, with the logs it produced
    async fn run_attempt(
        &self,
        runnable: Arc<dyn RunnableTask>,
        task: &Task,
        variables: &Map<String, Value>,
        task_run: &TaskRun,
    ) -> (TaskRun, Vec<LogEntry>) {
        let mut attempts = task_run.attempts.clone();
        attempts.push(TaskRunAttempt::new(State::of_type(StateType::Running)));
        let running = task_run.with_attempts(attempts);
        let run_context = RunContext::for_attempt(variables.clone(), &running);

        let outcome = execute(runnable, run_context.clone(), task).await;

        let (state, outputs, error_logs) = match outcome {
            Ok(output) => (
                output.state.unwrap_or(StateType::Success),
                Some(output.outputs),
                Vec::new(),
            ),
            Err(err) => {
                warn!(
                    task_run_id = %running.id,
                    task_id = %running.task_id,
                    attempt = running.attempt_number(),
                    error = %err,
                    "Task attempt failed"
                );
                let template = LogEntry::of_task_run(&running, LogLevel::Error, String::new());
                (StateType::Failed, None, LogEntry::from_error(&template, &err))
            }
        };

        let mut attempts = running.attempts.clone();
        if let Some(last) = attempts.last_mut() {
            *last = last.with_state(state).with_metrics(run_context.metrics());
        }
        let mut attempted = running.with_attempts(attempts);
        if let Some(outputs) = outputs.filter(|outputs| !outputs.is_empty()) {
            attempted = attempted.with_outputs(outputs);
        }

        let mut logs = run_context.logs();
        logs.extend(error_logs);
        (attempted, logs)
    }

    async fn finish(&self, task_run: TaskRun) -> Result<WorkerTaskResult> {
        log_task_run_operation(
            "terminate",
            &task_run.execution_id,
            &task_run.id,
            &task_run.task_id,
            task_run.value.as_deref(),
            task_run.state.current().as_str(),
            Some(&task_run.state.human_duration()),
        );
        self.emit(task_run.clone()).await?;
        Ok(WorkerTaskResult::new(task_run))
    }

    async fn emit(&self, task_run: TaskRun) -> Result<()> {
        self.result_queue
            .emit(WorkerTaskResult::new(task_run))
            .await
            .map_err(ConductorError::from)
    }

    async fn emit_logs(&self, logs: Vec<LogEntry>) -> Result<()> {
        match &self.log_queue {
            Some(queue) => {
                for log in logs {
                    queue.emit(log).await?;
                }
            }
            None => {
                for log in logs {
                    debug!(
                        task_run_id = ?log.task_run_id,
                        level = %log.level,
                        message = %log.message,
                        "Task log"
                    );
                }
            }
        }
        Ok(())
    }

    fn set_state(&self, state: ServiceState) {
        *self.state.write() = state;
        log_service_operation("state", &self.id, ServiceType::Worker.as_str(), state.as_str(), None);
        if let Some(events) = &self.events {
            events.publish(ServiceStateChangeEvent::new(&self.id, ServiceType::Worker, state));
        }
    }

    /// Whether every in-flight task finished within `timeout`
    async fn await_in_flight(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while !self.in_flight.is_empty() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .is_ok()
    }
}

/// Runs the body on its own task so that a panic or a timeout only fails the attempt
async fn execute(
    runnable: Arc<dyn RunnableTask>,
    run_context: RunContext,
    task: &Task,
) -> std::result::Result<TaskOutput, TaskError> {
    let owned_task = task.clone();
    let mut handle =
        tokio::spawn(async move { runnable.run(&run_context, &owned_task).await });

    let joined = match task.timeout_ms {
        Some(timeout_ms) => {
            let timeout = Duration::from_millis(timeout_ms);
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    return Err(TaskError::Timeout(timeout));
                }
            }
        }
        None => handle.await,
    };

    match joined {
        Ok(result) => result,
        Err(join_error) if join_error.is_panic() => {
            Err(TaskError::Panicked(panic_message(join_error.into_panic())))
        }
        Err(join_error) => Err(TaskError::Failed(join_error.to_string())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}

#[async_trait]
impl Service for Worker {
    fn id(&self) -> &str {
        &self.id
    }

    fn service_type(&self) -> ServiceType {
        ServiceType::Worker
    }

    fn state(&self) -> ServiceState {
        *self.state.read()
    }

    fn metrics(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("in_flight".to_string(), self.in_flight.len() as f64),
            ("available_permits".to_string(), self.permits.available_permits() as f64),
            ("registered_types".to_string(), self.runnables.len() as f64),
        ])
    }

    fn skip_graceful_termination(&self, skip: bool) {
        self.skip_graceful_termination.store(skip, Ordering::SeqCst);
    }

    async fn close(&self) -> Result<()> {
        self.set_state(ServiceState::Terminating);

        let consumers: Vec<CancelHandle> = self.consumers.lock().drain(..).collect();
        for consumer in consumers {
            consumer.cancel();
        }

        let graceful = self.in_flight.is_empty()
            || (!self.skip_graceful_termination.load(Ordering::SeqCst)
                && self.await_in_flight(self.config.shutdown_timeout()).await);
        self.permits.close();

        if graceful {
            self.set_state(ServiceState::TerminatedGracefully);
        } else {
            warn!(
                worker_id = %self.id,
                in_flight = self.in_flight.len(),
                "Worker terminated with tasks still running"
            );
            self.set_state(ServiceState::TerminatedForced);
        }

        Ok(())
    }
}
