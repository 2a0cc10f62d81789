//! Shared fixtures: task bodies, an executor/worker harness and in-process services.

#![allow(dead_code)]

pub mod strategies;

use async_trait::async_trait;
use conductor_core::config::{ExecutorConfig, WorkerConfig};
use conductor_core::error::Result;
use conductor_core::models::{Execution, Flow, Task, TaskKind};
use conductor_core::runner::{
    ExecutorService, InMemoryQueue, RunContext, RunnableTask, TaskError, TaskOutput, Worker,
    WorkerTaskResult,
};
use conductor_core::server::{Service, ServiceState, ServiceType};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Outputs the rendered `message` property and the task run value
pub struct Echo;

#[async_trait]
impl RunnableTask for Echo {
    async fn run(
        &self,
        run_context: &RunContext,
        task: &Task,
    ) -> std::result::Result<TaskOutput, TaskError> {
        let mut outputs = Map::new();
        if let TaskKind::Runnable { properties, .. } = &task.kind {
            if let Some(Value::String(message)) = properties.get("message") {
                let rendered = run_context
                    .render(message)
                    .map_err(|e| TaskError::Failed(e.to_string()))?;
                outputs.insert("message".to_string(), Value::String(rendered));
            }
        }
        if let Some(value) = run_context.lookup("taskrun.value").filter(|v| !v.is_null()) {
            outputs.insert("value".to_string(), value.clone());
        }
        Ok(TaskOutput::new(outputs))
    }
}

/// Fails its first `failures` calls
pub struct FailTimes {
    pub failures: usize,
    pub calls: AtomicUsize,
}

impl FailTimes {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RunnableTask for FailTimes {
    async fn run(
        &self,
        _run_context: &RunContext,
        _task: &Task,
    ) -> std::result::Result<TaskOutput, TaskError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(TaskError::Failed(format!("call {call} failed")));
        }
        Ok(TaskOutput::default())
    }
}

pub fn echo(id: &str, message: &str) -> Task {
    let mut properties = Map::new();
    properties.insert("message".to_string(), Value::String(message.to_string()));
    Task::of_kind(
        id,
        TaskKind::Runnable {
            task_type: "echo".to_string(),
            properties,
        },
    )
}

pub fn inputs(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// Executor and worker wired through an in-memory result queue
pub struct Harness {
    pub service: ExecutorService,
    pub worker: Worker,
    pub results: Arc<InMemoryQueue<WorkerTaskResult>>,
}

impl Harness {
    pub fn new() -> Self {
        let results: Arc<InMemoryQueue<WorkerTaskResult>> = Arc::new(InMemoryQueue::new("results"));
        let worker = Worker::new(WorkerConfig::default(), results.clone());
        worker.register("echo", Arc::new(Echo));
        worker.register("fail", Arc::new(FailTimes::new(usize::MAX)));
        Self {
            service: ExecutorService::new(ExecutorConfig::default()),
            worker,
            results,
        }
    }

    /// Alternates executor reactions and worker runs until the execution terminates
    pub async fn run(&self, flow: &Flow, execution: Execution) -> Execution {
        let mut execution = execution;
        for _ in 0..100 {
            let executor = self.service.process(flow, execution);
            execution = executor.execution;
            if execution.state.is_terminated() {
                return execution;
            }

            for worker_task in executor.worker_tasks {
                self.worker
                    .run(worker_task)
                    .await
                    .expect("results are emitted on an open queue");
            }
            for result in self.results.emitted() {
                if let Some(updated) = self
                    .service
                    .add_worker_task_result(&execution, &result)
                    .expect("worker results apply to the execution")
                {
                    execution = updated;
                }
            }
            self.results.clear_emitted();
        }
        panic!("execution did not terminate: {}", execution.to_string_state());
    }
}

/// A service whose state is driven by the test
pub struct ManualService {
    pub id: String,
    pub service_type: ServiceType,
    pub state: RwLock<ServiceState>,
    pub closed: AtomicUsize,
}

impl ManualService {
    pub fn new(id: &str, service_type: ServiceType) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            service_type,
            state: RwLock::new(ServiceState::Created),
            closed: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, state: ServiceState) {
        *self.state.write() = state;
    }
}

#[async_trait]
impl Service for ManualService {
    fn id(&self) -> &str {
        &self.id
    }

    fn service_type(&self) -> ServiceType {
        self.service_type
    }

    fn state(&self) -> ServiceState {
        *self.state.read()
    }

    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.set(ServiceState::TerminatedGracefully);
        Ok(())
    }
}
