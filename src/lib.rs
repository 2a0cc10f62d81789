#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Conductor Core
//!
//! Core of a durable workflow orchestration engine.
//!
//! ## Overview
//!
//! A [`Flow`](models::Flow) declares a tree of tasks. Each run of a flow is an
//! [`Execution`](models::Execution), an immutable value holding one
//! [`TaskRun`](models::TaskRun) per task instance together with its state history.
//! Executions are never mutated in place: every operation returns a new copy, and the
//! owner of an execution id replaces it wholesale.
//!
//! ## Architecture
//!
//! - The [`ExecutorService`](runner::ExecutorService) reacts to execution changes,
//!   resolves the next task runs of flowable tasks (sequential, parallel, DAG, switch,
//!   for-each) and emits [`WorkerTask`](runner::WorkerTask) messages for runnable ones.
//! - A [`Worker`](runner::Worker) pool consumes them, runs attempts with retry, timeout and
//!   panic containment, and emits [`WorkerTaskResult`](runner::WorkerTaskResult) messages
//!   merged back into the execution.
//! - Every local [`Service`](server::Service) heartbeats its shared
//!   [`ServiceInstance`](server::ServiceInstance) record through the
//!   [`ServiceLivenessManager`](server::ServiceLivenessManager); the
//!   [`ServiceLivenessCoordinator`](server::ServiceLivenessCoordinator) retires the records
//!   of peers that stopped responding.
//!
//! ## Module Organization
//!
//! - [`models`] - Flows, executions, task runs, states and retry policies
//! - [`runner`] - Flowable resolution, executor, worker and queues
//! - [`server`] - Service lifecycle, liveness manager and coordinator
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust
//! use conductor_core::config::ConductorConfig;
//! use conductor_core::models::{Execution, Flow, Task};
//! use conductor_core::runner::{ExecutorService, InMemoryQueue, WorkerTask};
//!
//! # tokio_test::block_on(async {
//! let flow = Flow::new("company.team", "hello", vec![Task::runnable("say-hello", "echo")]);
//! let config = ConductorConfig::default();
//! let executor = ExecutorService::new(config.executor.clone());
//! let worker_tasks: InMemoryQueue<WorkerTask> = InMemoryQueue::new("worker-tasks");
//!
//! let processed = executor.process(&flow, Execution::new_execution(&flow, None, Vec::new()));
//! executor.emit_worker_tasks(&processed, &worker_tasks).await.unwrap();
//! assert_eq!(worker_tasks.emitted().len(), 1);
//! # });
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit, integration and property based tests
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod runner;
pub mod server;
pub mod utils;
pub mod validation;

pub use config::{ConductorConfig, ConfigManager, WorkerTaskRestartStrategy};
pub use error::{ConductorError, Result};
pub use models::{Execution, Flow, StateType, Task, TaskRun};
pub use runner::{ExecutorService, Worker, WorkerTask, WorkerTaskResult};
pub use server::{
    ServiceInstance, ServiceLivenessCoordinator, ServiceLivenessManager, ServiceState,
    ServiceType,
};
