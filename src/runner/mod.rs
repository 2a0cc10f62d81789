//! # Runner
//!
//! Everything that moves an execution forward: flowable resolution, the executor reaction
//! loop, the worker retry loop and the queues connecting them.

pub mod executor;
pub mod flowable;
pub mod flowable_utils;
pub mod queue;
pub mod run_context;
pub mod worker;
pub mod worker_task;

pub use executor::{Executor, ExecutorService};
pub use queue::{CancelHandle, Consumer, InMemoryQueue, QueueError, QueueInterface};
pub use run_context::RunContext;
pub use worker::{RunnableTask, TaskError, TaskOutput, Worker};
pub use worker_task::{WorkerTask, WorkerTaskResult};
