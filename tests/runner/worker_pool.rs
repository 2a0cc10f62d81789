use conductor_core::config::WorkerConfig;
use conductor_core::models::{Execution, Flow, StateType, Task, TaskKind};
use conductor_core::runner::{ExecutorService, InMemoryQueue, Worker, WorkerTask, WorkerTaskResult};
use conductor_core::server::{Service, ServiceState};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{echo, Echo};

/// Waits until `count` results reported a terminated task run
async fn wait_for_terminated(results: &InMemoryQueue<WorkerTaskResult>, count: usize) {
    for _ in 0..200 {
        let terminated = results
            .emitted()
            .iter()
            .filter(|result| result.task_run.state.is_terminated())
            .count();
        if terminated >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("only {} results received", results.emitted().len());
}

#[tokio::test]
async fn test_worker_pool_runs_dispatched_tasks() {
    let parallel = Task::of_kind(
        "parallel",
        TaskKind::Parallel {
            tasks: vec![echo("a", "a"), echo("b", "b"), echo("c", "c")],
            errors: Vec::new(),
            concurrency: 0,
        },
    );
    let flow = Flow::new("company.team", "pool", vec![parallel]);

    let tasks: Arc<InMemoryQueue<WorkerTask>> = Arc::new(InMemoryQueue::new("worker-tasks"));
    let results: Arc<InMemoryQueue<WorkerTaskResult>> = Arc::new(InMemoryQueue::new("worker-results"));
    let worker = Arc::new(Worker::new(
        WorkerConfig {
            threads: 2,
            ..WorkerConfig::default()
        },
        results.clone(),
    ));
    worker.register("echo", Arc::new(Echo));
    worker.start(tasks.as_ref());

    let service = ExecutorService::default();
    let executor = service.process(&flow, Execution::new_execution(&flow, None, Vec::new()));
    assert_eq!(executor.worker_tasks.len(), 3);
    service.emit_worker_tasks(&executor, tasks.as_ref()).await.unwrap();

    wait_for_terminated(&results, 3).await;

    let mut execution = executor.execution;
    for result in results.emitted() {
        if let Some(updated) = service.add_worker_task_result(&execution, &result).unwrap() {
            execution = updated;
        }
    }
    let executor = service.process(&flow, execution);
    assert_eq!(executor.execution.state.current(), StateType::Success);

    worker.close().await.unwrap();
    assert_eq!(worker.state(), ServiceState::TerminatedGracefully);
    assert_eq!(worker.in_flight_count(), 0);
}

#[tokio::test]
async fn test_killed_execution_stops_on_worker() {
    let flow = Flow::new("company.team", "kill", vec![echo("a", "a")]);
    let results: Arc<InMemoryQueue<WorkerTaskResult>> = Arc::new(InMemoryQueue::new("worker-results"));
    let worker = Worker::new(WorkerConfig::default(), results.clone());
    worker.register("echo", Arc::new(Echo));

    let service = ExecutorService::default();
    let executor = service.process(&flow, Execution::new_execution(&flow, None, Vec::new()));
    let worker_task = executor.worker_tasks[0].clone();

    let killing = service.kill(&executor.execution);
    worker.kill(&killing.id);
    let result = worker.run(worker_task).await.unwrap();
    assert_eq!(result.task_run.state.current(), StateType::Killed);

    let execution = service
        .add_worker_task_result(&killing, &result)
        .unwrap()
        .unwrap();
    let executor = service.process(&flow, execution);
    assert_eq!(executor.execution.state.current(), StateType::Killed);
}
