use conductor_core::models::{DagTask, Execution, Flow, RetryPolicy, StateType, Task, TaskKind};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::common::{echo, inputs, FailTimes, Harness};

fn task_ids(execution: &Execution) -> Vec<&str> {
    execution
        .task_run_list
        .iter()
        .map(|task_run| task_run.task_id.as_str())
        .collect()
}

fn state_of(execution: &Execution, task_id: &str) -> StateType {
    execution.find_task_runs_by_task_id(task_id)[0].state.current()
}

#[tokio::test]
async fn test_outputs_flow_into_later_tasks() {
    let flow = Flow::new(
        "company.team",
        "greetings",
        vec![
            echo("extract", "hello {{ inputs.name }}"),
            echo("print", "{{ outputs.extract.message }}!"),
        ],
    );
    let execution = Execution::new_execution(&flow, Some(inputs(json!({ "name": "world" }))), Vec::new());

    let execution = Harness::new().run(&flow, execution).await;

    assert_eq!(execution.state.current(), StateType::Success);
    assert_eq!(task_ids(&execution), vec!["extract", "print"]);
    assert_eq!(execution.outputs()["print"]["message"], "hello world!");
}

#[tokio::test]
async fn test_dag_respects_dependencies() {
    let dag = Task::of_kind(
        "fan-out",
        TaskKind::Dag {
            tasks: vec![
                DagTask {
                    task: echo("index", "index"),
                    depends_on: vec!["load".to_string()],
                },
                DagTask {
                    task: echo("load", "load"),
                    depends_on: Vec::new(),
                },
                DagTask {
                    task: echo("report", "report"),
                    depends_on: vec!["load".to_string(), "index".to_string()],
                },
            ],
            errors: Vec::new(),
            concurrency: 0,
        },
    );
    let flow = Flow::new("company.team", "dag", vec![dag]);

    let execution = Harness::new()
        .run(&flow, Execution::new_execution(&flow, None, Vec::new()))
        .await;

    assert_eq!(execution.state.current(), StateType::Success);
    assert_eq!(task_ids(&execution), vec!["fan-out", "load", "index", "report"]);
}

#[tokio::test]
async fn test_switch_runs_the_selected_case() {
    let switch = Task::of_kind(
        "route",
        TaskKind::Switch {
            value: "{{ inputs.mode }}".to_string(),
            cases: BTreeMap::from([("full".to_string(), vec![echo("full", "full")])]),
            defaults: vec![echo("partial", "partial")],
            errors: Vec::new(),
        },
    );
    let flow = Flow::new("company.team", "switch", vec![switch]);
    let harness = Harness::new();

    let full = harness
        .run(&flow, Execution::new_execution(&flow, Some(inputs(json!({ "mode": "full" }))), Vec::new()))
        .await;
    assert_eq!(task_ids(&full), vec!["route", "full"]);
    assert_eq!(full.state.current(), StateType::Success);

    let other = harness
        .run(&flow, Execution::new_execution(&flow, Some(inputs(json!({ "mode": "delta" }))), Vec::new()))
        .await;
    assert_eq!(task_ids(&other), vec!["route", "partial"]);
}

#[tokio::test]
async fn test_for_each_runs_once_per_distinct_value() {
    let each = Task::of_kind(
        "each",
        TaskKind::ForEach {
            values: "{{ inputs.items }}".to_string(),
            tasks: vec![echo("item", "processing {{ taskrun.value }}")],
            errors: Vec::new(),
        },
    );
    let flow = Flow::new("company.team", "each", vec![each]);
    let execution = Execution::new_execution(
        &flow,
        Some(inputs(json!({ "items": ["a", "b", "a"] }))),
        Vec::new(),
    );

    let execution = Harness::new().run(&flow, execution).await;

    assert_eq!(execution.state.current(), StateType::Success);
    let values: Vec<_> = execution
        .find_task_runs_by_task_id("item")
        .iter()
        .map(|task_run| task_run.value.clone().unwrap_or_default())
        .collect();
    assert_eq!(values, vec!["a", "b"]);

    let outputs = execution.outputs();
    assert_eq!(outputs["item"]["a"]["message"], "processing a");
    assert_eq!(outputs["item"]["b"]["value"], "b");
}

#[tokio::test]
async fn test_retried_task_succeeds() {
    let harness = Harness::new();
    harness.worker.register("flaky", Arc::new(FailTimes::new(2)));
    let flow = Flow::new(
        "company.team",
        "retry",
        vec![Task::runnable("flaky", "flaky").with_retry(RetryPolicy::constant(1, 5))],
    );

    let execution = harness
        .run(&flow, Execution::new_execution(&flow, None, Vec::new()))
        .await;

    assert_eq!(execution.state.current(), StateType::Success);
    let task_run = execution.find_task_runs_by_task_id("flaky")[0];
    let attempts: Vec<_> = task_run.attempts.iter().map(|a| a.state.current()).collect();
    assert_eq!(attempts, vec![StateType::Failed, StateType::Failed, StateType::Success]);
}

#[tokio::test]
async fn test_failure_runs_error_handlers() {
    let flow = Flow::new(
        "company.team",
        "failing",
        vec![Task::runnable("broken", "fail"), echo("never", "never")],
    )
    .with_errors(vec![echo("alert", "{{ flow.id }} failed")]);

    let execution = Harness::new()
        .run(&flow, Execution::new_execution(&flow, None, Vec::new()))
        .await;

    assert_eq!(execution.state.current(), StateType::Failed);
    assert_eq!(task_ids(&execution), vec!["broken", "alert"]);
    assert_eq!(state_of(&execution, "alert"), StateType::Success);
    assert_eq!(execution.outputs()["alert"]["message"], "failing failed");
}

#[tokio::test]
async fn test_allowed_failure_ends_in_warning() {
    let flow = Flow::new(
        "company.team",
        "tolerant",
        vec![
            Task::runnable("optional", "fail").with_allow_failure(true),
            echo("next", "next"),
        ],
    );

    let execution = Harness::new()
        .run(&flow, Execution::new_execution(&flow, None, Vec::new()))
        .await;

    assert_eq!(state_of(&execution, "optional"), StateType::Warning);
    assert_eq!(state_of(&execution, "next"), StateType::Success);
    assert_eq!(execution.state.current(), StateType::Warning);
}

#[tokio::test]
async fn test_parallel_concurrency_limits_dispatch() {
    let parallel = Task::of_kind(
        "parallel",
        TaskKind::Parallel {
            tasks: vec![echo("x", "x"), echo("y", "y"), echo("z", "z")],
            errors: Vec::new(),
            concurrency: 1,
        },
    );
    let flow = Flow::new("company.team", "parallel", vec![parallel]);
    let harness = Harness::new();

    let first = harness
        .service
        .process(&flow, Execution::new_execution(&flow, None, Vec::new()));
    assert_eq!(first.worker_tasks.len(), 1);
    assert_eq!(first.worker_tasks[0].task.id, "x");

    let execution = harness
        .run(&flow, Execution::new_execution(&flow, None, Vec::new()))
        .await;
    assert_eq!(execution.state.current(), StateType::Success);
    assert_eq!(task_ids(&execution), vec!["parallel", "x", "y", "z"]);
}
