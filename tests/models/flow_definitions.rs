use conductor_core::models::{Execution, Flow, StateType, TaskKind};
use serde_json::json;

fn definition() -> serde_json::Value {
    json!({
        "id": "nightly",
        "namespace": "company.data",
        "tasks": [
            { "id": "extract", "type": "runnable", "task_type": "echo" },
            {
                "id": "fan-out",
                "type": "dag",
                "concurrency": 2,
                "tasks": [
                    { "task": { "id": "load", "type": "runnable", "task_type": "echo" } },
                    {
                        "task": { "id": "index", "type": "runnable", "task_type": "echo" },
                        "depends_on": ["load"]
                    }
                ]
            },
            {
                "id": "route",
                "type": "switch",
                "value": "{{ inputs.mode }}",
                "cases": { "full": [{ "id": "full", "type": "runnable", "task_type": "echo" }] },
                "defaults": [{ "id": "partial", "type": "runnable", "task_type": "echo" }]
            }
        ],
        "errors": [{ "id": "alert", "type": "runnable", "task_type": "echo" }]
    })
}

#[test]
fn test_flow_definition_is_parsed_and_valid() {
    let flow: Flow = serde_json::from_value(definition()).unwrap();

    assert_eq!(flow.uid(), "company.data.nightly");
    assert_eq!(flow.revision, 1);
    assert!(flow.validate().is_ok());

    let ids: Vec<_> = flow.all_tasks().iter().map(|task| task.id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["extract", "fan-out", "load", "index", "route", "full", "partial", "alert"]
    );

    let dag = flow.find_task_by_task_id("fan-out").unwrap();
    assert!(matches!(dag.kind, TaskKind::Dag { concurrency: 2, .. }));
    assert!(flow.find_task_by_task_id("index").unwrap().is_runnable());
    assert!(flow.find_task_by_task_id("unknown").is_err());
}

#[test]
fn test_invalid_flow_reports_every_violation() {
    let mut definition = definition();
    definition["tasks"][1]["tasks"][0]["depends_on"] = json!(["index"]);
    definition["errors"][0]["id"] = json!("extract");
    let flow: Flow = serde_json::from_value(definition).unwrap();

    let violations = flow.validate().unwrap_err().messages();
    assert!(violations.iter().any(|m| m.contains("dependency cycle")));
    assert!(violations.iter().any(|m| m.contains("duplicate task ids: extract")));
}

#[test]
fn test_execution_wire_format() {
    let flow: Flow = serde_json::from_value(definition()).unwrap();
    let execution = Execution::new_execution(&flow, None, Vec::new());

    let value = serde_json::to_value(&execution).unwrap();
    assert_eq!(value["flowId"], "nightly");
    assert_eq!(value["originalId"], value["id"]);
    assert!(value["taskRunList"].as_array().unwrap().is_empty());

    let parsed: Execution = serde_json::from_value(value).unwrap();
    assert_eq!(parsed, execution);
    assert_eq!(parsed.state.current(), StateType::Created);
}
