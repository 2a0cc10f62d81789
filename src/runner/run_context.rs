//! # Run Context
//!
//! The environment a task body runs in: the variable scope, template rendering over it,
//! metric registration and task log capture. Clones share the captured metrics and logs.

use chrono::Utc;
use minijinja::value::ValueKind;
use minijinja::{escape_formatter, Environment, ErrorKind, Output, State, UndefinedBehavior};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::{ConductorError, Result};
use crate::models::{Execution, Flow, LogEntry, LogLevel, MetricEntry, TaskRun};

#[derive(Debug, Clone, Default)]
pub struct RunContext {
    variables: Arc<Map<String, Value>>,
    metrics: Arc<Mutex<Vec<MetricEntry>>>,
    logs: Arc<Mutex<Vec<LogEntry>>>,
    log_template: Option<LogEntry>,
}

impl RunContext {
    pub fn new(variables: Map<String, Value>) -> Self {
        Self {
            variables: Arc::new(variables),
            ..Self::default()
        }
    }

    /// Variable scope of `execution`, seen from `task_run` when given
    pub fn for_execution(flow: &Flow, execution: &Execution, task_run: Option<&TaskRun>) -> Self {
        let mut variables = Map::new();

        variables.insert(
            "flow".to_string(),
            json!({
                "id": flow.id,
                "namespace": flow.namespace,
                "revision": flow.revision,
            }),
        );
        variables.insert(
            "execution".to_string(),
            json!({
                "id": execution.id,
                "originalId": execution.original_id,
                "startDate": execution.state.start_date(),
            }),
        );
        variables.insert("inputs".to_string(), Value::Object(execution.inputs.clone()));
        variables.insert("outputs".to_string(), Value::Object(execution.outputs()));
        variables.insert(
            "labels".to_string(),
            Value::Object(
                execution
                    .labels
                    .iter()
                    .map(|label| (label.key.clone(), Value::String(label.value.clone())))
                    .collect(),
            ),
        );
        for (key, value) in &execution.variables {
            variables.insert(key.clone(), value.clone());
        }

        if let Some(task_run) = task_run {
            variables.insert(
                "taskrun".to_string(),
                json!({
                    "id": task_run.id,
                    "value": task_run.value,
                    "parentId": task_run.parent_task_run_id,
                    "attemptsCount": task_run.attempt_number(),
                }),
            );
            variables.insert("task".to_string(), json!({ "id": task_run.task_id }));

            let parents = execution.parents(task_run);
            if let Some(parent) = parents.first() {
                variables.insert("parent".to_string(), Value::Object(parent.clone()));
            }
            variables.insert(
                "parents".to_string(),
                Value::Array(parents.into_iter().map(Value::Object).collect()),
            );
        }

        Self::new(variables)
    }

    /// Context for one attempt of `task_run`; task logs are attributed to it
    pub fn for_attempt(variables: Map<String, Value>, task_run: &TaskRun) -> Self {
        Self {
            log_template: Some(LogEntry::of_task_run(task_run, LogLevel::Info, String::new())),
            ..Self::new(variables)
        }
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// Renders `template` over the variable scope. Strings are inserted raw, lists and
    /// objects as JSON. Undefined variables are an error.
    pub fn render(&self, template: &str) -> Result<String> {
        if !template.contains("{{") && !template.contains("{%") {
            return Ok(template.to_string());
        }

        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_formatter(json_formatter);
        env.render_str(template, self.variables.as_ref())
            .map_err(|e| ConductorError::Render(format!("Unable to render '{template}': {e}")))
    }

    /// Resolves a dotted path; numeric segments index arrays
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next().filter(|s| !s.is_empty())?;
        let mut current = self.variables.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn counter(&self, name: impl Into<String>, value: f64) {
        self.metrics.lock().push(MetricEntry::counter(name, value));
    }

    pub fn timer(&self, name: impl Into<String>, duration: std::time::Duration) {
        self.metrics.lock().push(MetricEntry::timer(name, duration));
    }

    pub fn metrics(&self) -> Vec<MetricEntry> {
        self.metrics.lock().clone()
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        let entry = match &self.log_template {
            Some(template) => LogEntry {
                level,
                message,
                timestamp: Utc::now(),
                ..template.clone()
            },
            None => {
                tracing::debug!(level = %level, message = %message, "Task log without task run");
                return;
            }
        };
        self.logs.lock().push(entry);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.logs.lock().clone()
    }
}

/// Lists and objects are written as JSON so that rendered for-each values parse back
fn json_formatter(
    out: &mut Output,
    state: &State,
    value: &minijinja::Value,
) -> std::result::Result<(), minijinja::Error> {
    match value.kind() {
        ValueKind::Seq | ValueKind::Map => {
            let json = serde_json::to_string(value)
                .map_err(|e| minijinja::Error::new(ErrorKind::BadSerialization, e.to_string()))?;
            out.write_str(&json)
                .map_err(|e| minijinja::Error::new(ErrorKind::WriteFailure, e.to_string()))
        }
        _ => escape_formatter(out, state, value),
    }
}
