//! # Task Tree
//!
//! Tasks are a tagged union: a runnable leaf executed by a worker, or a flowable container
//! (sequential, parallel, dag, switch, for-each) that the executor resolves into child
//! task runs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::execution::Execution;
use super::retry::RetryPolicy;
use super::task_run::TaskRun;
use crate::validation::Violations;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(flatten)]
    pub kind: TaskKind,
    #[serde(default)]
    pub disabled: bool,
    /// A FAILED outcome is reported as WARNING and does not fail the parent
    #[serde(default)]
    pub allow_failure: bool,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// Leaf task, executed by the worker registered for `task_type`
    Runnable {
        task_type: String,
        #[serde(default)]
        properties: Map<String, Value>,
    },
    /// Children run one after the other
    Sequential {
        tasks: Vec<Task>,
        #[serde(default)]
        errors: Vec<Task>,
    },
    /// Children run together, at most `concurrency` at a time (0 means unbounded)
    Parallel {
        tasks: Vec<Task>,
        #[serde(default)]
        errors: Vec<Task>,
        #[serde(default)]
        concurrency: usize,
    },
    /// Children start once all of their dependencies succeeded
    Dag {
        tasks: Vec<DagTask>,
        #[serde(default)]
        errors: Vec<Task>,
        #[serde(default)]
        concurrency: usize,
    },
    /// Runs the branch selected by the rendered `value`
    Switch {
        value: String,
        #[serde(default)]
        cases: BTreeMap<String, Vec<Task>>,
        #[serde(default)]
        defaults: Vec<Task>,
        #[serde(default)]
        errors: Vec<Task>,
    },
    /// Runs `tasks` sequentially once per value of the rendered JSON array `values`
    ForEach {
        values: String,
        tasks: Vec<Task>,
        #[serde(default)]
        errors: Vec<Task>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagTask {
    pub task: Task,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Task {
    pub fn runnable(id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self::of_kind(
            id,
            TaskKind::Runnable {
                task_type: task_type.into(),
                properties: Map::new(),
            },
        )
    }

    pub fn sequential(id: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self::of_kind(
            id,
            TaskKind::Sequential {
                tasks,
                errors: Vec::new(),
            },
        )
    }

    pub fn of_kind(id: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            id: id.into(),
            kind,
            disabled: false,
            allow_failure: false,
            retry: None,
            timeout_ms: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_allow_failure(mut self, allow_failure: bool) -> Self {
        self.allow_failure = allow_failure;
        self
    }

    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_properties(mut self, properties: Map<String, Value>) -> Self {
        if let TaskKind::Runnable {
            properties: current, ..
        } = &mut self.kind
        {
            *current = properties;
        }
        self
    }

    pub fn is_flowable(&self) -> bool {
        !self.is_runnable()
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self.kind, TaskKind::Runnable { .. })
    }

    pub fn task_type(&self) -> Option<&str> {
        match &self.kind {
            TaskKind::Runnable { task_type, .. } => Some(task_type),
            _ => None,
        }
    }

    /// Error handlers declared on this container
    pub fn errors(&self) -> &[Task] {
        match &self.kind {
            TaskKind::Runnable { .. } => &[],
            TaskKind::Sequential { errors, .. }
            | TaskKind::Parallel { errors, .. }
            | TaskKind::Dag { errors, .. }
            | TaskKind::Switch { errors, .. }
            | TaskKind::ForEach { errors, .. } => errors,
        }
    }

    /// Every direct child, error handlers included
    pub fn children(&self) -> Vec<&Task> {
        let mut children: Vec<&Task> = match &self.kind {
            TaskKind::Runnable { .. } => Vec::new(),
            TaskKind::Sequential { tasks, .. }
            | TaskKind::Parallel { tasks, .. }
            | TaskKind::ForEach { tasks, .. } => tasks.iter().collect(),
            TaskKind::Dag { tasks, .. } => tasks.iter().map(|dag| &dag.task).collect(),
            TaskKind::Switch {
                cases, defaults, ..
            } => cases.values().flatten().chain(defaults.iter()).collect(),
        };
        children.extend(self.errors().iter());
        children
    }

    /// Depth-first search for `id` in this task and its descendants
    pub fn find_task(&self, id: &str) -> Option<&Task> {
        if self.id == id {
            return Some(self);
        }
        self.children().into_iter().find_map(|child| child.find_task(id))
    }

    /// Collects the violations of this task and its descendants
    pub fn validate(&self, violations: &mut Violations, path: &str) {
        violations.check(!self.id.trim().is_empty(), format!("{path}.id"), "must not be empty");

        if let Some(retry) = &self.retry {
            violations.extend_prefixed(path, retry.validate());
        }
        if self.timeout_ms == Some(0) {
            violations.add(format!("{path}.timeout_ms"), "must be greater than 0");
        }

        match &self.kind {
            TaskKind::Runnable { task_type, .. } => {
                violations.check(
                    !task_type.trim().is_empty(),
                    format!("{path}.task_type"),
                    "must not be empty",
                );
            }
            TaskKind::Sequential { tasks, .. }
            | TaskKind::Parallel { tasks, .. }
            | TaskKind::ForEach { tasks, .. } => {
                violations.check(!tasks.is_empty(), format!("{path}.tasks"), "must not be empty");
            }
            TaskKind::Dag { tasks, .. } => {
                violations.check(!tasks.is_empty(), format!("{path}.tasks"), "must not be empty");
                validate_dag(tasks, violations, path);
            }
            TaskKind::Switch {
                value,
                cases,
                defaults,
                ..
            } => {
                violations.check(!value.trim().is_empty(), format!("{path}.value"), "must not be empty");
                violations.check(
                    !cases.is_empty() || !defaults.is_empty(),
                    format!("{path}.cases"),
                    "at least one case or default task is required",
                );
            }
        }

        for (index, child) in self.children().into_iter().enumerate() {
            child.validate(violations, &format!("{path}.{}[{index}]", self.id));
        }
    }
}

fn validate_dag(tasks: &[DagTask], violations: &mut Violations, path: &str) {
    let ids: HashSet<&str> = tasks.iter().map(|dag| dag.task.id.as_str()).collect();

    for dag in tasks {
        for dependency in &dag.depends_on {
            if !ids.contains(dependency.as_str()) {
                violations.add(
                    format!("{path}.tasks.{}", dag.task.id),
                    format!("depends on unknown task '{dependency}'"),
                );
            }
        }
    }

    if let Some(cycle_task) = find_cycle(tasks) {
        violations.add(
            format!("{path}.tasks"),
            format!("dependency cycle detected involving task '{cycle_task}'"),
        );
    }
}

/// Kahn's algorithm: any task left unvisited sits on a cycle
fn find_cycle(tasks: &[DagTask]) -> Option<String> {
    let mut in_degree: HashMap<&str, usize> = tasks
        .iter()
        .map(|dag| (dag.task.id.as_str(), 0usize))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for dag in tasks {
        for dependency in &dag.depends_on {
            if in_degree.contains_key(dependency.as_str()) {
                if let Some(degree) = in_degree.get_mut(dag.task.id.as_str()) {
                    *degree += 1;
                }
                dependents
                    .entry(dependency.as_str())
                    .or_default()
                    .push(dag.task.id.as_str());
            }
        }
    }

    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0;

    while let Some(id) = ready.pop() {
        visited += 1;
        for &dependent in dependents.get(id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(dependent);
                }
            }
        }
    }

    if visited == in_degree.len() {
        return None;
    }

    tasks
        .iter()
        .map(|dag| dag.task.id.as_str())
        .find(|id| in_degree.get(id).is_some_and(|degree| *degree > 0))
        .map(str::to_string)
}

/// A task bound to its owning parent task run and iteration value
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTask {
    pub task: Task,
    pub parent_id: Option<String>,
    pub value: Option<String>,
}

impl ResolvedTask {
    /// Root level tasks, with no parent
    pub fn of(tasks: &[Task]) -> Vec<ResolvedTask> {
        tasks
            .iter()
            .map(|task| ResolvedTask {
                task: task.clone(),
                parent_id: None,
                value: None,
            })
            .collect()
    }

    pub fn to_next_task_run(&self, execution: &Execution) -> NextTaskRun {
        NextTaskRun {
            task_run: TaskRun::of(execution, self),
            task: self.task.clone(),
        }
    }
}

/// A task run to append to the execution, with the task that defines it
#[derive(Debug, Clone, PartialEq)]
pub struct NextTaskRun {
    pub task_run: TaskRun,
    pub task: Task,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dag(id: &str, depends_on: &[&str]) -> DagTask {
        DagTask {
            task: Task::runnable(id, "noop"),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn test_deserialize_tree() {
        let task: Task = serde_json::from_value(json!({
            "id": "root",
            "type": "sequential",
            "tasks": [
                {"id": "a", "type": "runnable", "task_type": "log", "properties": {"message": "hi"}},
                {"id": "b", "type": "for_each", "values": "[1, 2]", "tasks": [
                    {"id": "c", "type": "runnable", "task_type": "log", "allow_failure": true}
                ]}
            ]
        }))
        .unwrap();

        assert!(task.is_flowable());
        let c = task.find_task("c").unwrap();
        assert!(c.is_runnable());
        assert!(c.allow_failure);
        assert_eq!(c.task_type(), Some("log"));
        assert!(task.find_task("missing").is_none());
    }

    #[test]
    fn test_children_include_errors_and_switch_branches() {
        let switch = Task::of_kind(
            "switch",
            TaskKind::Switch {
                value: "{{ inputs.kind }}".to_string(),
                cases: BTreeMap::from([("a".to_string(), vec![Task::runnable("case-a", "noop")])]),
                defaults: vec![Task::runnable("default", "noop")],
                errors: vec![Task::runnable("on-error", "noop")],
            },
        );
        let ids: Vec<_> = switch.children().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["case-a", "default", "on-error"]);
    }

    #[test]
    fn test_dag_validation() {
        let cyclic = Task::of_kind(
            "dag",
            TaskKind::Dag {
                tasks: vec![dag("a", &["c"]), dag("b", &["a"]), dag("c", &["b"]), dag("d", &["x"])],
                errors: Vec::new(),
                concurrency: 0,
            },
        );
        let mut violations = Violations::new();
        cyclic.validate(&mut violations, "tasks[0]");
        let messages = violations.into_result().unwrap_err().messages();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().any(|m| m.contains("unknown task 'x'")));
        assert!(messages.iter().any(|m| m.contains("cycle")));

        let acyclic = Task::of_kind(
            "dag",
            TaskKind::Dag {
                tasks: vec![dag("a", &[]), dag("b", &["a"]), dag("c", &["a", "b"])],
                errors: Vec::new(),
                concurrency: 0,
            },
        );
        let mut violations = Violations::new();
        acyclic.validate(&mut violations, "tasks[0]");
        assert!(violations.is_empty());
    }
}
