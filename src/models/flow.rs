//! Flow definitions: the task tree an execution runs.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::task::Task;
use crate::error::{ConductorError, Result};
use crate::validation::{ConstraintViolations, Violations};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: String,
}

impl Label {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub namespace: String,
    #[serde(default = "default_revision")]
    pub revision: u32,
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub errors: Vec<Task>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub disabled: bool,
}

fn default_revision() -> u32 {
    1
}

impl Flow {
    pub fn new(namespace: impl Into<String>, id: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self {
            id: id.into(),
            namespace: namespace.into(),
            revision: default_revision(),
            tasks,
            errors: Vec::new(),
            labels: Vec::new(),
            disabled: false,
        }
    }

    pub fn with_errors(mut self, errors: Vec<Task>) -> Self {
        self.errors = errors;
        self
    }

    /// `namespace.id`, used in messages
    pub fn uid(&self) -> String {
        format!("{}.{}", self.namespace, self.id)
    }

    /// Every task of the tree, depth first
    pub fn all_tasks(&self) -> Vec<&Task> {
        let mut result = Vec::new();
        let mut stack: Vec<&Task> = self.tasks.iter().chain(self.errors.iter()).rev().collect();
        while let Some(task) = stack.pop() {
            result.push(task);
            stack.extend(task.children().into_iter().rev());
        }
        result
    }

    pub fn find_task_by_task_id(&self, id: &str) -> Result<&Task> {
        self.tasks
            .iter()
            .chain(self.errors.iter())
            .find_map(|task| task.find_task(id))
            .ok_or_else(|| ConductorError::task_not_found(id, &self.uid()))
    }

    /// Validate the whole flow, reporting every problem at once
    pub fn validate(&self) -> std::result::Result<(), ConstraintViolations> {
        let mut violations = Violations::new();

        violations.check(!self.id.trim().is_empty(), "id", "must not be empty");
        violations.check(!self.namespace.trim().is_empty(), "namespace", "must not be empty");
        violations.check(!self.tasks.is_empty(), "tasks", "must not be empty");

        for (index, task) in self.tasks.iter().enumerate() {
            task.validate(&mut violations, &format!("tasks[{index}]"));
        }
        for (index, task) in self.errors.iter().enumerate() {
            task.validate(&mut violations, &format!("errors[{index}]"));
        }

        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for task in self.all_tasks() {
            if !seen.insert(task.id.as_str()) && !duplicates.contains(&task.id.as_str()) {
                duplicates.push(task.id.as_str());
            }
        }
        if !duplicates.is_empty() {
            violations.add("tasks", format!("duplicate task ids: {}", duplicates.join(", ")));
        }

        violations.into_result()
    }
}
