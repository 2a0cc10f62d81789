//! Model validation for Conductor Core
//!
//! Validation never stops at the first problem: every validated object reports all of its
//! violations at once through [`ConstraintViolations`], so a flow author can fix everything
//! in a single round trip.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Maximum nesting depth for execution inputs
const MAX_INPUT_DEPTH: usize = 10;

/// Maximum number of keys in an input object
const MAX_INPUT_KEYS: usize = 1000;

/// Maximum string length for input keys and string values
const MAX_INPUT_STRING_LENGTH: usize = 10000;

/// A single violation, located by a dotted path inside the validated object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintViolation {
    pub path: String,
    pub message: String,
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// All violations found while validating one object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} violation(s): {}", .violations.len(), render(.violations))]
pub struct ConstraintViolations {
    pub violations: Vec<ConstraintViolation>,
}

fn render(violations: &[ConstraintViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ConstraintViolations {
    pub fn messages(&self) -> Vec<String> {
        self.violations.iter().map(ToString::to_string).collect()
    }
}

/// Accumulates violations while walking an object graph.
#[derive(Debug, Default)]
pub struct Violations {
    violations: Vec<ConstraintViolation>,
}

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.violations.push(ConstraintViolation {
            path: path.into(),
            message: message.into(),
        });
    }

    /// Adds a violation when `condition` does not hold.
    pub fn check(&mut self, condition: bool, path: impl Into<String>, message: impl Into<String>) {
        if !condition {
            self.add(path, message);
        }
    }

    pub fn extend_prefixed(&mut self, prefix: &str, other: Violations) {
        for violation in other.violations {
            self.violations.push(ConstraintViolation {
                path: format!("{prefix}.{}", violation.path),
                message: violation.message,
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn into_result(self) -> Result<(), ConstraintViolations> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(ConstraintViolations {
                violations: self.violations,
            })
        }
    }
}

/// Validates execution inputs for size and nesting constraints.
pub fn validate_inputs(inputs: &serde_json::Map<String, Value>) -> Result<(), ConstraintViolations> {
    let mut violations = Violations::new();
    for (key, value) in inputs {
        if key.len() > MAX_INPUT_STRING_LENGTH {
            violations.add(
                "inputs",
                format!("key too long: {} chars (max: {MAX_INPUT_STRING_LENGTH})", key.len()),
            );
        }
        validate_depth(&format!("inputs.{key}"), value, 1, &mut violations);
    }
    violations.into_result()
}

fn validate_depth(path: &str, value: &Value, current_depth: usize, violations: &mut Violations) {
    if current_depth > MAX_INPUT_DEPTH {
        violations.add(
            path,
            format!("nesting too deep: {current_depth} (max: {MAX_INPUT_DEPTH})"),
        );
        return;
    }

    match value {
        Value::Object(map) => {
            if map.len() > MAX_INPUT_KEYS {
                violations.add(
                    path,
                    format!("too many keys: {} (max: {MAX_INPUT_KEYS})", map.len()),
                );
            }
            for (key, val) in map {
                validate_depth(&format!("{path}.{key}"), val, current_depth + 1, violations);
            }
        }
        Value::Array(arr) => {
            if arr.len() > MAX_INPUT_KEYS {
                violations.add(
                    path,
                    format!("array too large: {} items (max: {MAX_INPUT_KEYS})", arr.len()),
                );
            }
            for (index, val) in arr.iter().enumerate() {
                validate_depth(&format!("{path}[{index}]"), val, current_depth + 1, violations);
            }
        }
        Value::String(s) if s.len() > MAX_INPUT_STRING_LENGTH => {
            violations.add(
                path,
                format!("string too long: {} chars (max: {MAX_INPUT_STRING_LENGTH})", s.len()),
            );
        }
        _ => {}
    }
}
