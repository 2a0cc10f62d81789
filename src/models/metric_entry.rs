//! Metrics recorded by a task attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Timer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    pub kind: MetricKind,
    pub name: String,
    /// Counter increment, or timer duration in milliseconds
    pub value: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl MetricEntry {
    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        Self {
            kind: MetricKind::Counter,
            name: name.into(),
            value,
            tags: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn timer(name: impl Into<String>, duration: std::time::Duration) -> Self {
        Self {
            kind: MetricKind::Timer,
            name: name.into(),
            value: duration.as_secs_f64() * 1_000.0,
            tags: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}
