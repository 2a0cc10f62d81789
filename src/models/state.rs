//! # Execution State
//!
//! [`State`] is an immutable value: the current [`StateType`] plus the ordered history of
//! every type it went through. Transitions append to the history and return a new value;
//! no transition graph is enforced here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateType {
    Created,
    Running,
    Paused,
    Restarted,
    Killing,
    Success,
    Warning,
    Failed,
    Killed,
    Cancelled,
    Queued,
    Retrying,
    Retried,
}

impl StateType {
    pub const ALL: [StateType; 13] = [
        Self::Created,
        Self::Running,
        Self::Paused,
        Self::Restarted,
        Self::Killing,
        Self::Success,
        Self::Warning,
        Self::Failed,
        Self::Killed,
        Self::Cancelled,
        Self::Queued,
        Self::Retrying,
        Self::Retried,
    ];

    /// Check if this is a terminal state
    pub fn is_terminated(&self) -> bool {
        matches!(
            self,
            Self::Failed
                | Self::Warning
                | Self::Success
                | Self::Killed
                | Self::Cancelled
                | Self::Retried
        )
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created | Self::Restarted)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::Killing)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    pub fn is_retrying(&self) -> bool {
        matches!(self, Self::Retrying | Self::Retried)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Restarted => "RESTARTED",
            Self::Killing => "KILLING",
            Self::Success => "SUCCESS",
            Self::Warning => "WARNING",
            Self::Failed => "FAILED",
            Self::Killed => "KILLED",
            Self::Cancelled => "CANCELLED",
            Self::Queued => "QUEUED",
            Self::Retrying => "RETRYING",
            Self::Retried => "RETRIED",
        }
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|state| state.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Invalid state type: {s}"))
    }
}

/// One entry of a state history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    pub state: StateType,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    current: StateType,
    histories: Vec<History>,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    /// A fresh CREATED state
    pub fn new() -> Self {
        Self::of_type(StateType::Created)
    }

    pub fn of_type(state: StateType) -> Self {
        Self::of_type_at(state, Utc::now())
    }

    pub fn of_type_at(state: StateType, date: DateTime<Utc>) -> Self {
        Self {
            current: state,
            histories: vec![History { state, date }],
        }
    }

    /// Rebuilds a state from persisted parts
    pub fn of(current: StateType, histories: Vec<History>) -> Self {
        Self { current, histories }
    }

    pub fn current(&self) -> StateType {
        self.current
    }

    pub fn histories(&self) -> &[History] {
        &self.histories
    }

    /// Returns a new state with `state` appended to the history.
    ///
    /// Appending the same type again is accepted and recorded.
    pub fn with_state(&self, state: StateType) -> Self {
        self.with_state_at(state, Utc::now())
    }

    pub fn with_state_at(&self, state: StateType, date: DateTime<Utc>) -> Self {
        let mut histories = self.histories.clone();
        histories.push(History { state, date });
        Self {
            current: state,
            histories,
        }
    }

    /// Back to CREATED, keeping only the first history entry
    pub fn reset(&self) -> Self {
        Self {
            current: StateType::Created,
            histories: self.histories.first().copied().into_iter().collect(),
        }
    }

    pub fn start_date(&self) -> Option<DateTime<Utc>> {
        self.histories.first().map(|history| history.date)
    }

    /// Date of the last transition once the state is terminated or paused
    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        if !self.is_terminated() && !self.is_paused() {
            return None;
        }
        self.histories.last().map(|history| history.date)
    }

    pub fn min_date(&self) -> DateTime<Utc> {
        self.start_date().unwrap_or_else(Utc::now)
    }

    pub fn max_date(&self) -> DateTime<Utc> {
        self.histories
            .last()
            .map(|history| history.date)
            .unwrap_or_else(Utc::now)
    }

    /// Elapsed time between the first and the last history entry, or now when there is
    /// a single entry.
    pub fn duration(&self) -> chrono::Duration {
        self.duration_at(Utc::now())
    }

    pub fn duration_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        let start = self.min_date();
        let end = if self.histories.len() > 1 {
            self.max_date()
        } else {
            now
        };
        end - start
    }

    /// Duration rendered as `HH:mm:ss.SSS`
    pub fn human_duration(&self) -> String {
        format_hms(self.duration())
    }

    pub fn is_terminated(&self) -> bool {
        self.current.is_terminated()
    }

    pub fn is_running(&self) -> bool {
        self.current.is_running()
    }

    pub fn is_created(&self) -> bool {
        self.current.is_created()
    }

    pub fn is_failed(&self) -> bool {
        self.current.is_failed()
    }

    pub fn is_paused(&self) -> bool {
        self.current.is_paused()
    }

    pub fn is_retrying(&self) -> bool {
        self.current.is_retrying()
    }

    pub fn is_success(&self) -> bool {
        self.current.is_success()
    }

    pub fn is_restartable(&self) -> bool {
        self.current.is_failed() || self.current.is_paused()
    }

    pub fn is_resumable(&self) -> bool {
        self.current.is_paused() || self.current.is_retrying()
    }

    /// Every type that counts as created or running
    pub fn running_types() -> Vec<StateType> {
        StateType::ALL
            .iter()
            .copied()
            .filter(|state| state.is_running() || state.is_created())
            .collect()
    }
}

pub(crate) fn format_hms(duration: chrono::Duration) -> String {
    let millis = duration.num_milliseconds().max(0);
    let hours = millis / 3_600_000;
    let minutes = (millis / 60_000) % 60;
    let seconds = (millis / 1_000) % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{:03}", millis % 1_000)
}
