//! # Conductor Configuration System
//!
//! Configuration for the orchestration services: liveness and heartbeat timings, worker
//! pool sizing and executor limits. Every field has a default so an empty file (or no file
//! at all) yields a runnable configuration.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use conductor_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let heartbeat = manager.config().server.liveness.heartbeat_interval();
//! let threads = manager.config().worker.threads;
//! # Ok(())
//! # }
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::validation::{ConstraintViolations, Violations};

pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/conductor.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ConductorConfig {
    /// Service liveness and termination settings
    pub server: ServerConfig,

    /// Worker pool settings
    pub worker: WorkerConfig,

    /// Executor settings
    pub executor: ExecutorConfig,
}

/// What to do with the tasks of a worker that stopped responding.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerTaskRestartStrategy {
    /// Never resubmit; the tasks are lost with the worker.
    Never,
    /// Resubmit as soon as the worker is detected as disconnected.
    Immediately,
    /// Resubmit once the termination grace period has elapsed.
    #[default]
    AfterTerminationGracePeriod,
}

impl WorkerTaskRestartStrategy {
    pub fn is_restartable(&self) -> bool {
        !matches!(self, WorkerTaskRestartStrategy::Never)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Time a terminating service is given before it is considered gone
    pub termination_grace_period_ms: u64,
    pub worker_task_restart_strategy: WorkerTaskRestartStrategy,
    pub liveness: LivenessConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            termination_grace_period_ms: 300_000,
            worker_task_restart_strategy: WorkerTaskRestartStrategy::default(),
            liveness: LivenessConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn termination_grace_period(&self) -> Duration {
        Duration::from_millis(self.termination_grace_period_ms)
    }
}

/// Heartbeat and peer timeout settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LivenessConfig {
    /// Whether peers may be force transitioned when they stop heartbeating
    pub enabled: bool,
    /// Coordinator scan interval
    pub interval_ms: u64,
    /// Grace period after service creation before its heartbeats are checked
    pub initial_delay_ms: u64,
    /// Session timeout after which a silent service is disconnected
    pub timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5_000,
            initial_delay_ms: 45_000,
            timeout_ms: 45_000,
            heartbeat_interval_ms: 3_000,
        }
    }
}

impl LivenessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum number of task attempts running at the same time
    pub threads: usize,
    /// How long a graceful close waits for in-flight tasks
    pub shutdown_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl WorkerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound on resolution passes run for one incoming execution message
    pub max_process_passes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_process_passes: 100,
        }
    }
}

impl ConductorConfig {
    /// Validate the configuration, reporting every problem at once
    pub fn validate(&self) -> Result<(), ConstraintViolations> {
        let mut violations = Violations::new();
        let liveness = &self.server.liveness;

        violations.check(
            liveness.interval_ms > 0,
            "server.liveness.interval_ms",
            "must be greater than 0",
        );
        violations.check(
            liveness.timeout_ms > 0,
            "server.liveness.timeout_ms",
            "must be greater than 0",
        );
        violations.check(
            liveness.heartbeat_interval_ms > 0,
            "server.liveness.heartbeat_interval_ms",
            "must be greater than 0",
        );
        violations.check(
            liveness.heartbeat_interval_ms < liveness.timeout_ms,
            "server.liveness.heartbeat_interval_ms",
            format!(
                "must be lower than the session timeout ({}ms)",
                liveness.timeout_ms
            ),
        );
        violations.check(
            self.worker.threads > 0,
            "worker.threads",
            "must be greater than 0",
        );
        violations.check(
            self.executor.max_process_passes > 0,
            "executor.max_process_passes",
            "must be greater than 0",
        );

        violations.into_result()
    }
}
