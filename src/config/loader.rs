//! Configuration Loader
//!
//! Layers built-in defaults, an optional TOML file and `CONDUCTOR__*` environment variables
//! (`CONDUCTOR__SERVER__LIVENESS__TIMEOUT_MS=60000`) into a validated [`ConductorConfig`].

use super::ConductorConfig;
use crate::error::{ConductorError, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ENV_PREFIX: &str = "CONDUCTOR";
const ENV_SEPARATOR: &str = "__";

/// Loaded configuration together with where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: ConductorConfig,
    environment: String,
    config_file: PathBuf,
}

impl ConfigManager {
    /// Load configuration from `config/conductor.toml` with environment auto-detection
    pub fn load() -> Result<Arc<ConfigManager>> {
        Self::load_from(Self::default_config_file())
    }

    /// Load configuration from an explicit file; a missing file falls back to defaults
    pub fn load_from(path: impl AsRef<Path>) -> Result<Arc<ConfigManager>> {
        let config_file = path.as_ref().to_path_buf();
        let environment = Self::detect_environment();

        debug!(
            environment = %environment,
            config_file = %config_file.display(),
            "Loading configuration"
        );

        let config: ConductorConfig = config::Config::builder()
            .add_source(config::File::from(config_file.as_path()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;

        info!(
            environment = %environment,
            heartbeat_interval_ms = config.server.liveness.heartbeat_interval_ms,
            liveness_timeout_ms = config.server.liveness.timeout_ms,
            worker_threads = config.worker.threads,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            config_file,
        }))
    }

    /// Wrap an in-code configuration, validating it the same way a loaded one is
    pub fn from_config(config: ConductorConfig) -> Result<Arc<ConfigManager>> {
        config.validate().map_err(ConductorError::from)?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_file: Self::default_config_file(),
        }))
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    fn detect_environment() -> String {
        env::var("CONDUCTOR_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn default_config_file() -> PathBuf {
        PathBuf::from("config").join("conductor.toml")
    }
}
