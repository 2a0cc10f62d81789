//! # Structured Logging Module
//!
//! Environment-aware structured logging for the orchestration services. The subscriber
//! writes to stdout, in JSON when `CONDUCTOR_LOG_FORMAT=json`, and honors `RUST_LOG`.

use chrono::Utc;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let json = std::env::var("CONDUCTOR_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // Don't panic if one already exists
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            json = json,
            "STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("CONDUCTOR_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for task run operations
pub fn log_task_run_operation(
    operation: &str,
    execution_id: &str,
    task_run_id: &str,
    task_id: &str,
    value: Option<&str>,
    state: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        execution_id = %execution_id,
        task_run_id = %task_run_id,
        task_id = %task_id,
        value = value,
        state = %state,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "TASK_RUN_OPERATION"
    );
}

/// Log structured data for service state changes
pub fn log_service_operation(
    operation: &str,
    service_id: &str,
    service_type: &str,
    state: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        service_id = %service_id,
        service_type = %service_type,
        state = %state,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "SERVICE_OPERATION"
    );
}
