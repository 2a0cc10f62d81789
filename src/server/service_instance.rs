//! # Service Instances
//!
//! The shared record of a service, as seen by every server. Each state change bumps
//! `seq_id`, the fencing token used when writing the record back to the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use super::service::{Service, ServiceState, ServiceType};
use crate::config::ServerConfig;
use crate::utils::{id_utils, to_chrono};

pub const SERVICE_STATE_UPDATED_EVENT: &str = "service.state.updated";

/// Deployment mode of the server hosting a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerType {
    /// Every service in one process
    Standalone,
    Executor,
    Indexer,
    Scheduler,
    Webserver,
    Worker,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInstance {
    pub id: String,
    pub server_type: ServerType,
    pub version: String,
    #[serde(default)]
    pub hostname: Option<String>,
}

impl ServerInstance {
    pub fn new(server_type: ServerType) -> Self {
        Self {
            id: id_utils::create(),
            server_type,
            version: env!("CARGO_PKG_VERSION").to_string(),
            hostname: std::env::var("HOSTNAME").ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimestampedEvent {
    pub ts: DateTime<Utc>,
    pub value: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub state: ServiceState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub state: ServiceState,
    pub server: ServerInstance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub events: Vec<TimestampedEvent>,
    pub config: ServerConfig,
    #[serde(default)]
    pub props: BTreeMap<String, Value>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    pub seq_id: u64,
}

impl ServiceInstance {
    /// First record of a local service
    pub fn create(
        service: &dyn Service,
        server: ServerInstance,
        config: ServerConfig,
        props: BTreeMap<String, Value>,
        now: DateTime<Utc>,
    ) -> Self {
        let state = service.state();
        Self {
            id: service.id().to_string(),
            service_type: service.service_type(),
            state,
            server,
            created_at: now,
            updated_at: now,
            events: vec![TimestampedEvent {
                ts: now,
                value: "Service connected.".to_string(),
                event_type: SERVICE_STATE_UPDATED_EVENT.to_string(),
                state,
            }],
            config,
            props,
            metrics: service.metrics(),
            seq_id: 0,
        }
    }

    /// Copy in `new_state` with the next `seq_id`. An event is recorded when the state
    /// changes or a reason is given.
    pub fn state(&self, new_state: ServiceState, now: DateTime<Utc>, reason: Option<&str>) -> Self {
        let mut events = self.events.clone();
        if new_state != self.state || reason.is_some() {
            let value = reason.map(str::to_string).unwrap_or_else(|| {
                format!("Service transitioned to the '{new_state}' state.")
            });
            events.push(TimestampedEvent {
                ts: now,
                value,
                event_type: SERVICE_STATE_UPDATED_EVENT.to_string(),
                state: new_state,
            });
        }

        Self {
            state: new_state,
            updated_at: now,
            events,
            seq_id: self.seq_id + 1,
            ..self.clone()
        }
    }

    pub fn with_server(&self, server: ServerInstance) -> Self {
        Self {
            server,
            ..self.clone()
        }
    }

    pub fn with_metrics(&self, metrics: BTreeMap<String, f64>) -> Self {
        Self {
            metrics,
            ..self.clone()
        }
    }

    pub fn is_liveness_enabled(&self) -> bool {
        self.config.liveness.enabled
    }

    /// No update for longer than the liveness timeout
    pub fn is_session_timeout_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.updated_at
            .checked_add_signed(to_chrono(self.config.liveness.timeout()))
            .is_some_and(|deadline| deadline < now)
    }

    /// Older than its own liveness initial delay, so its heartbeats can be checked
    pub fn is_initial_delay_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.created_at
            .checked_add_signed(to_chrono(self.config.liveness.initial_delay()))
            .is_some_and(|deadline| deadline < now)
    }

    pub fn is_termination_grace_period_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.updated_at
            .checked_add_signed(to_chrono(self.config.termination_grace_period()))
            .is_some_and(|deadline| deadline < now)
    }

    /// Instances grouped by the value of property `key`; instances without it are skipped
    pub fn group_by_property<'a>(
        instances: &'a [ServiceInstance],
        key: &str,
    ) -> HashMap<String, Vec<&'a ServiceInstance>> {
        let mut groups: HashMap<String, Vec<&ServiceInstance>> = HashMap::new();
        for instance in instances {
            let Some(value) = instance.props.get(key) else {
                continue;
            };
            let group = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            groups.entry(group).or_default().push(instance);
        }
        groups
    }
}
