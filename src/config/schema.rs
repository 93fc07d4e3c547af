//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::ConditionStatus;
use crate::pipeline::Phase;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, backpressure).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Body capture and streaming settings.
    pub body: BodyConfig,

    /// Condition engine settings.
    pub conditions: ConditionsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,

    /// Known gateway users.
    pub users: Vec<UserConfig>,

    /// Web services, each owned by a user.
    pub web_services: Vec<WebServiceConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Destination connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed for the destination to return its response head, in seconds.
    pub request_secs: u64,

    /// Idle client connection timeout in seconds.
    pub idle_secs: u64,

    /// Grace period for in-flight exchanges at shutdown, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            idle_secs: 60,
            shutdown_grace_secs: 30,
        }
    }
}

/// Body capture configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BodyConfig {
    /// Bytes retained per body before it stops being analyzable.
    pub capture_limit_bytes: usize,

    /// Upper bound for a single read from a body source.
    pub read_chunk_size: usize,

    /// Maximum size of an inbound request head.
    pub max_head_bytes: usize,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            capture_limit_bytes: 1024 * 1024,
            read_chunk_size: 8192,
            max_head_bytes: 64 * 1024,
        }
    }
}

/// Condition engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConditionsConfig {
    /// Wall-clock budget for one endpoint glob match, in milliseconds.
    pub match_time_budget_ms: u64,

    /// Default size cap for JSON body conditions.
    pub json_body_limit_bytes: usize,
}

impl Default for ConditionsConfig {
    fn default() -> Self {
        Self {
            match_time_budget_ms: 1000,
            json_body_limit_bytes: 1024 * 1024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// A gateway user.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    /// Identifier used in `PP_USER` and subdomain encodings.
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,
}

/// A web service: a destination prefix plus the tasks to run per phase.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebServiceConfig {
    pub id: String,

    /// Owning user id.
    pub user: String,

    /// Destination URL prefix, e.g. `https://api.example.com/v1`.
    pub destination: String,

    /// Ordered task lists keyed by phase.
    #[serde(default)]
    pub events: BTreeMap<Phase, Vec<TaskConfig>>,
}

/// One task of a phase.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskConfig {
    /// Handler name, e.g. `set_header`.
    pub handler: String,

    /// Schema version of `options`; older versions are migrated on load.
    /// Absent means the handler's current version.
    #[serde(default)]
    pub version: Option<u32>,

    #[serde(default = "empty_object")]
    pub options: Value,

    /// Sibling condition roots; empty means always run.
    #[serde(default)]
    pub conditions: Vec<ConditionConfig>,
}

/// One node of a condition tree.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConditionConfig {
    /// Predicate class, e.g. `endpoint`.
    pub class: String,

    #[serde(default)]
    pub version: Option<u32>,

    #[serde(default)]
    pub status: ConditionStatus,

    #[serde(default)]
    pub invert_result: bool,

    #[serde(default = "empty_object")]
    pub options: Value,

    #[serde(default)]
    pub sub_conditions: Vec<ConditionConfig>,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.body.capture_limit_bytes, 1024 * 1024);
        assert_eq!(config.conditions.match_time_budget_ms, 1000);
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
        assert!(config.web_services.is_empty());
    }

    #[test]
    fn web_service_events_parse() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [[users]]
            id = "alice"

            [[web_services]]
            id = "orders"
            user = "alice"
            destination = "https://api.example.com/v1"

            [[web_services.events.destination_request_preparation]]
            handler = "set_header"
            options = { side = "request", name = "X-Trace", value = "1" }

            [[web_services.events.destination_request_preparation.conditions]]
            class = "endpoint"
            options = { patterns = ["orders/*"] }
            invert_result = true

            [[web_services.events.destination_request_preparation.conditions.sub_conditions]]
            class = "random"
            status = "disabled"
            options = { percentage = 50 }
            "#,
        )
        .unwrap();

        let service = &config.web_services[0];
        let tasks = &service.events[&Phase::DestinationRequestPreparation];
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].handler, "set_header");
        assert_eq!(tasks[0].version, None);
        let condition = &tasks[0].conditions[0];
        assert!(condition.invert_result);
        assert_eq!(condition.sub_conditions[0].status, ConditionStatus::Disabled);
    }
}
