//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (web services reference existing users)
//! - Validate value ranges (timeouts > 0, addresses parse, sizes non-zero)
//! - Detect duplicate user and web service ids
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system
//! - Unknown handlers and predicate classes are not errors here; they are
//!   skipped (handlers) or never match (predicates) at compile time

use std::collections::HashSet;
use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;
use url::Url;

use crate::config::schema::GatewayConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address `{value}`")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("invalid log level `{0}`")]
    InvalidLogLevel(String),

    #[error("admin.api_key must be changed when the admin API is enabled")]
    DefaultAdminKey,

    #[error("duplicate user id `{0}`")]
    DuplicateUser(String),

    #[error("duplicate web service id `{0}`")]
    DuplicateWebService(String),

    #[error("empty {0} id")]
    EmptyId(&'static str),

    #[error("web service `{service}` references unknown user `{user}`")]
    UnknownUser { service: String, user: String },

    #[error("web service `{service}`: destination `{destination}` must be an absolute http(s) URL")]
    InvalidDestination { service: String, destination: String },
}

pub const DEFAULT_ADMIN_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key == DEFAULT_ADMIN_KEY || config.admin.api_key.is_empty() {
            errors.push(ValidationError::DefaultAdminKey);
        }
    }

    let positive = [
        ("listener.max_connections", config.listener.max_connections as u64),
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("timeouts.idle_secs", config.timeouts.idle_secs),
        ("body.read_chunk_size", config.body.read_chunk_size as u64),
        ("body.max_head_bytes", config.body.max_head_bytes as u64),
        ("conditions.match_time_budget_ms", config.conditions.match_time_budget_ms),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }

    if EnvFilter::try_new(&config.observability.log_level).is_err() {
        errors.push(ValidationError::InvalidLogLevel(config.observability.log_level.clone()));
    }

    let mut users = HashSet::new();
    for user in &config.users {
        if user.id.is_empty() {
            errors.push(ValidationError::EmptyId("user"));
        } else if !users.insert(user.id.as_str()) {
            errors.push(ValidationError::DuplicateUser(user.id.clone()));
        }
    }

    let mut services = HashSet::new();
    for service in &config.web_services {
        if service.id.is_empty() {
            errors.push(ValidationError::EmptyId("web service"));
        } else if !services.insert(service.id.as_str()) {
            errors.push(ValidationError::DuplicateWebService(service.id.clone()));
        }
        if !users.contains(service.user.as_str()) {
            errors.push(ValidationError::UnknownUser {
                service: service.id.clone(),
                user: service.user.clone(),
            });
        }
        let valid = Url::parse(&service.destination)
            .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
            .unwrap_or(false);
        if !valid {
            errors.push(ValidationError::InvalidDestination {
                service: service.id.clone(),
                destination: service.destination.clone(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{UserConfig, WebServiceConfig};

    fn service(id: &str, user: &str, destination: &str) -> WebServiceConfig {
        WebServiceConfig {
            id: id.into(),
            user: user.into(),
            destination: destination.into(),
            events: Default::default(),
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&GatewayConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = "nowhere".into();
        config.body.read_chunk_size = 0;
        config.admin.enabled = true;
        config.users = vec![
            UserConfig { id: "alice".into(), name: None },
            UserConfig { id: "alice".into(), name: None },
        ];
        config.web_services = vec![
            service("a", "alice", "https://api.example.com"),
            service("a", "bob", "ftp://files.example.com"),
        ];

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: "nowhere".into()
        }));
        assert!(errors.contains(&ValidationError::Zero("body.read_chunk_size")));
        assert!(errors.contains(&ValidationError::DefaultAdminKey));
        assert!(errors.contains(&ValidationError::DuplicateUser("alice".into())));
        assert!(errors.contains(&ValidationError::DuplicateWebService("a".into())));
        assert!(errors.contains(&ValidationError::UnknownUser {
            service: "a".into(),
            user: "bob".into()
        }));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidDestination { .. })));
        assert_eq!(errors.len(), 7);
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = GatewayConfig::default();
        config.observability.metrics_address = "bad".into();
        config.observability.metrics_enabled = false;
        assert!(validate_config(&config).is_ok());
        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
