//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    let config: GatewayConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Phase;

    const SAMPLE: &str = r#"
[listener]
bind_address = "127.0.0.1:9000"

[[users]]
id = "alice"

[[web_services]]
id = "orders"
user = "alice"
destination = "https://api.example.com/orders"

[[web_services.events.destination_request_preparation]]
handler = "set_header"
options = { side = "request", name = "X-Gateway", value = "passeplat" }

[[web_services.events.destination_request_preparation.conditions]]
class = "endpoint"
options = { patterns = ["/orders/*"] }
"#;

    #[test]
    fn loads_nested_events() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        let tasks = &config.web_services[0].events[&Phase::DestinationRequestPreparation];
        assert_eq!(tasks[0].handler, "set_header");
        assert_eq!(tasks[0].conditions[0].class, "endpoint");
    }

    #[test]
    fn syntax_and_semantic_errors_are_distinct() {
        assert!(matches!(parse_config("listener = ["), Err(ConfigError::Parse(_))));

        let err = parse_config(
            r#"
[[web_services]]
id = "x"
user = "ghost"
destination = "not a url"
"#,
        )
        .unwrap_err();
        match err {
            ConfigError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/gateway.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
