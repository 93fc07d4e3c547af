use serde::Deserialize;
use serde_json::Value;

use crate::pipeline::tasks::parse_options;
use crate::pipeline::{Phase, TaskError, TaskHandler};
use crate::telemetry::AnalyzableContent;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct LogExchangeOptions {
    message: Option<String>,
    /// Only these flattened keys; all keys when empty.
    keys: Vec<String>,
}

/// Emits the flattened telemetry of the exchange as a tracing event.
pub struct LogExchange;

impl TaskHandler for LogExchange {
    fn name(&self) -> &'static str {
        "log_exchange"
    }

    fn validate(&self, options: &Value) -> Result<(), TaskError> {
        parse_options::<LogExchangeOptions>(options).map(|_| ())
    }

    fn execute(
        &self,
        content: &mut AnalyzableContent,
        options: &Value,
        phase: Phase,
    ) -> Result<(), TaskError> {
        let options: LogExchangeOptions = parse_options(options)?;
        let mut data = content.component_data_to_log();
        if !options.keys.is_empty() {
            data.retain(|key, _| options.keys.iter().any(|k| k == key));
        }
        let fields = serde_json::to_string(&data).map_err(|e| TaskError::Failed(e.to_string()))?;
        tracing::info!(
            target: "exchange",
            exchange_id = %content.id(),
            %phase,
            fields = %fields,
            "{}",
            options.message.as_deref().unwrap_or("Exchange snapshot")
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_empty_and_filtered_options() {
        let mut content = AnalyzableContent::new();
        LogExchange
            .execute(&mut content, &json!({}), Phase::EmittedResponse)
            .unwrap();
        LogExchange
            .execute(
                &mut content,
                &json!({"message": "done", "keys": ["exchange_id"]}),
                Phase::EmittedResponse,
            )
            .unwrap();
        assert!(LogExchange.validate(&json!({"keys": "nope"})).is_err());
    }
}
