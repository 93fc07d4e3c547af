//! Tasks that steer the forwarding logic through the execution-info bag.

use serde::Deserialize;
use serde_json::Value;

use crate::pipeline::tasks::parse_options;
use crate::pipeline::{Phase, TaskError, TaskHandler};
use crate::telemetry::{AnalyzableContent, FallbackResponse};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct StopRequestOptions {
    fallback: Option<FallbackResponse>,
}

/// Prevents the destination call, optionally with a fallback response.
pub struct StopRequest;

impl TaskHandler for StopRequest {
    fn name(&self) -> &'static str {
        "stop_request"
    }

    fn validate(&self, options: &Value) -> Result<(), TaskError> {
        parse_options::<StopRequestOptions>(options).map(|_| ())
    }

    fn execute(
        &self,
        content: &mut AnalyzableContent,
        options: &Value,
        _phase: Phase,
    ) -> Result<(), TaskError> {
        let options: StopRequestOptions = parse_options(options)?;
        let execution = content.execution_mut();
        execution.stop_request();
        if let Some(fallback) = options.fallback {
            execution.set_fallback(fallback);
        }
        Ok(())
    }
}

/// Registers a fallback used if the destination turns out unreachable.
pub struct FallbackResponseTask;

impl TaskHandler for FallbackResponseTask {
    fn name(&self) -> &'static str {
        "fallback_response"
    }

    fn validate(&self, options: &Value) -> Result<(), TaskError> {
        parse_options::<FallbackResponse>(options).map(|_| ())
    }

    fn execute(
        &self,
        content: &mut AnalyzableContent,
        options: &Value,
        _phase: Phase,
    ) -> Result<(), TaskError> {
        let fallback: FallbackResponse = parse_options(options)?;
        content.execution_mut().set_fallback(fallback);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StatusValue {
    Number(u16),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct OverrideStatusOptions {
    status: StatusValue,
}

/// Overrides the status code emitted to the client.
pub struct OverrideStatus;

impl TaskHandler for OverrideStatus {
    fn name(&self) -> &'static str {
        "override_status"
    }

    fn validate(&self, options: &Value) -> Result<(), TaskError> {
        parse_options::<OverrideStatusOptions>(options).map(|_| ())
    }

    fn execute(
        &self,
        content: &mut AnalyzableContent,
        options: &Value,
        _phase: Phase,
    ) -> Result<(), TaskError> {
        let options: OverrideStatusOptions = parse_options(options)?;
        let raw = match options.status {
            StatusValue::Number(code) => code.to_string(),
            StatusValue::Text(text) => text,
        };
        content.execution_mut().set_status_code(raw);
        Ok(())
    }
}
