//! Built-in task handlers.

pub mod body;
pub mod flow;
pub mod headers;
pub mod log;
pub mod obfuscate;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::condition::predicates::Side;
use crate::pipeline::{TaskError, TaskHandler};
use crate::telemetry::{AnalyzableContent, Body, Header};

/// Every built-in handler, ready for registration.
pub fn builtin_handlers() -> Vec<Arc<dyn TaskHandler>> {
    vec![
        Arc::new(headers::SetHeader),
        Arc::new(headers::RemoveHeader),
        Arc::new(flow::StopRequest),
        Arc::new(flow::FallbackResponseTask),
        Arc::new(flow::OverrideStatus),
        Arc::new(body::ReplaceBody),
        Arc::new(obfuscate::ObfuscateJson::default()),
        Arc::new(log::LogExchange),
    ]
}

pub(crate) fn parse_options<T: DeserializeOwned>(options: &Value) -> Result<T, TaskError> {
    T::deserialize(options).map_err(TaskError::invalid_options)
}

pub(crate) fn header_mut(
    content: &mut AnalyzableContent,
    side: Side,
) -> Result<&mut Header, TaskError> {
    match side {
        Side::Request => content
            .request_mut()
            .map(|r| &mut r.header)
            .ok_or(TaskError::MissingComponent("request")),
        Side::Response => content
            .response_mut()
            .map(|r| &mut r.header)
            .ok_or(TaskError::MissingComponent("response")),
    }
}

pub(crate) fn body_mut(content: &mut AnalyzableContent, side: Side) -> Result<&mut Body, TaskError> {
    match side {
        Side::Request => content
            .request_mut()
            .map(|r| &mut r.body)
            .ok_or(TaskError::MissingComponent("request")),
        Side::Response => content
            .response_mut()
            .map(|r| &mut r.body)
            .ok_or(TaskError::MissingComponent("response")),
    }
}
