use serde::Deserialize;
use serde_json::Value;

use crate::condition::predicates::Side;
use crate::pipeline::tasks::{header_mut, parse_options};
use crate::pipeline::{Phase, TaskError, TaskHandler};
use crate::telemetry::AnalyzableContent;

#[derive(Debug, Deserialize)]
struct SetHeaderOptions {
    #[serde(default)]
    side: Side,
    name: String,
    value: String,
    /// Add a line (or merge into a list header) instead of replacing.
    #[serde(default)]
    append: bool,
}

/// Sets or appends a header on the request or response.
pub struct SetHeader;

impl TaskHandler for SetHeader {
    fn name(&self) -> &'static str {
        "set_header"
    }

    fn validate(&self, options: &Value) -> Result<(), TaskError> {
        let options: SetHeaderOptions = parse_options(options)?;
        if options.name.trim().is_empty() {
            return Err(TaskError::InvalidOptions("header name is empty".into()));
        }
        Ok(())
    }

    fn execute(
        &self,
        content: &mut AnalyzableContent,
        options: &Value,
        _phase: Phase,
    ) -> Result<(), TaskError> {
        let options: SetHeaderOptions = parse_options(options)?;
        let header = header_mut(content, options.side)?;
        if options.append {
            header.add(&options.name, options.value);
        } else {
            header.set(&options.name, options.value);
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RemoveHeaderOptions {
    #[serde(default)]
    side: Side,
    name: String,
}

/// Drops every line of a header.
pub struct RemoveHeader;

impl TaskHandler for RemoveHeader {
    fn name(&self) -> &'static str {
        "remove_header"
    }

    fn validate(&self, options: &Value) -> Result<(), TaskError> {
        parse_options::<RemoveHeaderOptions>(options).map(|_| ())
    }

    fn execute(
        &self,
        content: &mut AnalyzableContent,
        options: &Value,
        _phase: Phase,
    ) -> Result<(), TaskError> {
        let options: RemoveHeaderOptions = parse_options(options)?;
        let removed = header_mut(content, options.side)?.remove(&options.name);
        tracing::trace!(name = %options.name, removed, "Header removed");
        Ok(())
    }
}
