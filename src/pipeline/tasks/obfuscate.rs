//! JSON body obfuscation.
//!
//! # Design Decisions
//! - Targets are JSONPath expressions resolved to JSON pointers first, then
//!   rewritten in place
//! - For each target, strategies are tried in configured order; the first
//!   `Applied` wins, `NotApplicable` moves on, `Fatal` aborts the task
//! - A target no strategy applies to is left untouched

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use serde_json_path::JsonPath;

use crate::condition::predicates::Side;
use crate::pipeline::tasks::{body_mut, parse_options};
use crate::pipeline::{Phase, TaskError, TaskHandler};
use crate::telemetry::AnalyzableContent;

/// Result of one strategy on one value.
#[derive(Debug, Clone, PartialEq)]
pub enum ObfuscationOutcome {
    Applied(Value),
    NotApplicable,
    Fatal(String),
}

pub trait ObfuscationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, value: &Value) -> ObfuscationOutcome;
}

/// Replaces every character of a string with `*`.
pub struct MaskString;

impl ObfuscationStrategy for MaskString {
    fn name(&self) -> &'static str {
        "mask_string"
    }

    fn apply(&self, value: &Value) -> ObfuscationOutcome {
        match value {
            Value::String(s) => ObfuscationOutcome::Applied(Value::String("*".repeat(s.chars().count()))),
            _ => ObfuscationOutcome::NotApplicable,
        }
    }
}

/// Replaces a number with zero.
pub struct MaskNumber;

impl ObfuscationStrategy for MaskNumber {
    fn name(&self) -> &'static str {
        "mask_number"
    }

    fn apply(&self, value: &Value) -> ObfuscationOutcome {
        match value {
            Value::Number(_) => ObfuscationOutcome::Applied(Value::from(0)),
            _ => ObfuscationOutcome::NotApplicable,
        }
    }
}

/// Replaces any value with `null`.
pub struct Nullify;

impl ObfuscationStrategy for Nullify {
    fn name(&self) -> &'static str {
        "nullify"
    }

    fn apply(&self, _value: &Value) -> ObfuscationOutcome {
        ObfuscationOutcome::Applied(Value::Null)
    }
}

/// Refuses objects and arrays: obfuscating a subtree wholesale is a
/// configuration error.
pub struct RejectContainers;

impl ObfuscationStrategy for RejectContainers {
    fn name(&self) -> &'static str {
        "reject_containers"
    }

    fn apply(&self, value: &Value) -> ObfuscationOutcome {
        match value {
            Value::Object(_) | Value::Array(_) => {
                ObfuscationOutcome::Fatal("target is an object or array".into())
            }
            _ => ObfuscationOutcome::NotApplicable,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ObfuscateOptions {
    #[serde(default = "response_side")]
    side: Side,
    paths: Vec<String>,
    #[serde(default = "default_strategies")]
    strategies: Vec<String>,
}

fn response_side() -> Side {
    Side::Response
}

fn default_strategies() -> Vec<String> {
    vec!["mask_string".into(), "mask_number".into()]
}

/// Obfuscates selected values of a JSON body.
pub struct ObfuscateJson {
    strategies: HashMap<&'static str, Arc<dyn ObfuscationStrategy>>,
}

impl Default for ObfuscateJson {
    fn default() -> Self {
        let mut handler = Self {
            strategies: HashMap::new(),
        };
        handler.register(Arc::new(MaskString));
        handler.register(Arc::new(MaskNumber));
        handler.register(Arc::new(Nullify));
        handler.register(Arc::new(RejectContainers));
        handler
    }
}

impl ObfuscateJson {
    pub fn register(&mut self, strategy: Arc<dyn ObfuscationStrategy>) {
        self.strategies.insert(strategy.name(), strategy);
    }

    fn resolve(&self, options: &ObfuscateOptions) -> Result<(Vec<JsonPath>, Vec<Arc<dyn ObfuscationStrategy>>), TaskError> {
        let paths = options
            .paths
            .iter()
            .map(|p| JsonPath::parse(p).map_err(TaskError::invalid_options))
            .collect::<Result<Vec<_>, _>>()?;
        let strategies = options
            .strategies
            .iter()
            .map(|name| {
                self.strategies
                    .get(name.as_str())
                    .cloned()
                    .ok_or_else(|| TaskError::InvalidOptions(format!("unknown strategy `{}`", name)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((paths, strategies))
    }
}

impl TaskHandler for ObfuscateJson {
    fn name(&self) -> &'static str {
        "obfuscate_json"
    }

    fn validate(&self, options: &Value) -> Result<(), TaskError> {
        let options: ObfuscateOptions = parse_options(options)?;
        self.resolve(&options).map(|_| ())
    }

    fn execute(
        &self,
        content: &mut AnalyzableContent,
        options: &Value,
        _phase: Phase,
    ) -> Result<(), TaskError> {
        let options: ObfuscateOptions = parse_options(options)?;
        let (paths, strategies) = self.resolve(&options)?;

        let body = body_mut(content, options.side)?;
        if !body.is_analyzable() {
            return Err(TaskError::BodyNotAnalyzable);
        }
        let mut document: Value = serde_json::from_slice(body.as_slice())
            .map_err(|e| TaskError::Failed(format!("body is not JSON: {}", e)))?;

        let pointers: Vec<String> = paths
            .iter()
            .flat_map(|path| {
                path.query_located(&document)
                    .locations()
                    .map(|location| location.to_json_pointer())
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut rewritten = 0usize;
        for pointer in &pointers {
            let Some(target) = document.pointer_mut(pointer) else {
                continue;
            };
            for strategy in &strategies {
                match strategy.apply(target) {
                    ObfuscationOutcome::Applied(value) => {
                        *target = value;
                        rewritten += 1;
                        break;
                    }
                    ObfuscationOutcome::NotApplicable => continue,
                    ObfuscationOutcome::Fatal(reason) => {
                        return Err(TaskError::Failed(format!(
                            "strategy `{}` failed at {}: {}",
                            strategy.name(),
                            pointer,
                            reason
                        )));
                    }
                }
            }
        }

        if rewritten > 0 {
            let encoded = serde_json::to_vec(&document)
                .map_err(|e| TaskError::Failed(e.to_string()))?;
            body.set_body(encoded);
        }
        tracing::trace!(targets = pointers.len(), rewritten, "JSON body obfuscated");
        Ok(())
    }
}
