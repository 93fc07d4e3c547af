//! Handler and predicate registry.
//!
//! # Responsibilities
//! - Map handler names to shared `TaskHandler` instances
//! - Map predicate class names to constructors
//! - Compile configuration into `PhaseRunner`s, applying migrations
//!
//! # Design Decisions
//! - Everything is resolved once at load time; exchanges never look up names
//! - An unknown handler or invalid task options drop that task with a warning
//! - An unknown class or invalid condition options compile to a predicate
//!   that always fails to evaluate, so the branch is never satisfied

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::condition::endpoint::{EndpointOptions, EndpointPredicate};
use crate::condition::predicates::{
    HeaderPredicate, InitiatorIpPredicate, JsonBodyPredicate, QueryParameterPredicate,
    RandomPredicate, RoundTripPredicate, StatusCodePredicate,
};
use crate::condition::{ConditionNode, ConditionSettings, EvaluationError, Predicate};
use crate::config::schema::{ConditionConfig, TaskConfig};
use crate::pipeline::migrate::Migrations;
use crate::pipeline::tasks::builtin_handlers;
use crate::pipeline::{CompiledTask, Phase, PhaseRunner, TaskHandler};
use crate::telemetry::AnalyzableContent;

pub type PredicateFactory =
    fn(Value, &ConditionSettings) -> Result<Box<dyn Predicate>, EvaluationError>;

/// Stand-in for a condition that could not be built.
#[derive(Debug)]
struct Misconfigured {
    reason: String,
}

impl Predicate for Misconfigured {
    fn class(&self) -> &'static str {
        "misconfigured"
    }

    fn self_evaluate(&self, _content: &AnalyzableContent) -> Result<bool, EvaluationError> {
        Err(EvaluationError::Misconfigured(self.reason.clone()))
    }
}

fn options<T: DeserializeOwned>(options: Value) -> Result<T, EvaluationError> {
    serde_json::from_value(options).map_err(|e| EvaluationError::InvalidOption {
        option: "options",
        reason: e.to_string(),
    })
}

fn boxed<P: Predicate + 'static>(p: P) -> Box<dyn Predicate> {
    Box::new(p)
}

pub struct Registry {
    handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
    predicates: HashMap<&'static str, PredicateFactory>,
    migrations: Migrations,
    settings: ConditionSettings,
}

impl Registry {
    /// A registry with nothing registered.
    pub fn empty(settings: ConditionSettings) -> Self {
        Self {
            handlers: HashMap::new(),
            predicates: HashMap::new(),
            migrations: Migrations::new(),
            settings,
        }
    }

    /// A registry holding every built-in handler, predicate and migration.
    pub fn with_builtins(settings: ConditionSettings) -> Self {
        let mut registry = Self::empty(settings);
        registry.migrations = Migrations::builtin();
        for handler in builtin_handlers() {
            registry.register_handler(handler);
        }

        registry.register_predicate("endpoint", |o, s| {
            EndpointPredicate::new(options::<EndpointOptions>(o)?, s.match_time_budget).map(boxed)
        });
        registry.register_predicate("initiator_ip", |o, _| {
            InitiatorIpPredicate::new(options(o)?).map(boxed)
        });
        registry.register_predicate("header", |o, _| HeaderPredicate::new(options(o)?).map(boxed));
        registry.register_predicate("query_parameter", |o, _| {
            QueryParameterPredicate::new(options(o)?).map(boxed)
        });
        registry.register_predicate("json_body", |o, s| {
            JsonBodyPredicate::new(options(o)?, s.json_body_limit).map(boxed)
        });
        registry.register_predicate("random", |o, _| RandomPredicate::new(options(o)?).map(boxed));
        registry.register_predicate("status_code", |o, _| {
            StatusCodePredicate::new(options(o)?).map(boxed)
        });
        registry.register_predicate("destination_round_trip", |o, _| {
            RoundTripPredicate::new(options(o)?).map(boxed)
        });
        registry
    }

    pub fn register_handler(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(handler.name(), handler);
    }

    pub fn register_predicate(&mut self, class: &'static str, factory: PredicateFactory) {
        self.predicates.insert(class, factory);
    }

    pub fn migrations_mut(&mut self) -> &mut Migrations {
        &mut self.migrations
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn predicate_classes(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.predicates.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Build a predicate, or explain why it cannot be built.
    pub fn build_predicate(&self, config: &ConditionConfig) -> Result<Box<dyn Predicate>, String> {
        let factory = self
            .predicates
            .get(config.class.as_str())
            .ok_or_else(|| format!("unknown condition class `{}`", config.class))?;
        let options = self
            .migrations
            .upgrade(&config.class, config.version, config.options.clone())
            .map_err(|e| e.to_string())?;
        factory(options, &self.settings).map_err(|e| e.to_string())
    }

    /// Compile a condition tree. Never fails: broken nodes become
    /// misconfigured predicates.
    pub fn compile_condition(&self, config: &ConditionConfig) -> ConditionNode {
        let predicate = self.build_predicate(config).unwrap_or_else(|reason| {
            tracing::warn!(class = %config.class, %reason, "Condition misconfigured");
            Box::new(Misconfigured { reason })
        });
        ConditionNode::new(predicate)
            .with_status(config.status)
            .inverted(config.invert_result)
            .with_children(
                config
                    .sub_conditions
                    .iter()
                    .map(|child| self.compile_condition(child))
                    .collect(),
            )
    }

    /// Resolve and validate one task, with its options migrated.
    pub fn compile_task(&self, config: &TaskConfig) -> Result<CompiledTask, String> {
        let handler = self
            .handler(&config.handler)
            .ok_or_else(|| format!("unknown task handler `{}`", config.handler))?;
        let options = self
            .migrations
            .upgrade(&config.handler, config.version, config.options.clone())
            .map_err(|e| e.to_string())?;
        handler.validate(&options).map_err(|e| e.to_string())?;
        let conditions = config
            .conditions
            .iter()
            .map(|c| self.compile_condition(c))
            .collect();
        Ok(CompiledTask::new(handler, options, conditions))
    }

    /// Compile all phases of a web service. Tasks that cannot be compiled
    /// are skipped.
    pub fn compile_events(&self, events: &BTreeMap<Phase, Vec<TaskConfig>>) -> PhaseRunner {
        let phases = events
            .iter()
            .map(|(phase, tasks)| {
                let compiled = tasks
                    .iter()
                    .filter_map(|task| match self.compile_task(task) {
                        Ok(compiled) => Some(compiled),
                        Err(reason) => {
                            tracing::warn!(
                                handler = %task.handler,
                                %phase,
                                %reason,
                                "Skipping task"
                            );
                            None
                        }
                    })
                    .collect();
                (*phase, compiled)
            })
            .collect();
        PhaseRunner::new(phases)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins(ConditionSettings::default())
    }
}
