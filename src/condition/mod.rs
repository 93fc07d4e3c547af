//! Condition evaluation engine.
//!
//! # Data Flow
//! ```text
//! ConditionConfig tree (from web-service config)
//!     → pipeline::registry compiles classes into Box<dyn Predicate>
//!     → ConditionNode tree (immutable, shared by all exchanges)
//!     → evaluate(&AnalyzableContent) at each phase
//! ```
//!
//! # Semantics
//! - A node's own result is its predicate, optionally inverted
//! - Own result false: the whole chain rooted here is false, children unseen
//! - Own result true, no children: satisfied
//! - Own result true with children: the first child whose chain is satisfied
//!   wins; a child that fails to evaluate counts as not satisfied
//!
//! # Design Decisions
//! - Evaluation errors never escape `is_satisfied`; they are traced and
//!   counted, then treated as "not satisfied"
//! - Disabled nodes are transparent: their own result is `true`

pub mod endpoint;
pub mod predicates;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::schema::ConditionsConfig;
use crate::observability::metrics;
use crate::telemetry::AnalyzableContent;

/// Why a predicate could not be decided.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    #[error("invalid option `{option}`: {reason}")]
    InvalidOption { option: &'static str, reason: String },

    #[error("component `{0}` is not present")]
    MissingComponent(&'static str),

    #[error("body is not fully captured")]
    BodyNotAnalyzable,

    #[error("body of {size} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge { size: usize, limit: usize },

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("matching exceeded its time budget of {0:?}")]
    TimeBudgetExceeded(Duration),

    #[error("condition is misconfigured: {0}")]
    Misconfigured(String),
}

/// Load-time knobs shared by every predicate built from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionSettings {
    pub match_time_budget: Duration,
    pub json_body_limit: usize,
}

impl Default for ConditionSettings {
    fn default() -> Self {
        Self {
            match_time_budget: endpoint::DEFAULT_TIME_BUDGET,
            json_body_limit: predicates::DEFAULT_JSON_BODY_LIMIT,
        }
    }
}

impl From<&ConditionsConfig> for ConditionSettings {
    fn from(config: &ConditionsConfig) -> Self {
        Self {
            match_time_budget: Duration::from_millis(config.match_time_budget_ms),
            json_body_limit: config.json_body_limit_bytes,
        }
    }
}

/// A typed test against the telemetry tree.
pub trait Predicate: Send + Sync + fmt::Debug {
    /// Class name used in configuration and logs.
    fn class(&self) -> &'static str;

    fn self_evaluate(&self, content: &AnalyzableContent) -> Result<bool, EvaluationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionStatus {
    #[default]
    Normal,
    Disabled,
}

/// One node of a condition tree.
#[derive(Debug)]
pub struct ConditionNode {
    predicate: Box<dyn Predicate>,
    status: ConditionStatus,
    invert_result: bool,
    children: Vec<ConditionNode>,
}

impl ConditionNode {
    pub fn new(predicate: Box<dyn Predicate>) -> Self {
        Self {
            predicate,
            status: ConditionStatus::Normal,
            invert_result: false,
            children: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: ConditionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn inverted(mut self, invert_result: bool) -> Self {
        self.invert_result = invert_result;
        self
    }

    pub fn with_child(mut self, child: ConditionNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: Vec<ConditionNode>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn class(&self) -> &'static str {
        self.predicate.class()
    }

    pub fn children(&self) -> &[ConditionNode] {
        &self.children
    }

    fn own_result(&self, content: &AnalyzableContent) -> Result<bool, EvaluationError> {
        if self.status == ConditionStatus::Disabled {
            return Ok(true);
        }
        let result = self.predicate.self_evaluate(content)?;
        Ok(result != self.invert_result)
    }

    /// Evaluate the chain rooted at this node.
    ///
    /// Errors from this node's own predicate are returned; errors from
    /// children only disqualify that child's branch.
    pub fn evaluate(&self, content: &AnalyzableContent) -> Result<bool, EvaluationError> {
        if !self.own_result(content)? {
            return Ok(false);
        }
        if self.children.is_empty() {
            return Ok(true);
        }
        for child in &self.children {
            match child.evaluate(content) {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => report_error(child.class(), &e),
            }
        }
        Ok(false)
    }

    /// Like `evaluate`, with an error on this node counting as `false`.
    pub fn is_satisfied(&self, content: &AnalyzableContent) -> bool {
        match self.evaluate(content) {
            Ok(result) => result,
            Err(e) => {
                report_error(self.class(), &e);
                false
            }
        }
    }
}

/// Evaluate a list of sibling roots: true if empty, else the first
/// satisfied root wins.
pub fn evaluate_roots(roots: &[ConditionNode], content: &AnalyzableContent) -> bool {
    roots.is_empty() || roots.iter().any(|root| root.is_satisfied(content))
}

fn report_error(class: &'static str, error: &EvaluationError) {
    tracing::debug!(condition = class, error = %error, "Condition could not be evaluated");
    metrics::record_condition_error(class);
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Fixed-result predicate that counts its invocations.
    #[derive(Debug, Clone)]
    pub struct Spy {
        pub result: Result<bool, EvaluationError>,
        pub calls: Arc<AtomicUsize>,
    }

    impl Spy {
        pub fn new(result: bool) -> Self {
            Self {
                result: Ok(result),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn failing() -> Self {
            Self {
                result: Err(EvaluationError::MalformedInput("spy".into())),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn node(&self) -> ConditionNode {
            ConditionNode::new(Box::new(self.clone()))
        }
    }

    impl Predicate for Spy {
        fn class(&self) -> &'static str {
            "spy"
        }

        fn self_evaluate(&self, _content: &AnalyzableContent) -> Result<bool, EvaluationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Spy;
    use super::*;

    fn content() -> AnalyzableContent {
        AnalyzableContent::new()
    }

    #[test]
    fn leaf_returns_own_result() {
        assert!(Spy::new(true).node().is_satisfied(&content()));
        assert!(!Spy::new(false).node().is_satisfied(&content()));
    }

    #[test]
    fn false_root_never_evaluates_children() {
        let child = Spy::new(true);
        let grandchild = Spy::new(true);
        let root = Spy::new(false)
            .node()
            .with_child(child.node().with_child(grandchild.node()));

        assert!(!root.is_satisfied(&content()));
        assert_eq!(child.calls(), 0);
        assert_eq!(grandchild.calls(), 0);
    }

    #[test]
    fn no_matching_sibling_is_false() {
        let root = Spy::new(true)
            .node()
            .with_child(Spy::new(false).node())
            .with_child(Spy::new(false).node())
            .with_child(Spy::new(true).node().with_child(Spy::new(false).node()));
        assert!(!root.is_satisfied(&content()));
    }

    #[test]
    fn first_satisfied_sibling_short_circuits() {
        let first = Spy::new(true);
        let second = Spy::new(true);
        let root = Spy::new(true)
            .node()
            .with_child(Spy::new(false).node())
            .with_child(first.node())
            .with_child(second.node());

        assert!(root.is_satisfied(&content()));
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 0);
    }

    #[test]
    fn failing_child_falls_through_to_next_sibling() {
        let broken = Spy::failing();
        let root = Spy::new(true)
            .node()
            .with_child(broken.node())
            .with_child(Spy::new(true).node());
        assert!(root.is_satisfied(&content()));
        assert_eq!(broken.calls(), 1);
    }

    #[test]
    fn failing_root_is_not_satisfied() {
        let root = Spy::failing().node().with_child(Spy::new(true).node());
        assert!(root.evaluate(&content()).is_err());
        assert!(!root.is_satisfied(&content()));
    }

    #[test]
    fn invert_negates_holding_tree_fixed() {
        for own in [true, false] {
            for child in [true, false] {
                let plain = Spy::new(own).node().inverted(false);
                let inverted = Spy::new(own).node().inverted(true);
                assert_eq!(
                    plain.is_satisfied(&content()),
                    !inverted.is_satisfied(&content())
                );

                // With children the inversion applies to the node's own result.
                let with_child = Spy::new(own)
                    .node()
                    .inverted(true)
                    .with_child(Spy::new(child).node());
                assert_eq!(with_child.is_satisfied(&content()), !own && child);
            }
        }
    }

    #[test]
    fn disabled_node_is_transparent() {
        let spy = Spy::new(false);
        let root = spy
            .node()
            .with_status(ConditionStatus::Disabled)
            .with_child(Spy::new(true).node());
        assert!(root.is_satisfied(&content()));
        assert_eq!(spy.calls(), 0);
    }

    #[test]
    fn roots_are_ored_and_empty_is_true() {
        assert!(evaluate_roots(&[], &content()));
        let roots = vec![Spy::new(false).node(), Spy::failing().node(), Spy::new(true).node()];
        assert!(evaluate_roots(&roots, &content()));
        let roots = vec![Spy::new(false).node(), Spy::failing().node()];
        assert!(!evaluate_roots(&roots, &content()));
    }
}
