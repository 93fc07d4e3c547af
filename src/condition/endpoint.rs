//! Endpoint path globbing.
//!
//! # Pattern Tokens
//! - `*`  exactly one path segment
//! - `**` one or more path segments
//! - anything else matches one segment literally
//!
//! # Design Decisions
//! - Plain backtracking over tokenized segments, no regex
//! - `**` makes the worst case exponential, so every match runs against a
//!   wall-clock deadline and fails with `TimeBudgetExceeded` once it passes
//! - The clock is sampled every `CLOCK_CHECK_INTERVAL` steps

use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::condition::{EvaluationError, Predicate};
use crate::telemetry::AnalyzableContent;

/// Default matching budget.
pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(1);

const CLOCK_CHECK_INTERVAL: u64 = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    One,
    OneOrMore,
}

/// A compiled endpoint pattern such as `users/*/orders/**`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPattern {
    raw: String,
    tokens: Vec<Token>,
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl EndpointPattern {
    pub fn parse(raw: &str) -> Self {
        let tokens = segments(raw)
            .map(|segment| match segment {
                "*" => Token::One,
                "**" => Token::OneOrMore,
                literal => Token::Literal(literal.to_string()),
            })
            .collect();
        Self {
            raw: raw.to_string(),
            tokens,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match `path` against this pattern within `budget`.
    pub fn matches(&self, path: &str, budget: Duration) -> Result<bool, EvaluationError> {
        let path: Vec<&str> = segments(path).collect();
        let mut clock = Clock {
            deadline: Instant::now() + budget,
            budget,
            steps: 0,
        };
        self.match_from(0, &path, 0, &mut clock)
    }

    fn match_from(
        &self,
        token: usize,
        path: &[&str],
        segment: usize,
        clock: &mut Clock,
    ) -> Result<bool, EvaluationError> {
        clock.tick()?;

        let Some(current) = self.tokens.get(token) else {
            return Ok(segment == path.len());
        };

        match current {
            Token::Literal(expected) => {
                if path.get(segment) == Some(&expected.as_str()) {
                    self.match_from(token + 1, path, segment + 1, clock)
                } else {
                    Ok(false)
                }
            }
            Token::One => {
                if segment < path.len() {
                    self.match_from(token + 1, path, segment + 1, clock)
                } else {
                    Ok(false)
                }
            }
            Token::OneOrMore => {
                for end in segment + 1..=path.len() {
                    if self.match_from(token + 1, path, end, clock)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

struct Clock {
    deadline: Instant,
    budget: Duration,
    steps: u64,
}

impl Clock {
    fn tick(&mut self) -> Result<(), EvaluationError> {
        self.steps += 1;
        if self.steps % CLOCK_CHECK_INTERVAL == 0 && Instant::now() >= self.deadline {
            return Err(EvaluationError::TimeBudgetExceeded(self.budget));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointOptions {
    pub patterns: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub time_budget_ms: Option<u64>,
}

/// Matches the destination path (and optionally the method).
#[derive(Debug, Clone)]
pub struct EndpointPredicate {
    patterns: Vec<EndpointPattern>,
    methods: Vec<String>,
    budget: Duration,
}

impl EndpointPredicate {
    pub fn new(options: EndpointOptions, default_budget: Duration) -> Result<Self, EvaluationError> {
        if options.patterns.is_empty() {
            return Err(EvaluationError::InvalidOption {
                option: "patterns",
                reason: "at least one pattern is required".into(),
            });
        }
        Ok(Self {
            patterns: options.patterns.iter().map(|p| EndpointPattern::parse(p)).collect(),
            methods: options
                .methods
                .iter()
                .map(|m| m.to_ascii_uppercase())
                .collect(),
            budget: options
                .time_budget_ms
                .map(Duration::from_millis)
                .unwrap_or(default_budget),
        })
    }
}

impl Predicate for EndpointPredicate {
    fn class(&self) -> &'static str {
        "endpoint"
    }

    fn self_evaluate(&self, content: &AnalyzableContent) -> Result<bool, EvaluationError> {
        let request = content
            .request()
            .ok_or(EvaluationError::MissingComponent("request"))?;

        if !self.methods.is_empty()
            && !self
                .methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(&request.method))
        {
            return Ok(false);
        }

        let path = request.endpoint_path();
        for pattern in &self.patterns {
            if pattern.matches(path, self.budget)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
