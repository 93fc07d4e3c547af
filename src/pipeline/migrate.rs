//! Versioned option migrations.
//!
//! Every task handler and predicate class has a current options version.
//! Configuration written against an older version is upgraded at load time
//! by chaining `(kind, from_version)` steps until the current version.

use std::collections::HashMap;

use serde_json::{json, Value};

pub type MigrationFn = fn(Value) -> Result<Value, String>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MigrationError {
    #[error("`{kind}` has no migration from version {version}")]
    NoPath { kind: String, version: u32 },

    #[error("`{kind}` version {version} is newer than supported version {current}")]
    FromNewer {
        kind: String,
        version: u32,
        current: u32,
    },

    #[error("migrating `{kind}` from version {version} failed: {reason}")]
    Step {
        kind: String,
        version: u32,
        reason: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Migrations {
    steps: HashMap<(String, u32), MigrationFn>,
    current: HashMap<String, u32>,
}

impl Migrations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Migrations for the built-in handlers and predicates.
    pub fn builtin() -> Self {
        let mut migrations = Self::new();
        migrations.register("endpoint", 0, endpoint_v0_to_v1);
        migrations.register("status_code", 0, status_code_v0_to_v1);
        migrations.register("set_header", 0, set_header_v0_to_v1);
        migrations
    }

    /// Register the step that upgrades `kind` from `from` to `from + 1`.
    pub fn register(&mut self, kind: &str, from: u32, step: MigrationFn) {
        self.steps.insert((kind.to_string(), from), step);
        let current = self.current.entry(kind.to_string()).or_insert(0);
        *current = (*current).max(from + 1);
    }

    /// Current version of `kind`; kinds without migrations are at 0.
    pub fn current_version(&self, kind: &str) -> u32 {
        self.current.get(kind).copied().unwrap_or(0)
    }

    /// Upgrade `options` written for `version` (current if `None`).
    pub fn upgrade(
        &self,
        kind: &str,
        version: Option<u32>,
        mut options: Value,
    ) -> Result<Value, MigrationError> {
        let current = self.current_version(kind);
        let mut version = version.unwrap_or(current);
        if version > current {
            return Err(MigrationError::FromNewer {
                kind: kind.to_string(),
                version,
                current,
            });
        }
        while version < current {
            let step = self
                .steps
                .get(&(kind.to_string(), version))
                .ok_or_else(|| MigrationError::NoPath {
                    kind: kind.to_string(),
                    version,
                })?;
            options = step(options).map_err(|reason| MigrationError::Step {
                kind: kind.to_string(),
                version,
                reason,
            })?;
            tracing::debug!(kind, from = version, to = version + 1, "Migrated options");
            version += 1;
        }
        Ok(options)
    }
}

fn take_object(options: Value) -> Result<serde_json::Map<String, Value>, String> {
    match options {
        Value::Object(map) => Ok(map),
        other => Err(format!("expected an object, got {}", other)),
    }
}

/// `{"pattern": "a/*"}` → `{"patterns": ["a/*"]}`
fn endpoint_v0_to_v1(options: Value) -> Result<Value, String> {
    let mut map = take_object(options)?;
    let pattern = map.remove("pattern").ok_or("missing `pattern`")?;
    map.insert("patterns".into(), json!([pattern]));
    Ok(Value::Object(map))
}

/// `{"code": 404}` or `{"code": "4XX"}` → `{"patterns": ["404"]}`
fn status_code_v0_to_v1(options: Value) -> Result<Value, String> {
    let mut map = take_object(options)?;
    let code = match map.remove("code").ok_or("missing `code`")? {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s,
        other => return Err(format!("unsupported `code`: {}", other)),
    };
    map.insert("patterns".into(), json!([code]));
    Ok(Value::Object(map))
}

/// `{"header": "X-A", ...}` → `{"name": "X-A", ...}`
fn set_header_v0_to_v1(options: Value) -> Result<Value, String> {
    let mut map = take_object(options)?;
    if let Some(name) = map.remove("header") {
        map.insert("name".into(), name);
    }
    Ok(Value::Object(map))
}
