//! Execution-info bag.
//!
//! The only channel through which tasks steer the forwarding logic. Well-known
//! entries are typed; anything else goes into the open `values` map where
//! later tasks can read it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::telemetry::status::WsStatus;

/// A response synthesized by a task, emitted instead of the destination's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackResponse {
    #[serde(default = "default_fallback_status")]
    pub status: u16,
    /// Header lines in emission order. Names may repeat.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: String,
    /// Explicit web-service status, e.g. `2WS`. Derived from `status` if absent.
    #[serde(default, with = "ws_status_opt")]
    pub web_service_status: Option<WsStatus>,
}

fn default_fallback_status() -> u16 {
    200
}

mod ws_status_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::telemetry::status::WsStatus;

    pub fn serialize<S: Serializer>(value: &Option<WsStatus>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(status) => s.serialize_some(&status.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<WsStatus>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|s| s.parse().map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionInfo {
    status_code: Option<String>,
    stop_request: bool,
    fallback: Option<FallbackResponse>,
    values: BTreeMap<String, Value>,
}

impl ExecutionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the status code emitted to the client.
    pub fn set_status_code(&mut self, code: impl Into<String>) {
        self.status_code = Some(code.into());
    }

    pub fn raw_status_code(&self) -> Option<&str> {
        self.status_code.as_deref()
    }

    /// The override, if it is an integer within 100..=599.
    pub fn status_code_override(&self) -> Option<u16> {
        self.status_code
            .as_deref()
            .and_then(|raw| raw.trim().parse::<u16>().ok())
            .filter(|code| (100..=599).contains(code))
    }

    /// Ask the processor not to contact the destination.
    pub fn stop_request(&mut self) {
        self.stop_request = true;
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_request
    }

    pub fn set_fallback(&mut self, fallback: FallbackResponse) {
        self.fallback = Some(fallback);
    }

    pub fn fallback(&self) -> Option<&FallbackResponse> {
        self.fallback.as_ref()
    }

    pub fn take_fallback(&mut self) -> Option<FallbackResponse> {
        self.fallback.take()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }
}
