//! Web-service status classification.
//!
//! # States
//! ```text
//! Unset → Destination(nXX)    real destination response
//! Unset → NotReachable        connectivity failure or task-aborted exchange
//! NotReachable → Synthesized(nWS)   explicit overwrite by a fallback response
//! ```
//!
//! Once set, the value only changes through `overwrite`.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::telemetry::{LogMap, TelemetryComponent};

/// Classified outcome of an exchange from the web service's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WsStatus {
    /// `nXX`: the destination answered with a status in class `n`.
    Destination(u8),
    /// `nWS`: a locally synthesized response in class `n`.
    Synthesized(u8),
    /// `NOT_REACHABLE`
    NotReachable,
}

impl WsStatus {
    pub const NOT_REACHABLE: &'static str = "NOT_REACHABLE";

    /// Class of a real destination status code.
    pub fn from_destination(status: u16) -> Self {
        WsStatus::Destination(status_class(status))
    }

    /// Class of a locally synthesized status code.
    pub fn synthesized(status: u16) -> Self {
        WsStatus::Synthesized(status_class(status))
    }
}

fn status_class(status: u16) -> u8 {
    (status / 100).clamp(1, 5) as u8
}

impl fmt::Display for WsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WsStatus::Destination(class) => write!(f, "{}XX", class),
            WsStatus::Synthesized(class) => write!(f, "{}WS", class),
            WsStatus::NotReachable => f.write_str(Self::NOT_REACHABLE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid web service status: {0}")]
pub struct InvalidWsStatus(pub String);

impl FromStr for WsStatus {
    type Err = InvalidWsStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        if upper == Self::NOT_REACHABLE {
            return Ok(WsStatus::NotReachable);
        }
        let bytes = upper.as_bytes();
        if bytes.len() != 3 || !(b'1'..=b'5').contains(&bytes[0]) {
            return Err(InvalidWsStatus(s.to_string()));
        }
        let class = bytes[0] - b'0';
        match &upper[1..] {
            "XX" => Ok(WsStatus::Destination(class)),
            "WS" => Ok(WsStatus::Synthesized(class)),
            _ => Err(InvalidWsStatus(s.to_string())),
        }
    }
}

/// Status component: write-once unless explicitly overwritten.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebServiceStatus {
    value: Option<WsStatus>,
}

impl WebServiceStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status if none is recorded yet. Returns whether it was applied.
    pub fn set(&mut self, status: WsStatus) -> bool {
        if self.value.is_some() {
            return false;
        }
        self.value = Some(status);
        true
    }

    pub fn overwrite(&mut self, status: WsStatus) {
        self.value = Some(status);
    }

    pub fn get(&self) -> Option<WsStatus> {
        self.value
    }
}

impl TelemetryComponent for WebServiceStatus {
    fn name(&self) -> &'static str {
        "web_service_status"
    }

    fn own_data(&self) -> LogMap {
        let mut data = LogMap::new();
        data.insert(
            String::new(),
            self.value
                .map(|s| Value::String(s.to_string()))
                .unwrap_or(Value::Null),
        );
        data
    }
}
