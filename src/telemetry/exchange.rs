//! Request and response sides of an exchange.

use std::net::IpAddr;

use serde_json::Value;
use url::Url;

use crate::telemetry::body::Body;
use crate::telemetry::header::Header;
use crate::telemetry::{LogMap, TelemetryComponent};

/// Inbound request data plus the resolved destination.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: String,
    /// Path as received by the gateway.
    pub path: String,
    /// Query string forwarded to the destination (gateway parameters stripped).
    pub query: Option<String>,
    /// `1.0` or `1.1`.
    pub version: String,
    pub remote_addr: Option<IpAddr>,
    pub destination: Option<Url>,
    pub header: Header,
    pub body: Body,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, path: impl Into<String>, capture_limit: usize) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: None,
            version: "1.1".to_string(),
            remote_addr: None,
            destination: None,
            header: Header::new(),
            body: Body::new(capture_limit),
        }
    }

    /// Path used for endpoint matching: the destination's if resolved.
    pub fn endpoint_path(&self) -> &str {
        self.destination
            .as_ref()
            .map(Url::path)
            .unwrap_or(&self.path)
    }
}

impl TelemetryComponent for RequestInfo {
    fn name(&self) -> &'static str {
        "request"
    }

    fn own_data(&self) -> LogMap {
        let mut data = LogMap::new();
        data.insert("method".into(), Value::String(self.method.clone()));
        data.insert("path".into(), Value::String(self.path.clone()));
        data.insert(
            "query".into(),
            self.query.clone().map(Value::String).unwrap_or(Value::Null),
        );
        data.insert("http_version".into(), Value::String(self.version.clone()));
        data.insert(
            "remote_addr".into(),
            self.remote_addr
                .map(|ip| Value::String(ip.to_string()))
                .unwrap_or(Value::Null),
        );
        data.insert(
            "destination_url".into(),
            self.destination
                .as_ref()
                .map(|u| Value::String(u.to_string()))
                .unwrap_or(Value::Null),
        );
        data
    }

    fn children(&self) -> Vec<&dyn TelemetryComponent> {
        vec![&self.header, &self.body]
    }
}

/// Response data, from the destination or a synthesized fallback.
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    destination_status: Option<u16>,
    status_override: Option<u16>,
    pub header: Header,
    pub body: Body,
}

impl ResponseInfo {
    pub fn new(capture_limit: usize) -> Self {
        Self {
            destination_status: None,
            status_override: None,
            header: Header::new(),
            body: Body::new(capture_limit),
        }
    }

    pub fn set_destination_status(&mut self, status: u16) {
        self.destination_status = Some(status);
    }

    pub fn destination_status(&self) -> Option<u16> {
        self.destination_status
    }

    /// Manually override the status (takes precedence over the destination's).
    pub fn set_status_code(&mut self, status: u16) {
        self.status_override = Some(status);
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_override.or(self.destination_status)
    }
}

impl TelemetryComponent for ResponseInfo {
    fn name(&self) -> &'static str {
        "response"
    }

    fn own_data(&self) -> LogMap {
        let mut data = LogMap::new();
        data.insert(
            "status_code".into(),
            self.status_code().map(Value::from).unwrap_or(Value::Null),
        );
        data.insert(
            "destination_status_code".into(),
            self.destination_status.map(Value::from).unwrap_or(Value::Null),
        );
        data
    }

    fn children(&self) -> Vec<&dyn TelemetryComponent> {
        vec![&self.header, &self.body]
    }
}
