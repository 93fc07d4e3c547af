//! Per-exchange telemetry tree.
//!
//! # Data Flow
//! ```text
//! Exchange begins
//!     → AnalyzableContent::new (exchange id, execution-info bag)
//!     → processor adds Request / Response / Timing / Status components
//!     → conditions read it, tasks mutate it, emission writes bodies into it
//!     → component_data_to_log() flattens the whole tree
//!     → telemetry sink
//! ```
//!
//! # Design Decisions
//! - Closed set of component variants instead of a runtime class registry
//! - One component per kind; adding a kind again replaces it
//! - Children render with their parent's name as key prefix

pub mod body;
pub mod exchange;
pub mod execution;
pub mod header;
pub mod status;
pub mod timing;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use body::Body;
pub use exchange::{RequestInfo, ResponseInfo};
pub use execution::{ExecutionInfo, FallbackResponse};
pub use header::{FieldKind, Header, HeaderField};
pub use status::{WebServiceStatus, WsStatus};
pub use timing::Timing;

/// Flat key/value rendering of (part of) the tree.
pub type LogMap = BTreeMap<String, Value>;

/// A node of the telemetry tree that knows how to log itself.
pub trait TelemetryComponent {
    /// Key prefix for this component's entries.
    fn name(&self) -> &'static str;

    /// Entries contributed by this node alone. An empty key stands for the
    /// node itself.
    fn own_data(&self) -> LogMap;

    fn children(&self) -> Vec<&dyn TelemetryComponent> {
        Vec::new()
    }

    /// Own entries merged with every descendant's, prefixed by name.
    fn component_data_to_log(&self) -> LogMap {
        let prefix = self.name();
        let mut data = LogMap::new();
        for (key, value) in self.own_data() {
            data.insert(join_key(prefix, &key), value);
        }
        for child in self.children() {
            for (key, value) in child.component_data_to_log() {
                data.insert(join_key(prefix, &key), value);
            }
        }
        data
    }
}

fn join_key(prefix: &str, key: &str) -> String {
    match (prefix.is_empty(), key.is_empty()) {
        (true, _) => key.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{}_{}", prefix, key),
    }
}

/// Unique identifier for one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExchangeId(Uuid);

impl ExchangeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which configured web service an exchange belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebServiceIdentity {
    pub id: Option<String>,
    pub user: String,
}

impl TelemetryComponent for WebServiceIdentity {
    fn name(&self) -> &'static str {
        "web_service"
    }

    fn own_data(&self) -> LogMap {
        let mut data = LogMap::new();
        data.insert(
            "id".into(),
            self.id.clone().map(Value::String).unwrap_or(Value::Null),
        );
        data.insert("user".into(), Value::String(self.user.clone()));
        data
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    Request,
    Response,
    Timing,
    Status,
    WebService,
}

/// Closed set of components an exchange can carry.
#[derive(Debug, Clone)]
pub enum Component {
    Request(RequestInfo),
    Response(ResponseInfo),
    Timing(Timing),
    Status(WebServiceStatus),
    WebService(WebServiceIdentity),
}

impl Component {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::Request(_) => ComponentKind::Request,
            Component::Response(_) => ComponentKind::Response,
            Component::Timing(_) => ComponentKind::Timing,
            Component::Status(_) => ComponentKind::Status,
            Component::WebService(_) => ComponentKind::WebService,
        }
    }

    fn as_telemetry(&self) -> &dyn TelemetryComponent {
        match self {
            Component::Request(c) => c,
            Component::Response(c) => c,
            Component::Timing(c) => c,
            Component::Status(c) => c,
            Component::WebService(c) => c,
        }
    }
}

/// Root container for one request/response exchange.
#[derive(Debug, Clone)]
pub struct AnalyzableContent {
    id: ExchangeId,
    components: Vec<Component>,
    execution: ExecutionInfo,
}

macro_rules! component_accessors {
    ($get:ident, $get_mut:ident, $variant:ident, $ty:ty) => {
        pub fn $get(&self) -> Option<&$ty> {
            self.components.iter().find_map(|c| match c {
                Component::$variant(inner) => Some(inner),
                _ => None,
            })
        }

        pub fn $get_mut(&mut self) -> Option<&mut $ty> {
            self.components.iter_mut().find_map(|c| match c {
                Component::$variant(inner) => Some(inner),
                _ => None,
            })
        }
    };
}

impl AnalyzableContent {
    pub fn new() -> Self {
        Self {
            id: ExchangeId::new(),
            components: Vec::new(),
            execution: ExecutionInfo::new(),
        }
    }

    pub fn id(&self) -> ExchangeId {
        self.id
    }

    /// Attach a component, replacing any existing one of the same kind.
    pub fn add_component(&mut self, component: Component) {
        let kind = component.kind();
        match self.components.iter().position(|c| c.kind() == kind) {
            Some(pos) => self.components[pos] = component,
            None => self.components.push(component),
        }
    }

    pub fn remove_component(&mut self, kind: ComponentKind) -> Option<Component> {
        let pos = self.components.iter().position(|c| c.kind() == kind)?;
        Some(self.components.remove(pos))
    }

    pub fn has_component(&self, kind: ComponentKind) -> bool {
        self.components.iter().any(|c| c.kind() == kind)
    }

    component_accessors!(request, request_mut, Request, RequestInfo);
    component_accessors!(response, response_mut, Response, ResponseInfo);
    component_accessors!(timing, timing_mut, Timing, Timing);
    component_accessors!(status, status_mut, Status, WebServiceStatus);
    component_accessors!(web_service, web_service_mut, WebService, WebServiceIdentity);

    pub fn execution(&self) -> &ExecutionInfo {
        &self.execution
    }

    pub fn execution_mut(&mut self) -> &mut ExecutionInfo {
        &mut self.execution
    }

    /// Status the client will see: execution-info override, else the
    /// response component's.
    pub fn effective_status(&self) -> Option<u16> {
        self.execution
            .status_code_override()
            .or_else(|| self.response().and_then(ResponseInfo::status_code))
    }

    /// Flattened key/value map of the whole tree.
    pub fn component_data_to_log(&self) -> LogMap {
        let mut data = LogMap::new();
        data.insert("exchange_id".into(), Value::String(self.id.to_string()));
        for component in &self.components {
            data.extend(component.as_telemetry().component_data_to_log());
        }
        data
    }
}

impl Default for AnalyzableContent {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_replaces_same_kind() {
        let mut content = AnalyzableContent::new();
        content.add_component(Component::Response(ResponseInfo::new(16)));
        content
            .response_mut()
            .unwrap()
            .set_destination_status(200);
        content.add_component(Component::Response(ResponseInfo::new(16)));
        assert_eq!(content.response().unwrap().status_code(), None);
    }

    #[test]
    fn remove_component_detaches() {
        let mut content = AnalyzableContent::new();
        content.add_component(Component::Timing(Timing::started()));
        assert!(content.has_component(ComponentKind::Timing));
        assert!(content.remove_component(ComponentKind::Timing).is_some());
        assert!(content.timing().is_none());
        assert!(content.remove_component(ComponentKind::Timing).is_none());
    }

    #[test]
    fn effective_status_prefers_execution_override() {
        let mut content = AnalyzableContent::new();
        let mut response = ResponseInfo::new(16);
        response.set_destination_status(503);
        content.add_component(Component::Response(response));
        assert_eq!(content.effective_status(), Some(503));

        content.execution_mut().set_status_code("200");
        assert_eq!(content.effective_status(), Some(200));
    }

    #[test]
    fn log_map_flattens_tree() {
        let mut content = AnalyzableContent::new();
        let mut request = RequestInfo::new("GET", "/a", 16);
        request.header.add("Host", "example.com");
        content.add_component(Component::Request(request));
        let mut status = WebServiceStatus::new();
        status.set(WsStatus::Destination(2));
        content.add_component(Component::Status(status));

        let data = content.component_data_to_log();
        assert_eq!(data["request_method"], Value::String("GET".into()));
        assert_eq!(data["request_header"], serde_json::json!(["Host: example.com"]));
        assert_eq!(data["web_service_status"], Value::String("2XX".into()));
        assert!(data.contains_key("exchange_id"));
    }
}
