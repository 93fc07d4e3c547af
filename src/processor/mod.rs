//! HTTP scheme processor: drives one exchange end to end.
//!
//! # State Machine
//! ```text
//! START → REQUEST_PREPARED ─┬→ SENT → RECEIVING → EMITTED
//!                           └→ SEND_FAILED → FALLBACK_EMITTED
//! ```
//!
//! # Data Flow
//! ```text
//! inbound request (RequestInfo + body source)
//!     → drain body into request Body (bounded)
//!     → destination_request_preparation tasks
//!     → stop requested? ──────────────┐
//!     → reqwest send (head timeout)   │ failure
//!     → started_receiving tasks       │   → fallback (if any) or 503
//!     → emission                      │   → destination_reach_failure tasks
//!     → emitted_response tasks  ←─────┘
//!     → TelemetrySink
//! ```
//!
//! # Design Decisions
//! - Everything mutable lives in the exchange's `AnalyzableContent`; the
//!   processor itself is shared and immutable
//! - Inbound bodies larger than the capture limit are streamed to the
//!   destination while it is being contacted
//! - A body source failing before the response head is sent is handled like
//!   an unreachable destination; after that it is fatal for the connection

pub mod outbound;
pub mod sink;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;

use crate::config::GatewayConfig;
use crate::emission::writer::is_hop_by_hop;
use crate::emission::{
    emit_response, BeforeEmit, BodySource, EmissionError, EmitOptions, EmitSummary,
    HttpResponseWriter, HttpVersion,
};
use crate::observability::metrics;
use crate::pipeline::{Phase, PhaseRunner};
use crate::telemetry::{
    AnalyzableContent, Component, FallbackResponse, RequestInfo, ResponseInfo, Timing,
    WebServiceIdentity, WebServiceStatus, WsStatus,
};

use outbound::OutboundBody;
pub use sink::{MemorySink, TelemetrySink, TracingSink};

/// Body sent when the destination is unreachable and no fallback exists.
pub const NOT_REACHABLE_BODY: &str = r#"{"error":"destination_not_reachable","message":"The destination web service could not be reached."}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Start,
    RequestPrepared,
    Sent,
    Receiving,
    Emitted,
    SendFailed,
    FallbackEmitted,
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExchangeState::Start => "START",
            ExchangeState::RequestPrepared => "REQUEST_PREPARED",
            ExchangeState::Sent => "SENT",
            ExchangeState::Receiving => "RECEIVING",
            ExchangeState::Emitted => "EMITTED",
            ExchangeState::SendFailed => "SEND_FAILED",
            ExchangeState::FallbackEmitted => "FALLBACK_EMITTED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Emission(#[from] EmissionError),
}

/// Per-connection facts the processor needs about the client.
#[derive(Debug, Clone, Copy)]
pub struct ClientContext {
    pub version: HttpVersion,
    pub keep_alive: bool,
}

/// Result of one exchange, as seen by the connection loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOutcome {
    pub status: u16,
    pub web_service_status: Option<WsStatus>,
    pub final_state: ExchangeState,
    /// The connection cannot carry another request.
    pub close_connection: bool,
}

/// The service an exchange belongs to: who owns it and what runs.
pub struct ServiceContext<'a> {
    pub identity: WebServiceIdentity,
    pub runner: &'a PhaseRunner,
}

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub capture_limit: usize,
    pub chunk_size: usize,
    pub response_head_timeout: Duration,
}

impl ProcessorSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            capture_limit: config.body.capture_limit_bytes,
            chunk_size: config.body.read_chunk_size.max(1),
            response_head_timeout: Duration::from_secs(config.timeouts.request_secs),
        }
    }
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

pub struct HttpSchemeProcessor {
    client: reqwest::Client,
    settings: ProcessorSettings,
    sink: Arc<dyn TelemetrySink>,
}

struct Tracker {
    state: ExchangeState,
}

impl Tracker {
    fn move_to(&mut self, content: &AnalyzableContent, next: ExchangeState) {
        tracing::debug!(
            exchange_id = %content.id(),
            from = %self.state,
            to = %next,
            "Exchange state transition"
        );
        self.state = next;
    }
}

impl HttpSchemeProcessor {
    pub fn new(client: reqwest::Client, settings: ProcessorSettings, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            client,
            settings,
            sink,
        }
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Run one exchange. `request` carries everything but the body, which is
    /// read from `body`.
    pub async fn process<R, W>(
        &self,
        request: RequestInfo,
        service: ServiceContext<'_>,
        client: ClientContext,
        mut body: BodySource<R>,
        writer: &mut HttpResponseWriter<W>,
    ) -> Result<ExchangeOutcome, ProcessError>
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let started = Instant::now();
        let runner = service.runner;
        let head_request = request.method.eq_ignore_ascii_case("HEAD");

        let mut content = AnalyzableContent::new();
        let mut tracker = Tracker {
            state: ExchangeState::Start,
        };
        content.add_component(Component::Timing(Timing::started()));
        content.add_component(Component::Status(WebServiceStatus::new()));
        content.add_component(Component::WebService(service.identity));
        content.add_component(Component::Request(request));

        // Drain the inbound body until it overflows the capture limit.
        let mut prefix: Vec<Bytes> = Vec::new();
        let mut body_failed = false;
        loop {
            match body.next_segment(self.settings.chunk_size).await {
                Ok(Some(segment)) => {
                    let overflowed = match content.request_mut() {
                        Some(request) => {
                            request.body.write(&segment);
                            !request.body.is_analyzable()
                        }
                        None => false,
                    };
                    prefix.push(segment);
                    if overflowed {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(exchange_id = %content.id(), error = %e, "Inbound body unreadable");
                    body_failed = true;
                    break;
                }
            }
        }

        runner.run(Phase::DestinationRequestPreparation, &mut content);
        tracker.move_to(&content, ExchangeState::RequestPrepared);

        let response = if content.execution().is_stop_requested() {
            tracing::debug!(exchange_id = %content.id(), "Destination call stopped by a task");
            None
        } else if body_failed {
            None
        } else {
            self.forward(&mut content, &mut tracker, prefix, &mut body).await
        };

        let emit_options = EmitOptions {
            chunk_size: self.settings.chunk_size,
            version: client.version,
            head_only: head_request,
            keep_alive: client.keep_alive,
        };

        let summary = match response {
            Some(response) => {
                match self
                    .emit_destination(&mut content, &mut tracker, runner, response, writer, emit_options)
                    .await
                {
                    Ok(summary) => Some(summary),
                    Err(e) if writer.head_sent() => {
                        self.finish(&mut content, started);
                        return Err(e.into());
                    }
                    Err(e) => {
                        tracing::debug!(exchange_id = %content.id(), error = %e, "Destination body failed before emission");
                        None
                    }
                }
            }
            None => None,
        };

        let summary = match summary {
            Some(summary) => summary,
            None => {
                let result = self
                    .emit_failure(&mut content, &mut tracker, runner, writer, emit_options)
                    .await;
                match result {
                    Ok(summary) => summary,
                    Err(e) => {
                        self.finish(&mut content, started);
                        return Err(e.into());
                    }
                }
            }
        };

        let inbound_consumed = body.is_exhausted() || body_failed;
        if !inbound_consumed {
            tracing::debug!(exchange_id = %content.id(), "Inbound body not fully read, closing connection");
        }

        let outcome = ExchangeOutcome {
            status: summary.status,
            web_service_status: content.status().and_then(WebServiceStatus::get),
            final_state: tracker.state,
            close_connection: summary.close_connection || !inbound_consumed || body_failed,
        };
        self.finish(&mut content, started);
        Ok(outcome)
    }

    /// Send the request, streaming any body remainder concurrently.
    /// `None` means the destination could not be reached.
    async fn forward<R>(
        &self,
        content: &mut AnalyzableContent,
        tracker: &mut Tracker,
        prefix: Vec<Bytes>,
        body: &mut BodySource<R>,
    ) -> Option<reqwest::Response>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let request = content.request()?;
        let (outbound_body, pump_tx) = if request.body.is_analyzable() {
            let bytes = request.body.get_body();
            let body = if bytes.is_empty() {
                OutboundBody::None
            } else {
                OutboundBody::Full(bytes)
            };
            (body, None)
        } else {
            let (tx, rx) = mpsc::channel(4);
            (OutboundBody::Streamed { prefix, rest: rx }, Some(tx))
        };

        let builder = match outbound::build_request(&self.client, request, outbound_body) {
            Ok(builder) => builder,
            Err(e) => {
                tracing::warn!(exchange_id = %content.id(), error = %e, "Cannot build destination request");
                return None;
            }
        };

        if let Some(timing) = content.timing_mut() {
            timing.mark_sent();
        }
        tracker.move_to(content, ExchangeState::Sent);

        let exchange_id = content.id();
        let chunk_size = self.settings.chunk_size;
        let send = outbound::send(builder, self.settings.response_head_timeout);

        let result = match pump_tx {
            None => send.await,
            Some(tx) => {
                let pump = async {
                    loop {
                        match body.next_segment(chunk_size).await {
                            Ok(Some(segment)) => {
                                if let Some(request) = content.request_mut() {
                                    request.body.write(&segment);
                                }
                                if tx.send(Ok(segment)).await.is_err() {
                                    break;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                let _ = tx.send(Err(e)).await;
                                break;
                            }
                        }
                    }
                    drop(tx);
                };
                tokio::pin!(send);
                tokio::pin!(pump);
                let mut pump_done = false;
                loop {
                    tokio::select! {
                        result = &mut send => break result,
                        _ = &mut pump, if !pump_done => pump_done = true,
                    }
                }
            }
        };

        match result {
            Ok(response) => Some(response),
            Err(e) => {
                tracing::info!(%exchange_id, error = %e, "Destination not reachable");
                None
            }
        }
    }

    async fn emit_destination<W>(
        &self,
        content: &mut AnalyzableContent,
        tracker: &mut Tracker,
        runner: &PhaseRunner,
        response: reqwest::Response,
        writer: &mut HttpResponseWriter<W>,
        options: EmitOptions,
    ) -> Result<EmitSummary, EmissionError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        if let Some(timing) = content.timing_mut() {
            timing.mark_started_receiving();
        }
        tracker.move_to(content, ExchangeState::Receiving);
        content.add_component(Component::Response(outbound::response_info(
            &response,
            self.settings.capture_limit,
        )));

        let source = outbound::response_source(response);
        let summary = emit_response(content, source, writer, phase_hook(runner), options).await?;

        if let Some(status) = content.status_mut() {
            status.set(WsStatus::from_destination(summary.status));
        }
        tracker.move_to(content, ExchangeState::Emitted);
        runner.run(Phase::EmittedResponse, content);
        Ok(summary)
    }

    async fn emit_failure<W>(
        &self,
        content: &mut AnalyzableContent,
        tracker: &mut Tracker,
        runner: &PhaseRunner,
        writer: &mut HttpResponseWriter<W>,
        options: EmitOptions,
    ) -> Result<EmitSummary, EmissionError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        tracker.move_to(content, ExchangeState::SendFailed);
        if let Some(status) = content.status_mut() {
            status.overwrite(WsStatus::NotReachable);
        }

        match content.execution_mut().take_fallback() {
            Some(fallback) => {
                if let Some(timing) = content.timing_mut() {
                    timing.mark_started_receiving();
                }
                let ws_status = fallback.web_service_status;
                let (response, body) = fallback_response(fallback, self.settings.capture_limit);
                content.add_component(Component::Response(response));
                let source = BodySource::sized(BufReader::new(&body[..]), body.len() as u64);
                let summary =
                    emit_response(content, source, writer, phase_hook(runner), options).await?;

                if let Some(status) = content.status_mut() {
                    status.overwrite(ws_status.unwrap_or_else(|| WsStatus::synthesized(summary.status)));
                }
                tracker.move_to(content, ExchangeState::FallbackEmitted);
                runner.run(Phase::EmittedResponse, content);
                Ok(summary)
            }
            None => {
                let mut response = ResponseInfo::new(self.settings.capture_limit);
                response.set_destination_status(503);
                response.header.add("Content-Type", "application/json");
                content.add_component(Component::Response(response));
                // A 503 from the gateway itself never takes a task override.
                content.execution_mut().set_status_code("503");

                let body = NOT_REACHABLE_BODY.as_bytes();
                let source = BodySource::sized(BufReader::new(body), body.len() as u64);
                let summary = emit_response(content, source, writer, None, options).await?;
                runner.run(Phase::DestinationReachFailure, content);
                Ok(summary)
            }
        }
    }

    fn finish(&self, content: &mut AnalyzableContent, started: Instant) {
        if let Some(timing) = content.timing_mut() {
            timing.mark_stop();
        }
        let status = content.effective_status().unwrap_or(0);
        let ws_status = content
            .status()
            .and_then(WebServiceStatus::get)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "UNKNOWN".to_string());
        metrics::record_exchange(status, &ws_status, started.elapsed());
        self.sink.record(&content.component_data_to_log());
    }
}

/// `started_receiving` tasks as an emission hook, or the fast path when
/// there are none.
fn phase_hook(runner: &PhaseRunner) -> Option<BeforeEmit<'_>> {
    if runner.tasks(Phase::StartedReceiving).is_empty() {
        None
    } else {
        Some(Box::new(move |content: &mut AnalyzableContent| {
            runner.run(Phase::StartedReceiving, content);
        }))
    }
}

fn fallback_response(fallback: FallbackResponse, capture_limit: usize) -> (ResponseInfo, Bytes) {
    let mut response = ResponseInfo::new(capture_limit);
    response.set_destination_status(fallback.status);
    // Framing comes from the body itself.
    for (name, value) in fallback.headers {
        if !is_hop_by_hop(&name) {
            response.header.add(&name, value);
        }
    }
    (response, Bytes::from(fallback.body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Registry;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    fn runner(events: Value) -> PhaseRunner {
        let events: BTreeMap<Phase, Vec<crate::config::schema::TaskConfig>> =
            serde_json::from_value(events).unwrap();
        Registry::default().compile_events(&events)
    }

    fn processor(sink: Arc<MemorySink>) -> HttpSchemeProcessor {
        let settings = ProcessorSettings {
            capture_limit: 1024,
            chunk_size: 64,
            response_head_timeout: Duration::from_secs(2),
        };
        HttpSchemeProcessor::new(reqwest::Client::new(), settings, sink)
    }

    fn request(destination: &str) -> RequestInfo {
        let mut request = RequestInfo::new("GET", "/orders", 1024);
        request.destination = Some(destination.parse().unwrap());
        request
    }

    fn identity() -> WebServiceIdentity {
        WebServiceIdentity {
            id: Some("orders".into()),
            user: "alice".into(),
        }
    }

    const CLIENT: ClientContext = ClientContext {
        version: HttpVersion::Http11,
        keep_alive: true,
    };

    fn empty_body() -> BodySource<BufReader<&'static [u8]>> {
        BodySource::Empty
    }

    #[tokio::test]
    async fn unreachable_without_fallback_is_503() {
        let sink = Arc::new(MemorySink::new());
        let processor = processor(sink.clone());
        let runner = runner(json!({
            "destination_reach_failure": [{"handler": "set_header", "options": {"side": "response", "name": "X-Seen", "value": "1"}}]
        }));
        let mut writer = HttpResponseWriter::new(Vec::new());

        let outcome = processor
            .process(
                request("http://127.0.0.1:1/orders"),
                ServiceContext { identity: identity(), runner: &runner },
                CLIENT,
                empty_body(),
                &mut writer,
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, 503);
        assert_eq!(outcome.web_service_status, Some(WsStatus::NotReachable));
        assert_eq!(outcome.final_state, ExchangeState::SendFailed);
        let wire = String::from_utf8(writer.into_inner()).unwrap();
        assert!(wire.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(wire.ends_with(NOT_REACHABLE_BODY));

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["web_service_status"], json!("NOT_REACHABLE"));
        assert_eq!(records[0]["response_header"], json!(["Content-Type: application/json", "X-Seen: 1"]));
    }

    #[tokio::test]
    async fn stopped_request_uses_fallback() {
        let sink = Arc::new(MemorySink::new());
        let processor = processor(sink.clone());
        let runner = runner(json!({
            "destination_request_preparation": [{
                "handler": "stop_request",
                "options": {"fallback": {
                    "status": 200,
                    "headers": [["Content-Type", "application/json"], ["Set-Cookie", "a=1"], ["Set-Cookie", "b=2"]],
                    "body": "{\"cached\":true}"
                }}
            }]
        }));
        let mut writer = HttpResponseWriter::new(Vec::new());

        let outcome = processor
            .process(
                request("http://127.0.0.1:1/orders"),
                ServiceContext { identity: identity(), runner: &runner },
                CLIENT,
                empty_body(),
                &mut writer,
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, 200);
        assert_eq!(outcome.web_service_status, Some(WsStatus::Synthesized(2)));
        assert_eq!(outcome.final_state, ExchangeState::FallbackEmitted);
        let wire = String::from_utf8(writer.into_inner()).unwrap();
        assert!(wire.contains("Set-Cookie: a=1\r\nSet-Cookie: b=2\r\n"));
        assert!(wire.contains("Content-Length: 15\r\n"));
        assert!(wire.ends_with("{\"cached\":true}"));
        assert_eq!(sink.records()[0]["web_service_status"], json!("2WS"));
    }

    #[tokio::test]
    async fn fallback_is_framed_by_its_own_length() {
        let processor = processor(Arc::new(MemorySink::new()));
        let runner = runner(json!({
            "destination_request_preparation": [{
                "handler": "stop_request",
                "options": {"fallback": {
                    "status": 200,
                    "headers": [["Content-Length", "999"], ["Transfer-Encoding", "chunked"]],
                    "body": "short"
                }}
            }]
        }));
        let mut writer = HttpResponseWriter::new(Vec::new());
        let client = ClientContext {
            version: HttpVersion::Http10,
            keep_alive: true,
        };
        let outcome = processor
            .process(
                request("http://127.0.0.1:1/"),
                ServiceContext { identity: identity(), runner: &runner },
                client,
                empty_body(),
                &mut writer,
            )
            .await
            .unwrap();

        assert!(!outcome.close_connection);
        let wire = String::from_utf8(writer.into_inner()).unwrap();
        assert!(wire.starts_with("HTTP/1.0 200 OK\r\nContent-Length: 5\r\n"));
        assert!(!wire.contains("999"));
        assert!(!wire.contains("Transfer-Encoding"));
        assert!(wire.ends_with("\r\n\r\nshort"));
    }

    #[tokio::test]
    async fn fallback_status_can_be_explicit() {
        let processor = processor(Arc::new(MemorySink::new()));
        let runner = runner(json!({
            "destination_request_preparation": [{
                "handler": "fallback_response",
                "options": {"status": 500, "body": "down", "web_service_status": "2WS"}
            }]
        }));
        let mut writer = HttpResponseWriter::new(Vec::new());
        let outcome = processor
            .process(
                request("http://127.0.0.1:1/"),
                ServiceContext { identity: identity(), runner: &runner },
                CLIENT,
                empty_body(),
                &mut writer,
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, 500);
        assert_eq!(outcome.web_service_status, Some(WsStatus::Synthesized(2)));
    }

    #[tokio::test]
    async fn preparation_tasks_see_captured_request_body() {
        let sink = Arc::new(MemorySink::new());
        let processor = processor(sink.clone());
        let runner = runner(json!({
            "destination_request_preparation": [{
                "handler": "stop_request",
                "conditions": [{"class": "json_body", "options": {"path": "$.action", "expected": "delete"}}]
            }]
        }));
        let mut writer = HttpResponseWriter::new(Vec::new());
        let payload = br#"{"action":"delete"}"#;
        let mut post = request("http://127.0.0.1:1/");
        post.method = "POST".into();

        let outcome = processor
            .process(
                post,
                ServiceContext { identity: identity(), runner: &runner },
                CLIENT,
                BodySource::sized(BufReader::new(&payload[..]), payload.len() as u64),
                &mut writer,
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, 503);
        assert!(!outcome.close_connection);
        assert_eq!(sink.records()[0]["request_body"], json!(r#"{"action":"delete"}"#));
    }
}
