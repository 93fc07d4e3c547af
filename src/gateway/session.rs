//! One client connection: a keep-alive loop of exchanges.
//!
//! # Data Flow
//! ```text
//! read head (idle timeout, shutdown aware)
//!     → resolve destination / user / service ── error → JSON rejection
//!     → Expect: 100-continue → interim response
//!     → RequestInfo + body source over the connection reader
//!     → HttpSchemeProcessor::process
//!     → keep going unless the exchange or the client asked to close
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::emission::{EmissionError, HttpResponseWriter, HttpVersion, TransferMode};
use crate::gateway::connection::ConnectionId;
use crate::gateway::head::{self, Framing, RequestHead};
use crate::gateway::GatewayState;
use crate::observability::metrics;
use crate::processor::{ClientContext, ServiceContext};
use crate::telemetry::{Header, RequestInfo};

enum Next {
    Continue,
    Close,
}

pub async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    id: ConnectionId,
    state: Arc<GatewayState>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let _ = stream.set_nodelay(true);
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let idle = state.settings.idle_timeout;
    let mut served = 0u64;

    loop {
        let head = tokio::select! {
            result = tokio::time::timeout(idle, head::read_head(&mut reader, state.settings.max_head_bytes)) => result,
            _ = shutdown.recv() => {
                tracing::debug!(connection_id = %id, "Closing idle connection for shutdown");
                break;
            }
        };

        let head = match head {
            Err(_) => {
                tracing::debug!(connection_id = %id, served, "Idle timeout");
                break;
            }
            Ok(Ok(Some(head))) => head,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %id, error = %e, "Unreadable request head");
                if let Some(status) = e.status_code() {
                    let body = serde_json::json!({"error": "bad_request", "message": e.to_string()}).to_string();
                    let _ = write_simple(&mut write_half, HttpVersion::Http11, status, &body, false).await;
                }
                break;
            }
        };

        served += 1;
        match exchange(&state, peer, id, head, &mut reader, &mut write_half).await {
            Next::Continue => {}
            Next::Close => break,
        }
    }

    let _ = write_half.shutdown().await;
    tracing::debug!(connection_id = %id, %peer, served, "Connection finished");
}

async fn exchange(
    state: &GatewayState,
    peer: SocketAddr,
    id: ConnectionId,
    head: RequestHead,
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
) -> Next {
    let keep_alive = head.keep_alive();
    let version = head.version;

    let framing = match head.framing() {
        Ok(framing) => framing,
        Err(e) => {
            let status = e.status_code().unwrap_or(400);
            let body = serde_json::json!({"error": "bad_request", "message": e.to_string()}).to_string();
            let _ = write_simple(write_half, version, status, &body, false).await;
            return Next::Close;
        }
    };

    let directory = state.directory.load_full();
    let host = head.host();
    let resolution = match directory.resolve(host.as_deref(), &head.path, head.query.as_deref()) {
        Ok(resolution) => resolution,
        Err(e) => {
            tracing::info!(
                connection_id = %id,
                method = %head.method,
                path = %head.path,
                error = %e,
                "Request rejected"
            );
            metrics::record_rejection(e.code());
            // An unread body would be taken for the next request.
            let reuse = keep_alive && framing == Framing::None;
            let written = write_simple(write_half, version, e.status_code(), &e.to_json(), reuse).await;
            return if written.is_ok() && reuse { Next::Continue } else { Next::Close };
        }
    };

    tracing::debug!(
        connection_id = %id,
        method = %head.method,
        destination = %resolution.destination,
        web_service = resolution.service.id.as_deref().unwrap_or("-"),
        user = %resolution.service.user,
        "Request resolved"
    );

    if head.expects_continue() && framing != Framing::None {
        if write_half.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.is_err() {
            return Next::Close;
        }
    }

    let mut request = RequestInfo::new(head.method, head.path, state.processor.settings().capture_limit);
    request.query = resolution.forwarded_query();
    request.version = version.as_str().to_string();
    request.remote_addr = Some(peer.ip());
    request.header = head.header;
    request.destination = Some(resolution.destination);

    let service = ServiceContext {
        identity: resolution.service.identity(),
        runner: &resolution.service.runner,
    };
    let client = ClientContext { version, keep_alive };
    let body = head::body_source(framing, &mut *reader, state.settings.max_head_bytes);
    let mut writer = HttpResponseWriter::new(&mut *write_half);

    match state.processor.process(request, service, client, body, &mut writer).await {
        Ok(outcome) if outcome.close_connection || !keep_alive => Next::Close,
        Ok(_) => Next::Continue,
        Err(e) => {
            tracing::debug!(connection_id = %id, error = %e, "Exchange aborted");
            Next::Close
        }
    }
}

/// A complete response generated by the gateway itself.
async fn write_simple<W>(
    write_half: &mut W,
    version: HttpVersion,
    status: u16,
    body: &str,
    keep_alive: bool,
) -> Result<(), EmissionError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut header = Header::new();
    header.add("Content-Type", "application/json");
    let mut writer = HttpResponseWriter::new(write_half);
    writer
        .send_head(version, status, &header, TransferMode::ContentLength(body.len() as u64), keep_alive)
        .await?;
    writer.write_body(body.as_bytes()).await?;
    writer.finish().await
}
