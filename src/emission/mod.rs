//! Streaming response emission.
//!
//! # Data Flow
//! ```text
//! BodySource (destination or fallback)
//!     ├─ no callback: stream through, capturing into the response Body
//!     └─ callback:
//!          drain into Body + replay buffer until the Body overflows or the
//!          source ends → callback(&mut AnalyzableContent)
//!          → Body analyzable: emit Body content
//!          → otherwise: replay buffer, then the rest of the source
//! ```
//!
//! # Design Decisions
//! - Reads are bounded by `chunk_size`, so memory per exchange is capped at
//!   the capture limit plus one segment
//! - The transfer mode is renegotiated when an analyzable Body is re-emitted:
//!   its length is known, so a chunked destination response goes out with
//!   `Content-Length`
//! - Without a `Content-Length` header, a sized source's own length frames
//!   the response (fallbacks, the gateway's 503)
//! - The status comes from the execution-info override when valid,
//!   otherwise from the response component
//! - Source errors are reported separately from client write errors so the
//!   processor can still fall back while no head has been sent

pub mod source;
pub mod writer;

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::telemetry::AnalyzableContent;

pub use source::{BodySource, ChunkedDecoder};
pub use writer::{HttpResponseWriter, HttpVersion, TransferMode};

#[derive(Debug, thiserror::Error)]
pub enum EmissionError {
    #[error("response headers were already sent")]
    HeadersAlreadySent,

    #[error("body written before the response head")]
    HeadNotSent,

    #[error("no response component or status to emit")]
    MissingResponse,

    #[error("reading the body source failed: {0}")]
    Source(#[source] io::Error),

    #[error("writing to the client failed: {0}")]
    Client(#[source] io::Error),

    #[error("declared {declared} body bytes but wrote {written}")]
    LengthMismatch { declared: u64, written: u64 },
}

impl EmissionError {
    /// Errors after which the client connection must be dropped.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EmissionError::MissingResponse)
    }
}

/// Hook run once the body has been drained (or overflowed), before the head
/// is written.
pub type BeforeEmit<'a> = Box<dyn FnOnce(&mut AnalyzableContent) + Send + 'a>;

#[derive(Debug, Clone, Copy)]
pub struct EmitOptions {
    /// Upper bound for one source read.
    pub chunk_size: usize,
    /// Client protocol version.
    pub version: HttpVersion,
    /// HEAD request or a status that never carries a body.
    pub head_only: bool,
    /// Whether the client connection may be reused afterwards.
    pub keep_alive: bool,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            chunk_size: 8192,
            version: HttpVersion::Http11,
            head_only: false,
            keep_alive: true,
        }
    }
}

/// What was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitSummary {
    pub status: u16,
    pub mode: TransferMode,
    pub body_bytes: u64,
    /// The client connection cannot carry another exchange.
    pub close_connection: bool,
}

/// Statuses that never carry a body.
pub fn status_forbids_body(status: u16) -> bool {
    (100..200).contains(&status) || status == 204 || status == 304
}

fn declared_content_length(content: &AnalyzableContent) -> Option<u64> {
    content
        .response()?
        .header
        .get("content-length")?
        .trim()
        .parse()
        .ok()
}

/// Length for the head: the response's own `Content-Length`, else the
/// length framed by the source (fallbacks and gateway-made responses).
fn known_length(content: &AnalyzableContent, framed: Option<u64>) -> Option<u64> {
    declared_content_length(content).or(framed)
}

fn response_status(content: &AnalyzableContent) -> Result<u16, EmissionError> {
    content.effective_status().ok_or(EmissionError::MissingResponse)
}

fn capture(content: &mut AnalyzableContent, segment: &[u8]) -> Result<(), EmissionError> {
    content
        .response_mut()
        .ok_or(EmissionError::MissingResponse)?
        .body
        .write(segment);
    Ok(())
}

/// Emit the response held in `content`, with its body read from `source`.
pub async fn emit_response<R, W>(
    content: &mut AnalyzableContent,
    mut source: BodySource<R>,
    writer: &mut HttpResponseWriter<W>,
    before_emit: Option<BeforeEmit<'_>>,
    options: EmitOptions,
) -> Result<EmitSummary, EmissionError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if content.response().is_none() {
        return Err(EmissionError::MissingResponse);
    }

    let framed = source.declared_length();
    let Some(callback) = before_emit else {
        return stream_through(content, source, framed, writer, options).await;
    };

    // Drain until the body overflows the capture limit or the source ends.
    let mut replay: Vec<Bytes> = Vec::new();
    let mut exhausted = false;
    if !options.head_only {
        loop {
            match source
                .next_segment(options.chunk_size)
                .await
                .map_err(EmissionError::Source)?
            {
                None => {
                    exhausted = true;
                    break;
                }
                Some(segment) => {
                    capture(content, &segment)?;
                    replay.push(segment);
                    if !content
                        .response()
                        .map(|r| r.body.is_analyzable())
                        .unwrap_or(false)
                    {
                        break;
                    }
                }
            }
        }
    }

    callback(content);

    let status = response_status(content)?;
    let analyzable_body = content
        .response()
        .ok_or(EmissionError::MissingResponse)?
        .body
        .is_analyzable();

    if options.head_only || status_forbids_body(status) {
        return send_without_body(content, status, framed, writer, options).await;
    }

    if analyzable_body {
        let body = content
            .response()
            .ok_or(EmissionError::MissingResponse)?
            .body
            .get_body();
        if !exhausted {
            tracing::debug!("Body replaced by a task, remaining source bytes discarded");
        }
        let mode = TransferMode::ContentLength(body.len() as u64);
        send_head(content, status, writer, mode, options).await?;
        writer.write_body(&body).await?;
        writer.finish().await?;
        return Ok(summary(status, mode, writer, options));
    }

    let mode = TransferMode::choose(known_length(content, framed), options.version);
    send_head(content, status, writer, mode, options).await?;
    for segment in &replay {
        writer.write_body(segment).await?;
    }
    drop(replay);
    while let Some(segment) = source
        .next_segment(options.chunk_size)
        .await
        .map_err(EmissionError::Source)?
    {
        capture(content, &segment)?;
        writer.write_body(&segment).await?;
    }
    writer.finish().await?;
    Ok(summary(status, mode, writer, options))
}

async fn stream_through<R, W>(
    content: &mut AnalyzableContent,
    mut source: BodySource<R>,
    framed: Option<u64>,
    writer: &mut HttpResponseWriter<W>,
    options: EmitOptions,
) -> Result<EmitSummary, EmissionError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let status = response_status(content)?;
    if options.head_only || status_forbids_body(status) {
        return send_without_body(content, status, framed, writer, options).await;
    }

    let mode = TransferMode::choose(known_length(content, framed), options.version);

    // Read the first segment before committing to a head, so an immediate
    // source failure can still be answered with a fallback.
    let first = source
        .next_segment(options.chunk_size)
        .await
        .map_err(EmissionError::Source)?;

    send_head(content, status, writer, mode, options).await?;
    let mut next = first;
    while let Some(segment) = next {
        capture(content, &segment)?;
        writer.write_body(&segment).await?;
        next = source
            .next_segment(options.chunk_size)
            .await
            .map_err(EmissionError::Source)?;
    }
    writer.finish().await?;
    Ok(summary(status, mode, writer, options))
}

async fn send_without_body<W: AsyncWrite + Unpin>(
    content: &AnalyzableContent,
    status: u16,
    framed: Option<u64>,
    writer: &mut HttpResponseWriter<W>,
    options: EmitOptions,
) -> Result<EmitSummary, EmissionError> {
    let content_length = if status_forbids_body(status) {
        None
    } else {
        known_length(content, framed)
    };
    let mode = TransferMode::NoBody { content_length };
    send_head(content, status, writer, mode, options).await?;
    writer.finish().await?;
    Ok(summary(status, mode, writer, options))
}

async fn send_head<W: AsyncWrite + Unpin>(
    content: &AnalyzableContent,
    status: u16,
    writer: &mut HttpResponseWriter<W>,
    mode: TransferMode,
    options: EmitOptions,
) -> Result<(), EmissionError> {
    let header = &content
        .response()
        .ok_or(EmissionError::MissingResponse)?
        .header;
    writer
        .send_head(options.version, status, header, mode, options.keep_alive)
        .await
}

fn summary<W: AsyncWrite + Unpin>(
    status: u16,
    mode: TransferMode,
    writer: &HttpResponseWriter<W>,
    options: EmitOptions,
) -> EmitSummary {
    EmitSummary {
        status,
        mode,
        body_bytes: writer.body_written(),
        close_connection: !options.keep_alive || mode.forces_close(),
    }
}
