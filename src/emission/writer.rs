//! HTTP/1.x response writer for the client connection.
//!
//! # Responsibilities
//! - Write the status line and header lines exactly once
//! - Regenerate framing headers from the chosen `TransferMode`
//! - Frame body segments (`{size:X}\r\n...\r\n`) in chunked mode
//!
//! # Design Decisions
//! - Header lines are written one per `HeaderField`, so repeated names
//!   (`Set-Cookie`) stay on separate lines
//! - A second head is an error the caller cannot recover from

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::emission::EmissionError;
use crate::telemetry::Header;

/// Headers owned by the connection, never copied from the response.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "content-length",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn from_minor(minor: u8) -> Self {
        if minor == 0 {
            HttpVersion::Http10
        } else {
            HttpVersion::Http11
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http10 => "1.0",
            HttpVersion::Http11 => "1.1",
        }
    }
}

/// How the response body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    ContentLength(u64),
    Chunked,
    /// Body ends when the connection closes (HTTP/1.0 without a length).
    CloseDelimited,
    /// No body follows; the length, if any, is advertised only.
    NoBody { content_length: Option<u64> },
}

impl TransferMode {
    /// Mode for a body of `known_length` sent to a `version` client.
    pub fn choose(known_length: Option<u64>, version: HttpVersion) -> Self {
        match (known_length, version) {
            (Some(len), _) => TransferMode::ContentLength(len),
            (None, HttpVersion::Http11) => TransferMode::Chunked,
            (None, HttpVersion::Http10) => TransferMode::CloseDelimited,
        }
    }

    pub fn forces_close(&self) -> bool {
        matches!(self, TransferMode::CloseDelimited)
    }
}

pub struct HttpResponseWriter<W> {
    inner: W,
    mode: Option<TransferMode>,
    body_written: u64,
    finished: bool,
}

impl<W: AsyncWrite + Unpin> HttpResponseWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            mode: None,
            body_written: 0,
            finished: false,
        }
    }

    pub fn head_sent(&self) -> bool {
        self.mode.is_some()
    }

    pub fn mode(&self) -> Option<TransferMode> {
        self.mode
    }

    pub fn body_written(&self) -> u64 {
        self.body_written
    }

    /// Write the status line and headers.
    pub async fn send_head(
        &mut self,
        version: HttpVersion,
        status: u16,
        header: &Header,
        mode: TransferMode,
        keep_alive: bool,
    ) -> Result<(), EmissionError> {
        if self.head_sent() {
            return Err(EmissionError::HeadersAlreadySent);
        }

        let reason = http::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown");
        let mut head = format!("HTTP/{} {} {}\r\n", version.as_str(), status, reason);
        for (name, value) in header.lines() {
            if is_hop_by_hop(name) {
                continue;
            }
            head.push_str(name);
            head.push_str(": ");
            head.push_str(&value);
            head.push_str("\r\n");
        }
        match mode {
            TransferMode::ContentLength(len) => head.push_str(&format!("Content-Length: {}\r\n", len)),
            TransferMode::NoBody {
                content_length: Some(len),
            } => head.push_str(&format!("Content-Length: {}\r\n", len)),
            TransferMode::Chunked => head.push_str("Transfer-Encoding: chunked\r\n"),
            TransferMode::CloseDelimited | TransferMode::NoBody { content_length: None } => {}
        }
        let keep_alive = keep_alive && !mode.forces_close();
        match (keep_alive, version) {
            (false, _) => head.push_str("Connection: close\r\n"),
            (true, HttpVersion::Http10) => head.push_str("Connection: keep-alive\r\n"),
            (true, HttpVersion::Http11) => {}
        }
        head.push_str("\r\n");

        // Marked before writing: a failed write still counts as a started response.
        self.mode = Some(mode);
        self.inner
            .write_all(head.as_bytes())
            .await
            .map_err(EmissionError::Client)?;
        Ok(())
    }

    /// Write one body segment, framed per the transfer mode.
    pub async fn write_body(&mut self, data: &[u8]) -> Result<(), EmissionError> {
        let mode = self.mode.ok_or(EmissionError::HeadNotSent)?;
        if data.is_empty() {
            return Ok(());
        }
        match mode {
            TransferMode::NoBody { .. } => return Ok(()),
            TransferMode::Chunked => {
                let frame_head = format!("{:X}\r\n", data.len());
                self.inner
                    .write_all(frame_head.as_bytes())
                    .await
                    .map_err(EmissionError::Client)?;
                self.inner.write_all(data).await.map_err(EmissionError::Client)?;
                self.inner.write_all(b"\r\n").await.map_err(EmissionError::Client)?;
            }
            TransferMode::ContentLength(_) | TransferMode::CloseDelimited => {
                self.inner.write_all(data).await.map_err(EmissionError::Client)?;
            }
        }
        self.body_written += data.len() as u64;
        Ok(())
    }

    /// Terminate the body and flush.
    pub async fn finish(&mut self) -> Result<(), EmissionError> {
        let mode = self.mode.ok_or(EmissionError::HeadNotSent)?;
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if mode == TransferMode::Chunked {
            self.inner
                .write_all(b"0\r\n\r\n")
                .await
                .map_err(EmissionError::Client)?;
        }
        self.inner.flush().await.map_err(EmissionError::Client)?;
        if let TransferMode::ContentLength(declared) = mode {
            if declared != self.body_written {
                return Err(EmissionError::LengthMismatch {
                    declared,
                    written: self.body_written,
                });
            }
        }
        Ok(())
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
