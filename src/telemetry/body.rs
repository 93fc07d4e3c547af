//! Body component with a bounded retained copy.
//!
//! # Responsibilities
//! - Accumulate streamed bytes written incrementally
//! - Track the real length separately from what is retained
//! - Flip to "not analyzable" once the retention cap is exceeded
//!
//! # Design Decisions
//! - The flip is permanent for writes; only `set_body` restores it
//! - On overflow the retained prefix is kept as-is (no partial append)
//! - `set_body` is the only way tasks rewrite content

use bytes::{Bytes, BytesMut};
use serde_json::Value;

use crate::telemetry::{LogMap, TelemetryComponent};

/// Default retention cap (1 MiB).
pub const DEFAULT_CAPTURE_LIMIT: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Body {
    retained: BytesMut,
    real_length: u64,
    capture_limit: usize,
    analyzable: bool,
}

impl Body {
    pub fn new(capture_limit: usize) -> Self {
        Self {
            retained: BytesMut::new(),
            real_length: 0,
            capture_limit,
            analyzable: true,
        }
    }

    /// Record bytes that went (or will go) over the wire.
    ///
    /// Bytes are retained only while the total stays within the cap.
    pub fn write(&mut self, chunk: &[u8]) {
        self.real_length += chunk.len() as u64;
        if !self.analyzable {
            return;
        }
        if self.retained.len() + chunk.len() > self.capture_limit {
            self.analyzable = false;
            tracing::trace!(
                capture_limit = self.capture_limit,
                "Body exceeded capture limit, retention stopped"
            );
            return;
        }
        self.retained.extend_from_slice(chunk);
    }

    /// Replace the content. Used by tasks that rewrite the body.
    ///
    /// The new content is complete, so the body is analyzable again even if
    /// the original overflowed.
    pub fn set_body(&mut self, content: impl Into<Bytes>) {
        let content: Bytes = content.into();
        self.real_length = content.len() as u64;
        self.retained = BytesMut::from(&content[..]);
        self.analyzable = true;
    }

    /// Retained bytes. Complete only when `is_analyzable()` holds.
    pub fn get_body(&self) -> Bytes {
        self.retained.clone().freeze()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.retained
    }

    pub fn is_analyzable(&self) -> bool {
        self.analyzable
    }

    /// Total number of bytes written, retained or not.
    pub fn real_length(&self) -> u64 {
        self.real_length
    }

    pub fn retained_length(&self) -> usize {
        self.retained.len()
    }

    pub fn capture_limit(&self) -> usize {
        self.capture_limit
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURE_LIMIT)
    }
}

impl TelemetryComponent for Body {
    fn name(&self) -> &'static str {
        "body"
    }

    fn own_data(&self) -> LogMap {
        let mut data = LogMap::new();
        if self.analyzable {
            data.insert(
                String::new(),
                Value::String(String::from_utf8_lossy(&self.retained).into_owned()),
            );
        }
        data.insert("length".into(), Value::from(self.real_length));
        data.insert("analyzable".into(), Value::Bool(self.analyzable));
        data
    }
}
