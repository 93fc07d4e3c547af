//! Exchange timing.
//!
//! Instants are decimal UNIX seconds with microsecond precision so they can
//! be logged as-is and compared by SLA conditions.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::telemetry::{LogMap, TelemetryComponent};

/// Current wall-clock time as decimal seconds.
pub fn now_decimal() -> f64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (elapsed.as_micros() as f64) / 1_000_000.0
}

#[derive(Debug, Clone)]
pub struct Timing {
    start: Option<f64>,
    started_receiving: Option<f64>,
    stop: Option<f64>,
    destination_round_trip: Option<f64>,
    sent_at: Option<Instant>,
}

impl Timing {
    pub fn new() -> Self {
        Self {
            start: None,
            started_receiving: None,
            stop: None,
            destination_round_trip: None,
            sent_at: None,
        }
    }

    /// Timing with `start` already recorded.
    pub fn started() -> Self {
        let mut timing = Self::new();
        timing.mark_start();
        timing
    }

    pub fn mark_start(&mut self) {
        self.start = Some(now_decimal());
    }

    /// The outbound request was handed to the transport.
    pub fn mark_sent(&mut self) {
        self.sent_at = Some(Instant::now());
    }

    /// Response headers arrived (or a fallback started). Closes the
    /// destination round trip if a send was recorded.
    pub fn mark_started_receiving(&mut self) {
        self.started_receiving = Some(now_decimal());
        if let Some(sent) = self.sent_at.take() {
            self.destination_round_trip = Some(sent.elapsed().as_micros() as f64 / 1_000_000.0);
        }
    }

    pub fn mark_stop(&mut self) {
        self.stop = Some(now_decimal());
    }

    pub fn start(&self) -> Option<f64> {
        self.start
    }

    pub fn started_receiving(&self) -> Option<f64> {
        self.started_receiving
    }

    pub fn stop(&self) -> Option<f64> {
        self.stop
    }

    /// Seconds between sending and receiving the destination's response head.
    pub fn destination_round_trip(&self) -> Option<f64> {
        self.destination_round_trip
    }

    /// Seconds between `start` and `stop`.
    pub fn total(&self) -> Option<f64> {
        match (self.start, self.stop) {
            (Some(start), Some(stop)) => Some((stop - start).max(0.0)),
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_round_trip(&mut self, seconds: f64) {
        self.destination_round_trip = Some(seconds);
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::new()
    }
}

fn decimal(value: Option<f64>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

impl TelemetryComponent for Timing {
    fn name(&self) -> &'static str {
        "timing"
    }

    fn own_data(&self) -> LogMap {
        let mut data = LogMap::new();
        data.insert("start".into(), decimal(self.start));
        data.insert("started_receiving".into(), decimal(self.started_receiving));
        data.insert("stop".into(), decimal(self.stop));
        data.insert(
            "destination_round_trip".into(),
            decimal(self.destination_round_trip),
        );
        data
    }
}
