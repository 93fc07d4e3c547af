//! Where finished exchanges go.

use std::sync::Mutex;

use crate::telemetry::LogMap;

/// Receives the flattened telemetry of every finished exchange.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, data: &LogMap);
}

/// Emits each exchange as one structured event on the `telemetry` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, data: &LogMap) {
        let exchange_id = data
            .get("exchange_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let web_service_status = data
            .get("web_service_status")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        match serde_json::to_string(data) {
            Ok(fields) => tracing::info!(
                target: "telemetry",
                exchange_id,
                web_service_status,
                fields = %fields,
                "Exchange finished"
            ),
            Err(e) => tracing::warn!(target: "telemetry", exchange_id, error = %e, "Unserializable telemetry"),
        }
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogMap>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogMap> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl TelemetrySink for MemorySink {
    fn record(&self, data: &LogMap) {
        if let Ok(mut records) = self.records.lock() {
            records.push(data.clone());
        }
    }
}
