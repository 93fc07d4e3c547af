//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_exchanges_total` (counter): exchanges by status, web service status
//! - `gateway_exchange_duration_seconds` (histogram): end-to-end latency
//! - `gateway_task_failures_total` (counter): failed or panicked tasks by handler, phase
//! - `gateway_condition_errors_total` (counter): predicate evaluation errors by class
//! - `gateway_resolve_rejections_total` (counter): rejected requests by reason
//! - `gateway_active_connections` (gauge): current client connections
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, which is what tests rely on

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe();
            tracing::info!(address = %addr, "Metrics endpoint listening");
        }
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics recorder"),
    }
}

fn describe() {
    metrics::describe_counter!("gateway_exchanges_total", "Exchanges handled, by status and web service status");
    metrics::describe_histogram!(
        "gateway_exchange_duration_seconds",
        metrics::Unit::Seconds,
        "Exchange duration from request head to last byte emitted"
    );
    metrics::describe_counter!("gateway_task_failures_total", "Tasks that failed or panicked");
    metrics::describe_counter!("gateway_condition_errors_total", "Predicate evaluation errors");
    metrics::describe_counter!("gateway_resolve_rejections_total", "Requests rejected before forwarding");
    metrics::describe_gauge!("gateway_active_connections", "Open client connections");
}

pub fn record_exchange(status: u16, web_service_status: &str, elapsed: Duration) {
    metrics::counter!(
        "gateway_exchanges_total",
        "status" => status.to_string(),
        "ws_status" => web_service_status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_exchange_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_task_failure(handler: &str, phase: &str) {
    metrics::counter!(
        "gateway_task_failures_total",
        "handler" => handler.to_string(),
        "phase" => phase.to_string()
    )
    .increment(1);
}

pub fn record_condition_error(class: &str) {
    metrics::counter!("gateway_condition_errors_total", "class" => class.to_string()).increment(1);
}

pub fn record_rejection(reason: &'static str) {
    metrics::counter!("gateway_resolve_rejections_total", "reason" => reason).increment(1);
}

pub fn connection_opened() {
    metrics::gauge!("gateway_active_connections").increment(1.0);
}

pub fn connection_closed() {
    metrics::gauge!("gateway_active_connections").decrement(1.0);
}
