//! Metrics collection and exposition.
//!
//! # Metrics
//! - `scrape_trigger_requests_total` (counter): trigger calls by path, outcome
//! - `scrape_trigger_duration_seconds` (histogram): trigger handling latency
//! - `scrape_store_retries_total` (counter): store retries by operation
//! - `scrape_dispatch_total` (counter): detached scraper calls by outcome
//! - `scrape_circuit_state` (gauge): 0=closed, 1=open, 2=half-open

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::CircuitState;

/// Start the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a handled trigger request.
pub fn record_trigger(path: &'static str, outcome: &'static str, start: Instant) {
    metrics::counter!("scrape_trigger_requests_total", "path" => path, "outcome" => outcome)
        .increment(1);
    metrics::histogram!("scrape_trigger_duration_seconds", "path" => path)
        .record(start.elapsed().as_secs_f64());
}

/// Record one retry of a store operation.
pub fn record_store_retry(operation: &'static str) {
    metrics::counter!("scrape_store_retries_total", "operation" => operation).increment(1);
}

/// Record the result of a detached scraper dispatch.
pub fn record_dispatch(outcome: &'static str) {
    metrics::counter!("scrape_dispatch_total", "outcome" => outcome).increment(1);
}

/// Publish a breaker state change.
pub fn record_circuit_state(circuit: &'static str, state: CircuitState) {
    metrics::gauge!("scrape_circuit_state", "circuit" => circuit).set(state.as_gauge());
}
