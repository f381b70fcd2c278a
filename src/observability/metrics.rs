//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, pending/stuck requests, connections)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-endpoint connection and health gauges
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_pending_requests` (gauge): requests waiting for or bound to a backend connection
//! - `proxy_stuck_requests_total` (counter): requests killed by the reaper
//! - `proxy_endpoint_connections` (gauge): pooled connections by endpoint, state
//! - `proxy_backend_health` (gauge): 1=reachable, 0=unreachable
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, which keeps unit tests silent

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::pool::EndpointKey;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a completed proxied request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    ::metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("proxy_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn pending_request_added() {
    ::metrics::gauge!("proxy_pending_requests").increment(1.0);
}

pub fn pending_request_removed() {
    ::metrics::gauge!("proxy_pending_requests").decrement(1.0);
}

pub fn record_stuck_request() {
    ::metrics::counter!("proxy_stuck_requests_total").increment(1);
}

/// Publish the idle and borrowed connection counts of one endpoint.
pub fn record_endpoint_connections(key: &EndpointKey, idle: usize, borrowed: usize) {
    ::metrics::gauge!(
        "proxy_endpoint_connections",
        "endpoint" => key.to_string(),
        "state" => "idle"
    )
    .set(idle as f64);
    ::metrics::gauge!(
        "proxy_endpoint_connections",
        "endpoint" => key.to_string(),
        "state" => "borrowed"
    )
    .set(borrowed as f64);
}

pub fn record_backend_health(key: &EndpointKey, reachable: bool) {
    ::metrics::gauge!("proxy_backend_health", "endpoint" => key.to_string())
        .set(if reachable { 1.0 } else { 0.0 });
}
