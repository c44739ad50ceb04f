//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): forwarded requests by worker, status
//! - `proxy_request_duration_seconds` (histogram): end-to-end latency, buffering included
//! - `proxy_buffered_requests` (gauge): requests waiting for a live destination
//! - `proxy_buffer_wait_seconds` (histogram): time a flushed request spent buffered
//! - `proxy_reloads_total` (counter): reload events by worker, outcome
//! - `proxy_inspector_sessions` (gauge): open debugger tunnels
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests pay nothing unless `init_metrics` runs.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with an HTTP scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a completed forward.
pub fn record_request(worker: &str, status: u16, start: Instant) {
    counter!(
        "proxy_requests_total",
        "worker" => worker.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds", "worker" => worker.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// Current length of a worker's buffer.
pub fn record_buffered(worker: &str, pending: usize) {
    gauge!("proxy_buffered_requests", "worker" => worker.to_string()).set(pending as f64);
}

/// Time a request spent buffered before a reload released it.
pub fn record_buffer_wait(worker: &str, waited: Duration) {
    histogram!("proxy_buffer_wait_seconds", "worker" => worker.to_string())
        .record(waited.as_secs_f64());
}

/// A reload event was applied (`started`, `completed`) or discarded (`stale`).
pub fn record_reload(worker: &str, outcome: &'static str) {
    counter!(
        "proxy_reloads_total",
        "worker" => worker.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn inspector_session_opened() {
    gauge!("proxy_inspector_sessions").increment(1.0);
}

pub fn inspector_session_closed() {
    gauge!("proxy_inspector_sessions").decrement(1.0);
}
