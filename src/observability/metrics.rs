//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bridge_requests_total` (counter): requests by kind and status
//! - `bridge_request_duration_seconds` (histogram): time to response headers
//! - `bridge_websocket_sessions_active` (gauge): open grpc-websockets sessions
//! - `bridge_upstream_errors_total` (counter): failed upstream calls

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::bridge::RequestKind;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a completed dispatch.
pub fn record_request(kind: RequestKind, status: u16, start: Instant) {
    counter!(
        "bridge_requests_total",
        "kind" => kind.as_str(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("bridge_request_duration_seconds", "kind" => kind.as_str())
        .record(start.elapsed().as_secs_f64());
}

/// Record a failed call to the upstream gRPC server.
pub fn record_upstream_error() {
    counter!("bridge_upstream_errors_total").increment(1);
}

/// Tracks one open grpc-websockets session for its lifetime.
#[derive(Debug)]
pub struct WebSocketSession {
    _private: (),
}

impl WebSocketSession {
    pub fn open() -> Self {
        gauge!("bridge_websocket_sessions_active").increment(1.0);
        Self { _private: () }
    }
}

impl Drop for WebSocketSession {
    fn drop(&mut self) {
        gauge!("bridge_websocket_sessions_active").decrement(1.0);
    }
}
