//! Telemetry module for the gateway
//!
//! Prometheus metrics for the HTTP surface, the proxy executors, and the
//! audit pipeline. Metrics register lazily on first touch and are exposed
//! on /metrics.

use crate::{GatewayError, Result};
use once_cell::sync::Lazy;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, IntGaugeVec, TextEncoder,
    register_counter_vec, register_histogram_vec, register_int_counter, register_int_gauge_vec,
};

/// HTTP requests total counter
static HTTP_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mcpgw_http_requests_total",
        "Total number of HTTP requests received",
        &["path", "method", "code"]
    )
    .unwrap()
});

/// HTTP request duration histogram
static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        HistogramOpts::new(
            "mcpgw_http_request_duration_seconds",
            "Duration of HTTP requests in seconds"
        ),
        &["path", "method"]
    )
    .unwrap()
});

/// In-flight proxied requests per upstream
static PROXY_IN_FLIGHT: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "mcpgw_proxy_in_flight",
        "Requests currently being proxied, per upstream server",
        &["server"]
    )
    .unwrap()
});

/// Upstream call duration histogram
static UPSTREAM_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        HistogramOpts::new(
            "mcpgw_upstream_duration_seconds",
            "Duration of upstream calls in seconds"
        ),
        &["server", "transport"]
    )
    .unwrap()
});

/// Audit records dropped because the queue was full
static AUDIT_DROPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "mcpgw_audit_dropped_total",
        "Audit records dropped due to queue overflow"
    )
    .unwrap()
});

/// Record an HTTP request with its normalized path
pub fn record_http_request(path: &str, method: &str, status_code: u16) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[path, method, &status_code.to_string()])
        .inc();
}

/// Record HTTP request duration against the normalized path
pub fn record_http_duration(path: &str, method: &str, duration_secs: f64) {
    HTTP_REQUEST_DURATION
        .with_label_values(&[path, method])
        .observe(duration_secs);
}

/// RAII guard bumping the per-upstream in-flight gauge
pub struct InFlightGuard {
    server: String,
}

impl InFlightGuard {
    pub fn new(server: &str) -> Self {
        PROXY_IN_FLIGHT.with_label_values(&[server]).inc();
        Self {
            server: server.to_string(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        PROXY_IN_FLIGHT.with_label_values(&[&self.server]).dec();
    }
}

/// Record an upstream call duration
pub fn record_upstream_duration(server: &str, transport: &str, duration_secs: f64) {
    UPSTREAM_DURATION
        .with_label_values(&[server, transport])
        .observe(duration_secs);
}

/// Count a dropped audit record
pub fn record_audit_dropped() {
    AUDIT_DROPPED_TOTAL.inc();
}

/// Current value of the audit drop counter (used by tests)
pub fn audit_dropped_total() -> u64 {
    AUDIT_DROPPED_TOTAL.get()
}

/// Render all registered metrics in Prometheus text format
pub fn get_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .map_err(|e| GatewayError::internal(format!("failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| GatewayError::internal(format!("metrics are not valid UTF-8: {}", e)))
}
