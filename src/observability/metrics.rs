//! Metrics collection and exposition.
//!
//! # Metrics
//! - `egress_requests_total` (counter): completed requests by method, status, route
//! - `egress_request_duration_seconds` (histogram): dispatch to response headers
//! - `egress_failures_total` (counter): failed requests by kind
//! - `egress_route_decisions_total` (counter): planned routes by kind
//! - `egress_denied_total` (counter): requests rejected by an access list
//! - `egress_pool_wait_seconds` (histogram): time spent waiting for a pooled connection
//! - `egress_connections_leased` (gauge): connections currently borrowed
//!
//! Recording is a no-op until a recorder is installed.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

pub const REQUESTS_TOTAL: &str = "egress_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "egress_request_duration_seconds";
pub const FAILURES_TOTAL: &str = "egress_failures_total";
pub const ROUTE_DECISIONS_TOTAL: &str = "egress_route_decisions_total";
pub const DENIED_TOTAL: &str = "egress_denied_total";
pub const POOL_WAIT_SECONDS: &str = "egress_pool_wait_seconds";
pub const CONNECTIONS_LEASED: &str = "egress_connections_leased";

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, route: &'static str, start: Instant) {
    counter!(
        REQUESTS_TOTAL,
        "method" => method.to_owned(),
        "status" => status.to_string(),
        "route" => route
    )
    .increment(1);
    histogram!(REQUEST_DURATION_SECONDS, "route" => route).record(start.elapsed().as_secs_f64());
}

pub fn record_failure(kind: &'static str) {
    counter!(FAILURES_TOTAL, "kind" => kind).increment(1);
}

pub fn record_route(route: &'static str) {
    counter!(ROUTE_DECISIONS_TOTAL, "route" => route).increment(1);
}

pub fn record_denied() {
    counter!(DENIED_TOTAL).increment(1);
}

pub fn record_pool_wait(start: Instant) {
    histogram!(POOL_WAIT_SECONDS).record(start.elapsed().as_secs_f64());
}

pub fn connection_leased() {
    gauge!(CONNECTIONS_LEASED).increment(1.0);
}

pub fn connection_released() {
    gauge!(CONNECTIONS_LEASED).decrement(1.0);
}
