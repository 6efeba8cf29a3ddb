//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_routed_total` (counter): requests forwarded to a logic module
//! - `gateway_route_not_found_total` (counter): requests answered with ROUTE_NOT_FOUND
//! - `gateway_send_failures_total` (counter): failed one-way sends, by `kind`
//! - `gateway_region_candidates` (gauge): selectable proxies per `route`
//! - `gateway_registered_modules` (gauge): registered modules per `kind`
//! - `client_active_connections` (gauge): ACTIVE gateway connections of a module

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::protocol::{ModuleKind, RouteKey};

/// Install the Prometheus exporter with its own HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_routed() {
    counter!("gateway_requests_routed_total").increment(1);
}

pub fn record_route_not_found() {
    counter!("gateway_route_not_found_total").increment(1);
}

/// `kind` is one of `forward`, `not_found`, `response`.
pub fn record_send_failure(kind: &'static str) {
    counter!("gateway_send_failures_total", "kind" => kind).increment(1);
}

pub fn record_region_candidates(route_key: RouteKey, candidates: usize) {
    gauge!("gateway_region_candidates", "route" => route_key.to_string()).set(candidates as f64);
}

pub fn record_registered_modules(kind: ModuleKind, count: usize) {
    gauge!("gateway_registered_modules", "kind" => kind.to_string()).set(count as f64);
}

pub fn record_active_gateways(count: usize) {
    gauge!("client_active_connections").set(count as f64);
}
