//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Install a Prometheus-compatible metrics endpoint
//! - Count classified connections, loop exits and shutdowns
//!
//! # Metrics
//! - `foundation_demux_connections_total` (counter): by `protocol` (rpc, http, unmatched)
//! - `foundation_loop_exits_total` (counter): by `loop` and `clean`
//! - `foundation_shutdowns_total` (counter): by `cause`
//!
//! Every series carries a `service` label holding the sanitized service name.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::net::listener::normalize_address;

/// Default exporter address when none is configured.
pub const DEFAULT_METRICS_ADDRESS: &str = ":9090";

/// Error returned when the exporter cannot be installed.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("invalid metrics address '{0}'")]
    Address(String),

    #[error("failed to install prometheus exporter: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}

/// Install the Prometheus exporter, serving `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn install_prometheus_exporter(service_name: &str, addr: Option<&str>) -> Result<(), MetricsError> {
    let addr = addr.filter(|a| !a.is_empty()).unwrap_or(DEFAULT_METRICS_ADDRESS);
    let socket: SocketAddr = normalize_address(addr)
        .parse()
        .map_err(|_| MetricsError::Address(addr.to_string()))?;

    PrometheusBuilder::new()
        .with_http_listener(socket)
        .add_global_label("service", sanitize_name(service_name))
        .install()?;

    tracing::info!(address = %socket, "Prometheus exporter listening");
    Ok(())
}

/// Replace every character that is not a word character with `_`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

pub fn record_connection(protocol: &'static str) {
    metrics::counter!("foundation_demux_connections_total", "protocol" => protocol).increment(1);
}

pub fn record_loop_exit(loop_name: &'static str, clean: bool) {
    metrics::counter!(
        "foundation_loop_exits_total",
        "loop" => loop_name,
        "clean" => if clean { "true" } else { "false" }
    )
    .increment(1);
}

pub fn record_shutdown(cause: &'static str) {
    metrics::counter!("foundation_shutdowns_total", "cause" => cause).increment(1);
}
