//! Metrics collection and export for Chatline.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "chatline_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "chatline_connections_active";
    pub const MESSAGES_TOTAL: &str = "chatline_messages_total";
    pub const HISTORY_MESSAGES: &str = "chatline_history_messages";
    pub const ERRORS_TOTAL: &str = "chatline_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of event-stream connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of live event-stream connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages routed");
    metrics::describe_gauge!(
        names::HISTORY_MESSAGES,
        "Current number of messages held in chat history"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of rejected posts");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a routed message. `kind` is chat/raw/object, `target` is
/// broadcast/direct.
pub fn record_message(kind: &'static str, target: &'static str) {
    counter!(names::MESSAGES_TOTAL, "kind" => kind, "target" => target).increment(1);
}

/// Update the history size gauge.
pub fn set_history_messages(count: usize) {
    gauge!(names::HISTORY_MESSAGES).set(count as f64);
}

/// Record a rejected post.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}
