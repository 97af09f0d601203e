//! Metrics collection and export for the relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::Result;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const SESSIONS_TOTAL: &str = "switchyard_sessions_total";
    pub const SESSIONS_ACTIVE: &str = "switchyard_sessions_active";
    pub const FRAMES_TOTAL: &str = "switchyard_frames_total";
    pub const FRAMES_BYTES: &str = "switchyard_frames_bytes";
    pub const TOPICS_ACTIVE: &str = "switchyard_topics_active";
    pub const SUBSCRIPTIONS_TOTAL: &str = "switchyard_subscriptions_total";
    pub const FANOUT: &str = "switchyard_publish_fanout";
    pub const LATENCY_SECONDS: &str = "switchyard_latency_seconds";
    pub const ERRORS_TOTAL: &str = "switchyard_errors_total";
}

/// Describe every metric.
pub fn init_metrics() {
    metrics::describe_counter!(names::SESSIONS_TOTAL, "Total number of sessions since start");
    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Current number of sessions");
    metrics::describe_counter!(names::FRAMES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(names::FRAMES_BYTES, "Total bytes of frames processed");
    metrics::describe_gauge!(names::TOPICS_ACTIVE, "Topics with at least one subscriber");
    metrics::describe_counter!(names::SUBSCRIPTIONS_TOTAL, "Total number of topic subscriptions");
    metrics::describe_histogram!(names::FANOUT, "Sessions reached per publish");
    metrics::describe_histogram!(names::LATENCY_SECONDS, "Inbound frame processing latency in seconds");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus exporter.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new().with_http_listener(addr).install()?;

    info!(addr = %addr, "Metrics server listening");
    Ok(())
}

/// Record a frame.
pub fn record_frame(bytes: usize, direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
    counter!(names::FRAMES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record inbound processing latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record a subscription.
pub fn record_subscription() {
    counter!(names::SUBSCRIPTIONS_TOTAL).increment(1);
}

/// Record how many sessions a publish reached.
pub fn record_fanout(recipients: usize) {
    histogram!(names::FANOUT).record(recipients as f64);
}

/// Update the active topic count.
pub fn set_active_topics(count: usize) {
    gauge!(names::TOPICS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(kind: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => kind).increment(1);
}

/// Records a session on creation and its end on drop.
pub struct SessionMetricsGuard;

impl SessionMetricsGuard {
    /// Record a new session.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::SESSIONS_TOTAL).increment(1);
        gauge!(names::SESSIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for SessionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::SESSIONS_ACTIVE).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder() {
        // Without an installed recorder every call is a no-op.
        let _guard = SessionMetricsGuard::new();
        record_frame(10, "inbound");
        record_fanout(3);
        record_error("test");
    }
}
