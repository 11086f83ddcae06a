//! Prometheus metrics for observability and monitoring.
//!
//! Covers the query lifecycle, event log writes and the delivery adapters:
//! - Queries started, cancelled, completed and currently active
//! - Events appended by producers, mirrored by the log mirror, failed writes
//! - Cursor poll waits and live sessions
//!
//! # Example
//!
//! ```rust,no_run
//! use querycast_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Render for a /metrics endpoint
//! let body = server.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics recorder with a render handle.
///
/// The address is where the binary serves the rendered metrics.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address the metrics endpoint will be served on
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the metrics endpoint is served on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Describe every metric and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the metrics exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g. by another test), this logs a
    /// warning and succeeds without a render handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("seconds".to_string()),
                &[0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics recorder installed - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder was not installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Query lifecycle
    describe_counter!("querycast.queries.started", "Total number of queries started");
    describe_counter!(
        "querycast.queries.cancelled",
        "Total number of queries cancelled by a client or by shutdown"
    );
    describe_counter!(
        "querycast.queries.completed",
        "Total number of queries that emitted every expected result"
    );
    describe_gauge!("querycast.queries.active", "Queries currently running");
    describe_counter!(
        "querycast.queries.expired",
        "Total number of registry entries removed by the retention sweep"
    );

    // Event log
    describe_counter!(
        "querycast.events.appended",
        "Total number of events appended by producers and the registry"
    );
    describe_counter!(
        "querycast.events.mirrored",
        "Total number of events the log mirror wrote on a producer's behalf"
    );
    describe_counter!(
        "querycast.events.write_failures",
        "Total number of failed event log writes"
    );
    describe_counter!(
        "querycast.source.failures",
        "Total number of result source errors (each stops one worker)"
    );

    // Delivery
    describe_gauge!("querycast.sessions.live", "Open stream and server-push sessions");
    describe_counter!(
        "querycast.cursor.timeouts",
        "Total number of cursor polls that returned a timeout"
    );
    describe_histogram!(
        "querycast.cursor.wait_seconds",
        "Time a cursor poll waited before answering"
    );
}

/// Query lifecycle metrics recorder.
pub struct QueryMetrics;

impl QueryMetrics {
    /// Record a started query.
    pub fn record_started() {
        counter!("querycast.queries.started").increment(1);
        gauge!("querycast.queries.active").increment(1.0);
    }

    /// Record a cancelled query.
    pub fn record_cancelled() {
        counter!("querycast.queries.cancelled").increment(1);
        gauge!("querycast.queries.active").decrement(1.0);
    }

    /// Record a completed query.
    pub fn record_completed() {
        counter!("querycast.queries.completed").increment(1);
        gauge!("querycast.queries.active").decrement(1.0);
    }

    /// Record registry entries removed by the retention sweep.
    pub fn record_expired(count: usize) {
        counter!("querycast.queries.expired").increment(count as u64);
    }
}

/// Event log metrics recorder.
pub struct EventMetrics;

impl EventMetrics {
    /// Record an event written directly to the log.
    pub fn record_append() {
        counter!("querycast.events.appended").increment(1);
    }

    /// Record an event written by the log mirror.
    pub fn record_mirrored() {
        counter!("querycast.events.mirrored").increment(1);
    }

    /// Record a failed log write.
    pub fn record_write_failure() {
        counter!("querycast.events.write_failures").increment(1);
    }

    /// Record a result source error.
    pub fn record_source_failure(source: &str) {
        counter!("querycast.source.failures", "source" => source.to_string()).increment(1);
    }
}

/// Delivery adapter metrics recorder.
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    /// Record a live session opening.
    pub fn record_session_opened() {
        gauge!("querycast.sessions.live").increment(1.0);
    }

    /// Record a live session closing.
    pub fn record_session_closed() {
        gauge!("querycast.sessions.live").decrement(1.0);
    }

    /// Record how long a cursor poll waited, and whether it timed out.
    pub fn record_cursor_wait(waited: Duration, timed_out: bool) {
        histogram!("querycast.cursor.wait_seconds").record(waited.as_secs_f64());
        if timed_out {
            counter!("querycast.cursor.timeouts").increment(1);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert_eq!(server.addr(), addr);
    }

    #[test]
    fn metrics_server_renders_recorded_metrics() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        QueryMetrics::record_started();
        EventMetrics::record_append();
        DeliveryMetrics::record_cursor_wait(Duration::from_millis(500), true);

        // handle is None if another test installed the recorder first
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("querycast_queries_started"));
            assert!(rendered.contains("querycast_events_appended"));
            assert!(rendered.contains("querycast_cursor_timeouts"));
        }
    }
}
