//! Prometheus metrics for the counter and reservation engine.
//!
//! Engine components emit through the `metrics` facade; nothing is recorded
//! until [`MetricsServer::start`] installs the Prometheus exporter.
//!
//! # Example
//!
//! ```rust,no_run
//! use neighborly_engine::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use thiserror::Error;

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

/// Prometheus scrape endpoint.
pub struct MetricsServer {
    addr: SocketAddr,
    started: bool,
}

impl MetricsServer {
    /// Create a server that will listen on `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            started: false,
        }
    }

    /// Register metric descriptions and start the HTTP listener.
    ///
    /// Must be called from inside a Tokio runtime; the listener runs as a
    /// background task on it.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or a recorder is
    /// already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        if self.started {
            return Ok(());
        }

        register_metrics();

        PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        self.started = true;
        tracing::info!(addr = %self.addr, "Metrics available at http://{}/metrics", self.addr);
        Ok(())
    }

    /// Whether the exporter is running.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started
    }
}

fn register_metrics() {
    // Likes
    describe_counter!("likes.added", "Likes accepted");
    describe_counter!("likes.removed", "Likes withdrawn");
    describe_counter!(
        "likes.compensations",
        "Counter updates rolled back after the full projection failed"
    );

    // Reservations
    describe_counter!(
        "reservations.attempts",
        "Cache-side reservation attempts, labelled by outcome"
    );
    describe_counter!(
        "reservations.enqueue_failed",
        "Reservations confirmed in the cache whose message could not be enqueued"
    );

    // Reconciliation
    describe_counter!("reconcile.ticks", "Reconciliation ticks run");
    describe_counter!("reconcile.failures", "Reconciliation batches or scans that failed");
    describe_counter!(
        "reconcile.clamped",
        "Negative counters written as zero, labelled by subject"
    );
    describe_counter!(
        "reconcile.rows_written",
        "Counter rows written to the durable store, labelled by table"
    );
    describe_histogram!(
        "reconcile.duration_seconds",
        "Time taken by one reconciliation tick"
    );

    // Consumer
    describe_counter!(
        "consumer.messages",
        "Reservation messages drained, labelled by outcome"
    );
    describe_counter!("consumer.windows", "Consumer windows started");
}
