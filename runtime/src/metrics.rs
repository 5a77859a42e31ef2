//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the lifecycle components:
//! - Status transitions (outcome, error kind, latency)
//! - Concurrency guard skips
//! - Snapshot reconciliation
//! - Push-event filtering and fail-open reads
//!
//! # Example
//!
//! ```rust,no_run
//! use gigmarket_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! if let Some(rendered) = server.render() {
//!     println!("{rendered}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

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

/// Prometheus metrics recorder.
///
/// Installs the global recorder and renders the exposition text for whatever
/// serves the scrape endpoint.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server for `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., by another test), this logs a
    /// warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Address the scrape endpoint is meant to listen on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this instance did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "applications_transitions_total",
        "Completed status transitions by outcome (unchanged, verified, unverified)"
    );
    describe_counter!(
        "applications_transition_errors_total",
        "Failed status transitions by error kind"
    );
    describe_histogram!(
        "applications_transition_duration_seconds",
        "Time taken by a status transition, including verification"
    );
    describe_counter!(
        "applications_guard_skipped_total",
        "Transition attempts skipped because one was already in flight"
    );
    describe_counter!(
        "applications_snapshots_total",
        "Snapshots reconciled, by whether they replaced local state"
    );
    describe_counter!(
        "applications_push_events_total",
        "Change notifications received, by whether they matched the tracked pair"
    );
    describe_counter!(
        "applications_fail_open_reads_total",
        "Tracker reads that failed and were treated as not applied"
    );
}

/// Transition metrics recorder.
pub struct TransitionMetrics;

impl TransitionMetrics {
    /// Record a completed transition.
    pub fn record_outcome(outcome: &'static str, duration: Duration) {
        counter!("applications_transitions_total", "outcome" => outcome).increment(1);
        histogram!("applications_transition_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed transition.
    pub fn record_error(kind: &'static str, duration: Duration) {
        counter!("applications_transition_errors_total", "kind" => kind).increment(1);
        histogram!("applications_transition_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Concurrency guard metrics recorder.
pub struct GuardMetrics;

impl GuardMetrics {
    /// Record a skipped duplicate attempt.
    pub fn record_skipped() {
        counter!("applications_guard_skipped_total").increment(1);
    }
}

/// Reconciliation metrics recorder.
pub struct ReconcileMetrics;

impl ReconcileMetrics {
    /// Record a reconciled snapshot.
    pub fn record_snapshot(replaced: bool) {
        counter!("applications_snapshots_total", "replaced" => if replaced { "true" } else { "false" })
            .increment(1);
    }

    /// Record a change notification.
    pub fn record_push_event(matched: bool) {
        counter!("applications_push_events_total", "matched" => if matched { "true" } else { "false" })
            .increment(1);
    }

    /// Record a read that failed open.
    pub fn record_fail_open() {
        counter!("applications_fail_open_reads_total").increment(1);
    }
}
