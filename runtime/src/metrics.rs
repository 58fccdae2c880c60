//! Prometheus metrics for the request lifecycle.
//!
//! Counters cover every attempt outcome of the transaction runner and every
//! failure that reaches the classifier:
//! - Attempts, commits, business-aborts and retries
//! - Fatal transaction failures by reason
//! - Classified request failures by class (client error or crash)
//! - End-to-end lifecycle duration
//!
//! Recording goes through the `metrics` facade, so it is a no-op until a
//! recorder is installed.
//!
//! # Example
//!
//! ```rust,no_run
//! use txapi_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! if let Some(body) = server.render() {
//!     println!("{body}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

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

/// Prometheus metrics recorder handle.
///
/// The address is where the embedding application serves the rendered output.
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

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// A recorder that is already installed (e.g. by another test) is not an
    /// error; [`MetricsServer::render`] then returns `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
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

    /// Address the metrics are meant to be served on.
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

fn register_metrics() {
    describe_counter!(
        "txapi_transaction_attempts_total",
        "Total number of transaction attempts started"
    );
    describe_counter!(
        "txapi_transaction_commits_total",
        "Total number of attempts that committed"
    );
    describe_counter!(
        "txapi_transaction_aborts_total",
        "Total number of attempts that completed without committing"
    );
    describe_counter!(
        "txapi_transaction_retries_total",
        "Total number of attempts restarted after a retryable conflict"
    );
    describe_counter!(
        "txapi_transaction_failures_total",
        "Total number of transaction runs that failed, by reason"
    );
    describe_counter!(
        "txapi_request_failures_total",
        "Total number of classified request failures, by class"
    );
    describe_histogram!(
        "txapi_lifecycle_duration_seconds",
        "Time taken to run a request lifecycle"
    );
}

/// Transaction runner metrics recorder.
pub struct TransactionMetrics;

impl TransactionMetrics {
    /// Record an attempt being started.
    pub fn record_attempt() {
        counter!("txapi_transaction_attempts_total").increment(1);
    }

    /// Record a committed attempt.
    pub fn record_commit() {
        counter!("txapi_transaction_commits_total").increment(1);
    }

    /// Record a business-abort.
    pub fn record_abort() {
        counter!("txapi_transaction_aborts_total").increment(1);
    }

    /// Record a retry after a conflict.
    pub fn record_retry() {
        counter!("txapi_transaction_retries_total").increment(1);
    }

    /// Record a fatal run failure (`exhausted` or `fatal`).
    pub fn record_failure(reason: &'static str) {
        counter!("txapi_transaction_failures_total", "reason" => reason).increment(1);
    }
}

/// Request lifecycle metrics recorder.
pub struct LifecycleMetrics;

impl LifecycleMetrics {
    /// Record a completed lifecycle.
    pub fn record_duration(duration: Duration) {
        histogram!("txapi_lifecycle_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a classified failure (`client_error` or `crash`).
    pub fn record_failure(class: &'static str) {
        counter!("txapi_request_failures_total", "class" => class).increment(1);
    }
}
