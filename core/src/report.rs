//! Crash reporting collaborator.
//!
//! Failures that escape the request lifecycle are forwarded to a
//! [`CrashReporter`]. Delivery (Sentry, a log pipeline, ...) belongs to the
//! implementation; the framework only builds the [`CrashReport`].
//!
//! A process has at most one global reporter. It is installed once at startup
//! with [`install`] and then handed explicitly to whoever reports failures; the
//! framework itself never looks it up implicitly.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Severity of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Client errors (4xx).
    Warning,
    /// Server crashes (5xx).
    Error,
}

impl Severity {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// Who made the failing request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportUser {
    /// User id, when the request was authenticated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Client address, reported only when there is no user id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
}

/// One failure, ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrashReport {
    /// Error type name.
    pub error: String,
    /// Error message.
    pub message: String,
    /// Grouping key, when the failure was fingerprinted.
    pub fingerprint: Option<String>,
    /// Severity.
    pub level: Severity,
    /// Request user.
    pub user: ReportUser,
    /// Indexed tags (`method`, `url`, `status`).
    pub tags: BTreeMap<String, String>,
    /// Free-form extras (`msg`, `reqId`, `userAgent`, failure fields).
    pub extra: Map<String, Value>,
    /// When the failure was reported.
    pub occurred_at: DateTime<Utc>,
}

/// Receives crash reports.
///
/// Implementations must not block; hand the report off and return.
pub trait CrashReporter: Send + Sync {
    /// Deliver a report.
    fn capture(&self, report: CrashReport);
}

/// Drops every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl CrashReporter for NoopReporter {
    fn capture(&self, _report: CrashReport) {}
}

/// Process-level settings attached to every report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReporterSettings {
    /// Deployment environment, e.g. `production`.
    pub environment: String,
    /// Release identifier, e.g. a git hash.
    pub release: Option<String>,
    /// Host name reported with events.
    pub server_name: Option<String>,
}

/// Emits reports as `tracing` events on the `crash_report` target.
///
/// Useful as the default reporter when a log pipeline does the delivery.
#[derive(Debug, Clone, Default)]
pub struct TracingReporter {
    settings: ReporterSettings,
}

impl TracingReporter {
    /// Create a reporter with the given settings.
    #[must_use]
    pub const fn new(settings: ReporterSettings) -> Self {
        Self { settings }
    }
}

impl CrashReporter for TracingReporter {
    fn capture(&self, report: CrashReport) {
        let payload = serde_json::to_string(&report).unwrap_or_default();
        match report.level {
            Severity::Error => tracing::error!(
                target: "crash_report",
                environment = %self.settings.environment,
                release = self.settings.release.as_deref().unwrap_or("unknown"),
                server_name = self.settings.server_name.as_deref().unwrap_or("unknown"),
                error = %report.error,
                report = %payload,
                "Crash report"
            ),
            Severity::Warning => tracing::warn!(
                target: "crash_report",
                environment = %self.settings.environment,
                release = self.settings.release.as_deref().unwrap_or("unknown"),
                server_name = self.settings.server_name.as_deref().unwrap_or("unknown"),
                error = %report.error,
                report = %payload,
                "Crash report"
            ),
        }
    }
}

/// Returned when a global reporter is installed twice.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("a global crash reporter is already installed")]
pub struct AlreadyInstalled;

static GLOBAL_REPORTER: OnceLock<Arc<dyn CrashReporter>> = OnceLock::new();

/// Install the process-wide reporter.
///
/// # Errors
///
/// Returns [`AlreadyInstalled`] if a reporter was installed before; the first
/// one stays in place.
pub fn install(reporter: Arc<dyn CrashReporter>) -> Result<(), AlreadyInstalled> {
    GLOBAL_REPORTER.set(reporter).map_err(|_| AlreadyInstalled)
}

/// Handle to the process-wide reporter, if one was installed.
#[must_use]
pub fn global() -> Option<Arc<dyn CrashReporter>> {
    GLOBAL_REPORTER.get().cloned()
}
