//! Crash reporter that keeps every report for assertions.

use std::sync::{Arc, Mutex, PoisonError};
use txapi_core::{CrashReport, CrashReporter};

/// Records crash reports in memory.
///
/// Cloning shares the recorded reports, so a clone can be handed to the code
/// under test while the original is kept for assertions.
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    reports: Arc<Mutex<Vec<CrashReport>>>,
}

impl RecordingReporter {
    /// Create an empty reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All reports so far, oldest first.
    #[must_use]
    pub fn reports(&self) -> Vec<CrashReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recent report.
    #[must_use]
    pub fn last(&self) -> Option<CrashReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    /// Number of reports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget all reports.
    pub fn clear(&self) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl CrashReporter for RecordingReporter {
    fn capture(&self, report: CrashReport) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report);
    }
}
