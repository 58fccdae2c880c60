//! Shared application state.

use std::sync::Arc;
use txapi_core::CrashReporter;
use txapi_runtime::{FailureClassifier, TransactionOptions};

use crate::config::AppConfig;

/// State shared by every route: the store, the default transaction options
/// and the failure classifier.
///
/// Cheap to clone.
pub struct AppState<S> {
    inner: Arc<Inner<S>>,
}

struct Inner<S> {
    store: S,
    config: AppConfig,
    defaults: TransactionOptions,
    classifier: FailureClassifier,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> AppState<S> {
    /// Build state from a store and configuration, reporting crashes to the
    /// reporter the configuration selects.
    #[must_use]
    pub fn new(store: S, config: AppConfig) -> Self {
        let reporter = config.error_reporting.reporter();
        Self::with_reporter(store, config, reporter)
    }

    /// Build state with an explicit crash reporter.
    #[must_use]
    pub fn with_reporter(store: S, config: AppConfig, reporter: Arc<dyn CrashReporter>) -> Self {
        let verbose = config.logging.report_error_detail;
        if verbose {
            txapi_core::error::force_trace_capture(true);
        }
        let classifier = FailureClassifier::new(reporter).verbose(verbose);
        let defaults = config.transactions.options();

        Self {
            inner: Arc::new(Inner {
                store,
                config,
                defaults,
                classifier,
            }),
        }
    }

    /// The transactional store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// The configuration the state was built from.
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    /// Default transaction options.
    #[must_use]
    pub fn defaults(&self) -> &TransactionOptions {
        &self.inner.defaults
    }

    /// The failure classifier.
    #[must_use]
    pub fn classifier(&self) -> &FailureClassifier {
        &self.inner.classifier
    }
}
