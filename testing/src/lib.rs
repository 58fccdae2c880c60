//! # txapi Testing
//!
//! Testing utilities for the transactional request lifecycle.
//!
//! This crate provides:
//! - [`InMemoryStore`]: an optimistic-concurrency store with conflict injection
//! - [`RecordingReporter`]: a crash reporter that keeps what it receives
//! - [`HookCalls`]: counters for endpoint hook invocations
//! - Fixtures for request metadata and transaction options
//!
//! ## Example
//!
//! ```ignore
//! use txapi_testing::{InMemoryStore, instant_options};
//! use txapi_runtime::RequestLifecycle;
//!
//! #[tokio::test]
//! async fn test_retry_then_commit() {
//!     let store = InMemoryStore::new();
//!     store.inject_conflicts(2);
//!
//!     let lifecycle = RequestLifecycle::new(&store, instant_options(3));
//!     let done = lifecycle.execute(&mut MyEndpoint::default()).await.unwrap();
//!
//!     assert_eq!(store.commits(), 1);
//!     assert_eq!(done.attempts.len(), 3);
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use txapi_core::RequestInfo;
use txapi_runtime::{RetryPolicy, TransactionOptions};

/// In-memory transactional store
pub mod store;

/// Recording crash reporter
pub mod reporter;

pub use reporter::RecordingReporter;
pub use store::{InMemoryStore, InMemoryTx};

/// Invocation counters for the handler and the three hooks.
///
/// Cloning shares the counters.
#[derive(Debug, Clone, Default)]
pub struct HookCalls {
    inner: Arc<Counts>,
}

#[derive(Debug, Default)]
struct Counts {
    pre_tx: AtomicU32,
    handler: AtomicU32,
    pre_commit: AtomicU32,
    post_commit: AtomicU32,
}

impl HookCalls {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a pre-transaction hook call.
    pub fn pre_tx(&self) {
        self.inner.pre_tx.fetch_add(1, Ordering::SeqCst);
    }

    /// Count a handler call.
    pub fn handler(&self) {
        self.inner.handler.fetch_add(1, Ordering::SeqCst);
    }

    /// Count a pre-commit hook call.
    pub fn pre_commit(&self) {
        self.inner.pre_commit.fetch_add(1, Ordering::SeqCst);
    }

    /// Count a post-commit hook call.
    pub fn post_commit(&self) {
        self.inner.post_commit.fetch_add(1, Ordering::SeqCst);
    }

    /// Pre-transaction hook calls so far.
    #[must_use]
    pub fn pre_tx_calls(&self) -> u32 {
        self.inner.pre_tx.load(Ordering::SeqCst)
    }

    /// Handler calls so far.
    #[must_use]
    pub fn handler_calls(&self) -> u32 {
        self.inner.handler.load(Ordering::SeqCst)
    }

    /// Pre-commit hook calls so far.
    #[must_use]
    pub fn pre_commit_calls(&self) -> u32 {
        self.inner.pre_commit.load(Ordering::SeqCst)
    }

    /// Post-commit hook calls so far.
    #[must_use]
    pub fn post_commit_calls(&self) -> u32 {
        self.inner.post_commit.load(Ordering::SeqCst)
    }
}

/// Read-write transaction options that retry `max_retries` times without
/// waiting.
#[must_use]
pub const fn instant_options(max_retries: usize) -> TransactionOptions {
    TransactionOptions::new(RetryPolicy::immediate(max_retries))
}

/// Request metadata for a `POST` to `url`.
#[must_use]
pub fn request_info(url: &str) -> RequestInfo {
    RequestInfo::new("POST", url).with_id("test-request")
}

/// Install a test-friendly tracing subscriber. Safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
