//! # txapi Runtime
//!
//! The transactional request-execution lifecycle.
//!
//! ## Core Components
//!
//! - **Attempt runner** ([`run_in_transaction`]): runs one unit of work against
//!   a [`TransactionalStore`], retrying conflicts with backoff
//! - **Endpoint** ([`TxEndpoint`]): handler plus pre-transaction, pre-commit
//!   and post-commit hooks
//! - **Request lifecycle** ([`RequestLifecycle`]): the state machine tying the
//!   two together, including the commit-or-abort decision
//! - **Failure classifier** ([`FailureClassifier`]): turns escaped failures
//!   into error responses, log records and crash reports
//!
//! ## Example
//!
//! ```ignore
//! use txapi_runtime::{FailureClassifier, RequestLifecycle, TransactionOptions};
//!
//! let lifecycle = RequestLifecycle::new(&store, TransactionOptions::default());
//! let reply = match lifecycle.execute(&mut endpoint).await {
//!     Ok(done) => done.envelope,
//!     Err(err) => classifier.handle(&err, &request_info),
//! };
//! ```

/// Failure classification and crash reporting
pub mod classifier;

/// Endpoint capability trait
pub mod endpoint;

/// Request lifecycle state machine
pub mod lifecycle;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry policy with exponential backoff
pub mod retry;

/// Stack trace trimming
pub mod trace;

/// Transactional store interface and attempt runner
pub mod transaction;

pub use classifier::{CONTENT_TYPE_FINGERPRINT, Classification, FailureClassifier};
pub use endpoint::TxEndpoint;
pub use lifecycle::{Completion, Phase, RequestLifecycle};
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use trace::TraceTrimmer;
pub use transaction::{
    Attempt, AttemptBody, AttemptError, AttemptLog, AttemptOutcome, AttemptRecord, RunOutcome,
    Transaction, TransactionOptions, TransactionalStore, run_in_transaction,
};
