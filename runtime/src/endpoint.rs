//! Capability interface implemented by transactional endpoints.
//!
//! An endpoint supplies the handler ([`TxEndpoint::compute_response`]) and
//! may override any of the three hooks. Defaults are identities: a hook that
//! is not overridden passes the response data through unchanged.
//!
//! | hook | runs | inside a transaction |
//! |---|---|---|
//! | `pre_tx_start` | once per request, before the first attempt | no |
//! | `compute_response` | once per attempt | yes |
//! | `pre_commit` | once per attempt whose status is still below 400 | yes |
//! | `post_commit` | once per request, after a successful run | no |
//!
//! The transaction handle is passed explicitly to the hooks that run inside
//! an attempt and is gone by the time `post_commit` runs.

use serde_json::Value;
use std::future::Future;
use txapi_core::{ApiError, Flow, ResponseEnvelope};

use crate::transaction::{TransactionOptions, TransactionalStore};

/// A request handler with transactional lifecycle hooks.
///
/// # Example
///
/// ```rust
/// use txapi_core::{ApiError, Flow, ResponseEnvelope};
/// use txapi_runtime::{TransactionalStore, TxEndpoint};
/// use serde_json::json;
///
/// struct Ping;
///
/// impl<S: TransactionalStore> TxEndpoint<S> for Ping {
///     async fn compute_response(
///         &mut self,
///         _tx: &mut S::Tx,
///         _reply: &mut ResponseEnvelope,
///     ) -> Result<Flow, ApiError> {
///         Ok(Flow::Continue(json!({"pong": true})))
///     }
/// }
/// ```
pub trait TxEndpoint<S: TransactionalStore>: Send {
    /// Whether the endpoint only reads. Read-only runs never commit.
    ///
    /// Decided once, before the first attempt.
    fn read_only(&self) -> bool {
        true
    }

    /// Transaction options for this request, derived from the process
    /// defaults.
    fn transaction_options(&self, defaults: &TransactionOptions) -> TransactionOptions {
        defaults.clone().read_only(self.read_only())
    }

    /// Non-transactional preparation, run once before the first attempt.
    ///
    /// Use it for slow work (network calls, expensive computation) that
    /// should not widen the transaction's contention window.
    ///
    /// # Errors
    ///
    /// Any error fails the request immediately; nothing is retried.
    fn pre_tx_start(&mut self) -> impl Future<Output = Result<(), ApiError>> + Send {
        async { Ok(()) }
    }

    /// The handler. Produces the response data for one attempt.
    ///
    /// May set a status on `reply`; a status of 400 or above prevents the
    /// attempt from committing.
    ///
    /// # Errors
    ///
    /// Retryable errors restart the attempt; others fail the request.
    fn compute_response(
        &mut self,
        tx: &mut S::Tx,
        reply: &mut ResponseEnvelope,
    ) -> impl Future<Output = Result<Flow, ApiError>> + Send;

    /// Last chance to change the response before commit.
    ///
    /// # Errors
    ///
    /// Same as [`TxEndpoint::compute_response`].
    fn pre_commit(
        &mut self,
        _tx: &mut S::Tx,
        _reply: &mut ResponseEnvelope,
        data: Value,
    ) -> impl Future<Output = Result<Flow, ApiError>> + Send {
        async move { Ok(Flow::Continue(data)) }
    }

    /// Side effects after a successful commit. Runs exactly once.
    ///
    /// # Errors
    ///
    /// Fails the request; the committed writes stay committed.
    fn post_commit(
        &mut self,
        _reply: &mut ResponseEnvelope,
        data: Value,
    ) -> impl Future<Output = Result<Flow, ApiError>> + Send {
        async move { Ok(Flow::Continue(data)) }
    }
}
