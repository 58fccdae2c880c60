//! Transactional store interface and the attempt runner.
//!
//! A [`TransactionalStore`] hands out one [`Transaction`] per attempt. The
//! runner ([`run_in_transaction`]) drives an [`AttemptBody`] against fresh
//! transactions until one of three things happens:
//!
//! - the body succeeds: the transaction is committed (or, when read-only,
//!   released without committing)
//! - the body returns [`AttemptError::Abort`]: the transaction is rolled back
//!   and the run completes cleanly without committing
//! - the body or the commit fails: retryable conflicts restart the attempt
//!   with backoff until [`RetryPolicy::max_retries`] is exhausted, anything
//!   else is returned immediately
//!
//! Every attempt's transaction is consumed (committed or rolled back) before
//! the runner returns or starts the next attempt, so no handle outlives its
//! attempt.

use smallvec::SmallVec;
use std::fmt;
use std::future::Future;
use txapi_core::ApiError;

use crate::metrics::TransactionMetrics;
use crate::retry::RetryPolicy;

/// One attempt's handle to the underlying data store.
///
/// Dropping a transaction without committing must discard its writes.
pub trait Transaction: Send + 'static {
    /// Make the attempt's writes visible.
    ///
    /// # Errors
    ///
    /// A conflicting concurrent modification must be reported as a retryable
    /// failure ([`ApiError::write_conflict`]).
    fn commit(self) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Discard the attempt's writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the store could not be reached.
    fn rollback(self) -> impl Future<Output = Result<(), ApiError>> + Send;
}

/// A data store with optimistic-concurrency transactions.
pub trait TransactionalStore: Send + Sync {
    /// Per-attempt transaction handle.
    type Tx: Transaction;

    /// Begin a new transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction could be started. Retryable errors
    /// are retried like conflicts raised by the attempt itself.
    fn begin(&self, read_only: bool) -> impl Future<Output = Result<Self::Tx, ApiError>> + Send;
}

/// Options for one transactional run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransactionOptions {
    /// Never commit; fixed for the whole run.
    pub read_only: bool,
    /// Retry and backoff policy for conflicts.
    pub retry: RetryPolicy,
}

impl TransactionOptions {
    /// Options for a read-write run with the given retry policy.
    #[must_use]
    pub const fn new(retry: RetryPolicy) -> Self {
        Self {
            read_only: false,
            retry,
        }
    }

    /// Set the read-only flag.
    #[must_use]
    pub const fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// Identifies the attempt being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based attempt number.
    pub number: u32,
    /// Read-only flag of the run.
    pub read_only: bool,
}

/// How an attempt body stopped without producing a committable value.
#[derive(Debug)]
pub enum AttemptError<T> {
    /// Finish the run with this value without committing. Not retried.
    Abort(T),
    /// The attempt failed; retried if the failure is retryable.
    Failed(ApiError),
}

impl<T> From<ApiError> for AttemptError<T> {
    fn from(err: ApiError) -> Self {
        Self::Failed(err)
    }
}

/// Work performed inside each attempt.
pub trait AttemptBody<S: TransactionalStore>: Send {
    /// Value produced by a successful or aborted attempt.
    type Output: Send;

    /// Run one attempt against `tx`.
    fn run(
        &mut self,
        tx: &mut S::Tx,
        attempt: Attempt,
    ) -> impl Future<Output = Result<Self::Output, AttemptError<Self::Output>>> + Send;
}

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The body succeeded and the transaction committed (or was released, if
    /// read-only).
    Committed,
    /// The body asked to finish without committing.
    Aborted,
    /// A retryable conflict ended the attempt.
    FailedRetryable,
    /// A non-retryable failure ended the attempt.
    FailedFatal,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Committed => "committed",
            Self::Aborted => "aborted",
            Self::FailedRetryable => "failed-retryable",
            Self::FailedFatal => "failed-fatal",
        })
    }
}

/// Record of one resolved attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub number: u32,
    /// Read-only flag of the run.
    pub read_only: bool,
    /// Whether the attempt finished without committing on request.
    pub aborted: bool,
    /// Outcome.
    pub outcome: AttemptOutcome,
}

/// Attempts of one run, in order.
pub type AttemptLog = SmallVec<[AttemptRecord; 4]>;

/// Result of a run that did not fail.
#[derive(Debug)]
pub enum RunOutcome<T> {
    /// The last attempt committed.
    Committed {
        /// Value produced by the last attempt.
        value: T,
        /// All attempts, the last one committed.
        attempts: AttemptLog,
    },
    /// The last attempt aborted; nothing was committed.
    Aborted {
        /// Value carried by the abort.
        value: T,
        /// All attempts, the last one aborted.
        attempts: AttemptLog,
    },
}

impl<T> RunOutcome<T> {
    /// Whether the run committed.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    /// Attempts of the run.
    #[must_use]
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::Committed { attempts, .. } | Self::Aborted { attempts, .. } => attempts,
        }
    }

    /// Split into the value, the attempt log and the committed flag.
    pub fn into_parts(self) -> (T, AttemptLog, bool) {
        match self {
            Self::Committed { value, attempts } => (value, attempts, true),
            Self::Aborted { value, attempts } => (value, attempts, false),
        }
    }
}

enum Resolved<T> {
    Committed(T),
    Aborted(T),
}

/// Run `body` in a transaction, retrying on conflicts.
///
/// At most `options.retry.max_retries + 1` attempts are made. The body for
/// attempt N+1 starts only after attempt N's transaction has been rolled back
/// and the backoff delay has elapsed.
///
/// # Errors
///
/// - the first non-retryable failure, unchanged
/// - [`ApiError::transaction_failed`] wrapping the last conflict once retries
///   are exhausted
pub async fn run_in_transaction<S, B>(
    store: &S,
    options: &TransactionOptions,
    body: &mut B,
) -> Result<RunOutcome<B::Output>, ApiError>
where
    S: TransactionalStore,
    B: AttemptBody<S>,
{
    let mut attempts = AttemptLog::new();
    let mut number: u32 = 0;

    loop {
        number = number.saturating_add(1);
        let attempt = Attempt {
            number,
            read_only: options.read_only,
        };
        TransactionMetrics::record_attempt();

        let failure = match run_attempt(store, body, attempt).await {
            Ok(Resolved::Committed(value)) => {
                attempts.push(record(attempt, AttemptOutcome::Committed));
                TransactionMetrics::record_commit();
                return Ok(RunOutcome::Committed { value, attempts });
            }
            Ok(Resolved::Aborted(value)) => {
                attempts.push(record(attempt, AttemptOutcome::Aborted));
                TransactionMetrics::record_abort();
                tracing::debug!(attempt = number, "Transaction aborted without commit");
                return Ok(RunOutcome::Aborted { value, attempts });
            }
            Err(err) => err,
        };

        if !failure.is_retryable() {
            attempts.push(record(attempt, AttemptOutcome::FailedFatal));
            TransactionMetrics::record_failure("fatal");
            return Err(failure);
        }
        attempts.push(record(attempt, AttemptOutcome::FailedRetryable));

        let retries_used = usize::try_from(number - 1).unwrap_or(usize::MAX);
        if retries_used >= options.retry.max_retries {
            tracing::error!(
                attempts = number,
                error = %failure,
                "Transaction failed after exhausting retries"
            );
            TransactionMetrics::record_failure("exhausted");
            return Err(ApiError::transaction_failed(number, failure));
        }

        let delay = options.retry.backoff(retries_used);
        tracing::warn!(
            attempt = number,
            max_retries = options.retry.max_retries,
            delay_ms = delay.as_millis(),
            error = %failure,
            "Transaction conflict, retrying after delay"
        );
        TransactionMetrics::record_retry();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

async fn run_attempt<S, B>(
    store: &S,
    body: &mut B,
    attempt: Attempt,
) -> Result<Resolved<B::Output>, ApiError>
where
    S: TransactionalStore,
    B: AttemptBody<S>,
{
    let mut tx = store.begin(attempt.read_only).await?;
    let result = body.run(&mut tx, attempt).await;

    match result {
        Ok(value) if attempt.read_only => {
            release(tx).await;
            Ok(Resolved::Committed(value))
        }
        Ok(value) => {
            tx.commit().await?;
            Ok(Resolved::Committed(value))
        }
        Err(AttemptError::Abort(value)) => {
            release(tx).await;
            Ok(Resolved::Aborted(value))
        }
        Err(AttemptError::Failed(err)) => {
            release(tx).await;
            Err(err)
        }
    }
}

/// Roll back, logging instead of failing: the attempt's outcome is already
/// decided and the store discards uncommitted writes anyway.
async fn release<T: Transaction>(tx: T) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "Transaction rollback failed");
    }
}

const fn record(attempt: Attempt, outcome: AttemptOutcome) -> AttemptRecord {
    AttemptRecord {
        number: attempt.number,
        read_only: attempt.read_only,
        aborted: matches!(outcome, AttemptOutcome::Aborted),
        outcome,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Counters {
        begins: AtomicU32,
        commits: AtomicU32,
        rollbacks: AtomicU32,
    }

    struct CountingStore(Arc<Counters>);

    struct CountingTx(Arc<Counters>);

    impl Transaction for CountingTx {
        async fn commit(self) -> Result<(), ApiError> {
            self.0.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn rollback(self) -> Result<(), ApiError> {
            self.0.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl TransactionalStore for CountingStore {
        type Tx = CountingTx;

        async fn begin(&self, _read_only: bool) -> Result<CountingTx, ApiError> {
            self.0.begins.fetch_add(1, Ordering::SeqCst);
            Ok(CountingTx(Arc::clone(&self.0)))
        }
    }

    /// Fails with a conflict for the first `conflicts` attempts.
    struct Flaky {
        conflicts: u32,
        abort: bool,
    }

    impl AttemptBody<CountingStore> for Flaky {
        type Output = u32;

        async fn run(
            &mut self,
            _tx: &mut CountingTx,
            attempt: Attempt,
        ) -> Result<u32, AttemptError<u32>> {
            if attempt.number <= self.conflicts {
                return Err(ApiError::write_conflict("conflict").into());
            }
            if self.abort {
                return Err(AttemptError::Abort(attempt.number));
            }
            Ok(attempt.number)
        }
    }

    fn store() -> (CountingStore, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        (CountingStore(Arc::clone(&counters)), counters)
    }

    #[tokio::test]
    async fn test_commits_once() {
        let (store, counters) = store();
        let options = TransactionOptions::new(RetryPolicy::immediate(3));
        let mut body = Flaky {
            conflicts: 0,
            abort: false,
        };

        let outcome = run_in_transaction(&store, &options, &mut body).await.unwrap();

        assert!(outcome.is_committed());
        assert_eq!(outcome.attempts().len(), 1);
        assert_eq!(counters.commits.load(Ordering::SeqCst), 1);
        assert_eq!(counters.rollbacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retries_then_commits() {
        let (store, counters) = store();
        let options = TransactionOptions::new(RetryPolicy::immediate(3));
        let mut body = Flaky {
            conflicts: 2,
            abort: false,
        };

        let (value, attempts, committed) = run_in_transaction(&store, &options, &mut body)
            .await
            .unwrap()
            .into_parts();

        assert!(committed);
        assert_eq!(value, 3);
        assert_eq!(
            attempts.iter().map(|a| a.outcome).collect::<Vec<_>>(),
            vec![
                AttemptOutcome::FailedRetryable,
                AttemptOutcome::FailedRetryable,
                AttemptOutcome::Committed
            ]
        );
        assert_eq!(counters.begins.load(Ordering::SeqCst), 3);
        assert_eq!(counters.rollbacks.load(Ordering::SeqCst), 2);
        assert_eq!(counters.commits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries() {
        let (store, counters) = store();
        let options = TransactionOptions::new(RetryPolicy::immediate(3));
        let mut body = Flaky {
            conflicts: u32::MAX,
            abort: false,
        };

        let err = run_in_transaction(&store, &options, &mut body)
            .await
            .unwrap_err();

        assert_eq!(err.code(), "TransactionFailedError");
        assert_eq!(counters.begins.load(Ordering::SeqCst), 4);
        assert_eq!(counters.commits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_abort_rolls_back() {
        let (store, counters) = store();
        let options = TransactionOptions::new(RetryPolicy::immediate(3));
        let mut body = Flaky {
            conflicts: 0,
            abort: true,
        };

        let outcome = run_in_transaction(&store, &options, &mut body).await.unwrap();

        assert!(!outcome.is_committed());
        assert!(outcome.attempts()[0].aborted);
        assert_eq!(counters.commits.load(Ordering::SeqCst), 0);
        assert_eq!(counters.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_only_never_commits() {
        let (store, counters) = store();
        let options = TransactionOptions::new(RetryPolicy::immediate(3)).read_only(true);
        let mut body = Flaky {
            conflicts: 0,
            abort: false,
        };

        let outcome = run_in_transaction(&store, &options, &mut body).await.unwrap();

        assert!(outcome.is_committed());
        assert!(outcome.attempts()[0].read_only);
        assert_eq!(counters.commits.load(Ordering::SeqCst), 0);
        assert_eq!(counters.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_retried() {
        struct Broken;

        impl AttemptBody<CountingStore> for Broken {
            type Output = ();

            async fn run(
                &mut self,
                _tx: &mut CountingTx,
                _attempt: Attempt,
            ) -> Result<(), AttemptError<()>> {
                Err(ApiError::internal("boom").into())
            }
        }

        let (store, counters) = store();
        let options = TransactionOptions::new(RetryPolicy::immediate(3));

        let err = run_in_transaction(&store, &options, &mut Broken)
            .await
            .unwrap_err();

        assert_eq!(err.message(), "boom");
        assert_eq!(counters.begins.load(Ordering::SeqCst), 1);
        assert_eq!(counters.rollbacks.load(Ordering::SeqCst), 1);
    }
}
