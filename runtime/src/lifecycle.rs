//! The transactional request lifecycle.
//!
//! ```text
//! INIT -> PRE_TX -> ATTEMPTING(n) -> HANDLER -> PRE_COMMIT -> COMMIT -> COMMITTED -> POST_COMMIT -> DONE
//!                        ^                                 \-> ABORTED -----------------------------/
//!                        '-- retryable conflict --'
//! ```
//!
//! `FAILED` is reachable from every phase. The phase a failure happened in is
//! attached to it as the `phase` extra field.
//!
//! Each attempt gets a fresh [`ResponseEnvelope`]. After the handler (and
//! pre-commit hook) ran, an envelope with status 400 or above turns the
//! attempt into a business-abort: the runner rolls the transaction back and
//! the envelope is returned as the response, without retry and without the
//! post-commit hook.
//!
//! A finalized envelope is terminal. Later hooks still run, but their results
//! are discarded and the commit decision follows the finalized status.

use std::fmt;
use std::time::Instant;
use txapi_core::{ApiError, Flow, ResponseEnvelope, Value};

use crate::endpoint::TxEndpoint;
use crate::metrics::LifecycleMetrics;
use crate::transaction::{
    Attempt, AttemptBody, AttemptError, AttemptLog, TransactionOptions, TransactionalStore,
    run_in_transaction,
};

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Request received.
    Init,
    /// Running the pre-transaction hook.
    PreTx,
    /// Beginning attempt N.
    Attempting(u32),
    /// Running the handler.
    Handler,
    /// Running the pre-commit hook.
    PreCommit,
    /// Committing the transaction.
    Commit,
    /// The run committed.
    Committed,
    /// The run finished without committing.
    Aborted,
    /// Running the post-commit hook.
    PostCommit,
    /// Response produced.
    Done,
    /// A failure escaped the lifecycle.
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("init"),
            Self::PreTx => f.write_str("pre_tx"),
            Self::Attempting(n) => write!(f, "attempting({n})"),
            Self::Handler => f.write_str("handler"),
            Self::PreCommit => f.write_str("pre_commit"),
            Self::Commit => f.write_str("commit"),
            Self::Committed => f.write_str("committed"),
            Self::Aborted => f.write_str("aborted"),
            Self::PostCommit => f.write_str("post_commit"),
            Self::Done => f.write_str("done"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Result of a lifecycle that did not fail.
#[derive(Debug)]
pub struct Completion {
    /// Final, finalized response.
    pub envelope: ResponseEnvelope,
    /// Transaction attempts, in order.
    pub attempts: AttemptLog,
    /// Whether the run finished without committing (business-abort).
    pub aborted: bool,
}

/// Runs endpoints through the transactional lifecycle against one store.
#[derive(Debug)]
pub struct RequestLifecycle<'s, S> {
    store: &'s S,
    defaults: TransactionOptions,
}

impl<'s, S: TransactionalStore> RequestLifecycle<'s, S> {
    /// Create a lifecycle using `defaults` as the base transaction options.
    #[must_use]
    pub const fn new(store: &'s S, defaults: TransactionOptions) -> Self {
        Self { store, defaults }
    }

    /// Serve one request.
    ///
    /// # Errors
    ///
    /// Returns the failure that ended the request, tagged with the phase it
    /// happened in. Business-aborts and early exits are not errors.
    pub async fn execute<E: TxEndpoint<S>>(&self, endpoint: &mut E) -> Result<Completion, ApiError> {
        let started = Instant::now();
        let result = self.drive(endpoint).await;
        LifecycleMetrics::record_duration(started.elapsed());
        result
    }

    async fn drive<E: TxEndpoint<S>>(&self, endpoint: &mut E) -> Result<Completion, ApiError> {
        enter(Phase::Init);
        let options = endpoint.transaction_options(&self.defaults);

        enter(Phase::PreTx);
        if let Err(e) = endpoint.pre_tx_start().await {
            return Err(failed(e, Phase::PreTx));
        }

        let mut scope = AttemptScope {
            endpoint,
            phase: Phase::PreTx,
        };
        let run = match run_in_transaction(self.store, &options, &mut scope).await {
            Ok(run) => run,
            Err(e) => return Err(failed(e, scope.phase)),
        };

        let (mut envelope, attempts, committed) = run.into_parts();
        if committed {
            enter(Phase::Committed);
            enter(Phase::PostCommit);
            if let Err(e) = post_commit::<S, E>(scope.endpoint, &mut envelope).await {
                return Err(failed(e, Phase::PostCommit));
            }
        } else {
            enter(Phase::Aborted);
        }

        envelope.finalize();
        enter(Phase::Done);
        Ok(Completion {
            envelope,
            attempts,
            aborted: !committed,
        })
    }
}

async fn post_commit<S, E>(endpoint: &mut E, envelope: &mut ResponseEnvelope) -> Result<(), ApiError>
where
    S: TransactionalStore,
    E: TxEndpoint<S>,
{
    let data = hook_input(envelope)?;
    let flow = endpoint.post_commit(envelope, data).await?;
    settle(envelope, flow, Phase::PostCommit)?;
    Ok(())
}

/// Body handed to the next hook. A finalized envelope keeps its own copy.
fn hook_input(envelope: &mut ResponseEnvelope) -> Result<Value, ApiError> {
    if envelope.is_finalized() {
        return Ok(envelope.body().clone());
    }
    Ok(envelope.take_body()?)
}

/// Fold a hook result into the envelope unless it is already finalized.
fn settle(envelope: &mut ResponseEnvelope, flow: Flow, phase: Phase) -> Result<bool, ApiError> {
    if envelope.is_finalized() {
        tracing::trace!(phase = %phase, "Response finalized, hook result discarded");
        return Ok(false);
    }
    Ok(envelope.apply(flow)?)
}

/// Cross-attempt state: the endpoint and the phase reached so far.
struct AttemptScope<'e, E> {
    endpoint: &'e mut E,
    phase: Phase,
}

impl<E> AttemptScope<'_, E> {
    fn advance(&mut self, phase: Phase) {
        self.phase = phase;
        enter(phase);
    }
}

impl<S, E> AttemptBody<S> for AttemptScope<'_, E>
where
    S: TransactionalStore,
    E: TxEndpoint<S>,
{
    type Output = ResponseEnvelope;

    async fn run(
        &mut self,
        tx: &mut S::Tx,
        attempt: Attempt,
    ) -> Result<ResponseEnvelope, AttemptError<ResponseEnvelope>> {
        self.advance(Phase::Attempting(attempt.number));
        let mut envelope = ResponseEnvelope::new();

        self.advance(Phase::Handler);
        let flow = self.endpoint.compute_response(tx, &mut envelope).await?;
        if settle(&mut envelope, flow, Phase::Handler)? {
            tracing::trace!(attempt = attempt.number, "Handler exited early");
        }

        if !envelope.is_error() {
            self.advance(Phase::PreCommit);
            let data = hook_input(&mut envelope)?;
            let flow = self.endpoint.pre_commit(tx, &mut envelope, data).await?;
            settle(&mut envelope, flow, Phase::PreCommit)?;
        }

        if envelope.is_error() {
            tracing::debug!(
                attempt = attempt.number,
                status = envelope.status().as_u16(),
                "Response is an error, aborting transaction"
            );
            return Err(AttemptError::Abort(envelope));
        }
        self.advance(Phase::Commit);
        Ok(envelope)
    }
}

fn enter(phase: Phase) {
    tracing::trace!(phase = %phase, "Lifecycle phase");
}

fn failed(err: ApiError, phase: Phase) -> ApiError {
    enter(Phase::Failed);
    err.with_extra("phase", phase.to_string())
}
