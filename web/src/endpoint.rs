//! Declarative HTTP endpoints.
//!
//! An endpoint type is its own request body: each request deserializes a
//! fresh value, validates it and runs it through the transactional lifecycle
//! as a [`TxEndpoint`].

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method},
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;
use txapi_core::ApiError;
use txapi_runtime::{RequestLifecycle, TransactionalStore, TxEndpoint};

use crate::body;
use crate::error::ApiReply;
use crate::extractors::RequestMeta;
use crate::state::AppState;

/// A transactional endpoint mounted at `/{service}{PATH}`.
///
/// Read-only behaviour and transaction options come from the
/// [`TxEndpoint`] implementation.
///
/// # Example
///
/// ```ignore
/// #[derive(Deserialize)]
/// struct Increment { by: i64 }
///
/// impl Endpoint<InMemoryStore> for Increment {
///     const PATH: &'static str = "/increment";
///     const DESC: &'static str = "Increase the counter";
///
///     fn validate(&self) -> Vec<String> {
///         if self.by < 1 { vec!["by must be positive".into()] } else { vec![] }
///     }
/// }
/// ```
pub trait Endpoint<S: TransactionalStore>: TxEndpoint<S> + DeserializeOwned + 'static {
    /// Route path below the service prefix. Must start with `/`.
    const PATH: &'static str;

    /// Human-readable description, logged when the route is registered.
    const DESC: &'static str = "";

    /// HTTP method.
    const METHOD: Method = Method::POST;

    /// Semantic checks beyond what deserialization enforces.
    fn validate(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Axum handler serving endpoint `E`.
pub async fn serve<S, E>(
    State(state): State<AppState<S>>,
    RequestMeta(request): RequestMeta,
    headers: HeaderMap,
    raw: Bytes,
) -> Response
where
    S: TransactionalStore + 'static,
    E: Endpoint<S>,
{
    match run::<S, E>(&state, &headers, &raw).await {
        Ok(reply) => reply.into_response(),
        Err(err) => ApiReply(state.classifier().handle(&err, &request)).into_response(),
    }
}

async fn run<S, E>(state: &AppState<S>, headers: &HeaderMap, raw: &[u8]) -> Result<ApiReply, ApiError>
where
    S: TransactionalStore + 'static,
    E: Endpoint<S>,
{
    let mut endpoint: E = body::decode(body::parse_json(headers, raw)?)?;
    body::check(endpoint.validate(), state.config().logging.report_all_errors)?;

    let done = RequestLifecycle::new(state.store(), state.defaults().clone())
        .execute(&mut endpoint)
        .await?;
    Ok(ApiReply(done.envelope))
}
