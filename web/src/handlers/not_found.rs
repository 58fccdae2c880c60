//! Fallback for unknown routes.

use axum::{
    extract::State,
    response::{IntoResponse, Response},
};
use txapi_core::ApiError;

use crate::error::ApiReply;
use crate::extractors::RequestMeta;
use crate::state::AppState;

/// Classified `NotFoundException` for any unmatched route.
#[allow(clippy::unused_async)]
pub async fn not_found<S>(State(state): State<AppState<S>>, RequestMeta(request): RequestMeta) -> Response
where
    S: Send + Sync + 'static,
{
    let err = ApiError::not_found(format!("Route {} {} not found", request.method, request.url));
    ApiReply(state.classifier().handle(&err, &request)).into_response()
}
