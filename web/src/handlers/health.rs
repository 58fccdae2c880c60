//! Health check endpoint.
//!
//! Used by load balancers to verify the process is serving. It does not
//! touch the store.

use axum::http::StatusCode;

/// Liveness check: 200 with an empty body.
///
/// # Endpoint
///
/// ```text
/// GET {health_check.path}
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> StatusCode {
    StatusCode::OK
}
