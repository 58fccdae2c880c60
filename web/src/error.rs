//! Turning lifecycle results into HTTP responses.
//!
//! Successful runs and classified failures both end as a finished
//! [`ResponseEnvelope`]; [`ApiReply`] writes one out. Failures are rendered
//! as pretty-printed JSON with an explicit charset so that they read well in
//! a terminal.

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use txapi_core::ResponseEnvelope;

/// Content type of rendered error bodies.
pub const JSON_UTF8: &str = "application/json; charset=utf-8";

/// A finished response envelope as an axum response.
///
/// A `null` body renders as an empty body. Success bodies are compact JSON;
/// error bodies (status 400 and above) are pretty-printed.
#[derive(Debug)]
pub struct ApiReply(pub ResponseEnvelope);

impl IntoResponse for ApiReply {
    fn into_response(self) -> Response {
        let (status, body) = self.0.into_parts();
        render(status, &body)
    }
}

fn render(status: StatusCode, body: &Value) -> Response {
    if body.is_null() {
        return status.into_response();
    }

    let encoded = if status.as_u16() >= 400 {
        serde_json::to_vec_pretty(body)
    } else {
        serde_json::to_vec(body)
    };
    match encoded {
        Ok(bytes) => {
            let mut response = Response::new(Body::from(bytes));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_UTF8));
            response
        }
        Err(err) => {
            tracing::error!(error = %err, "Failed to serialize response body");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
