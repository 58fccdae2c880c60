//! JSON request body parsing.
//!
//! Three distinct failures, each with its own status:
//!
//! | input | failure | status |
//! |---|---|---|
//! | non-empty body, content type not JSON | `ContentTypeNotPermittedException` | 415 |
//! | malformed JSON | `RequestError` with the parser message | 400 |
//! | JSON that does not fit the endpoint | `InvalidInputException` | 400 |
//!
//! An empty body parses as `{}`.

use axum::http::{HeaderMap, StatusCode, header};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use txapi_core::ApiError;

/// Prefix of every body validation message.
pub const VALIDATION_PREFIX: &str = "Body Validation Failure";

/// Parse raw body bytes into JSON.
///
/// # Errors
///
/// Content-type rejection or malformed JSON, as described in the module
/// docs.
pub fn parse_json(headers: &HeaderMap, body: &[u8]) -> Result<Value, ApiError> {
    if body.is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    match content_type {
        Some(ct) if is_json(ct) => {}
        Some(ct) => return Err(ApiError::content_type_rejected(ct)),
        None => return Err(ApiError::content_type_rejected("not set")),
    }

    serde_json::from_slice(body).map_err(|err| {
        ApiError::request(StatusCode::BAD_REQUEST, err.to_string()).with_source(err)
    })
}

fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

/// Deserialize parsed JSON into an endpoint.
///
/// # Errors
///
/// [`ApiError::invalid_input`] with the deserializer's message.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value)
        .map_err(|err| ApiError::invalid_input(format!("{VALIDATION_PREFIX}: {err}")))
}

/// Turn validation problems into a failure.
///
/// Only the first problem is reported unless `report_all` is set.
///
/// # Errors
///
/// [`ApiError::invalid_input`] when `problems` is not empty.
pub fn check(problems: Vec<String>, report_all: bool) -> Result<(), ApiError> {
    let detail = if report_all {
        problems.join("; ")
    } else {
        match problems.into_iter().next() {
            Some(first) => first,
            None => return Ok(()),
        }
    };
    if detail.is_empty() {
        return Ok(());
    }
    Err(ApiError::invalid_input(format!("{VALIDATION_PREFIX}: {detail}")))
}
