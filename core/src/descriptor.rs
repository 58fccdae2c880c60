//! Normalized description of a failure.

use http::StatusCode;
use serde::{Deserialize, Serialize};

/// What a client (and observability tooling) learns about a failure.
///
/// `status` is always 400 or above. `detail` and `stack` are only populated
/// when verbose error reporting is enabled and the failure did not supply its
/// own response payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    /// Symbolic classifier name, e.g. `TransactionFailedError`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// HTTP status.
    #[serde(skip)]
    pub status: u16,
    /// Verbose message (possibly prefixed with the fingerprint).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub detail: Option<String>,
    /// Trimmed stack frames.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stack: Option<Vec<String>>,
    /// Whether the failure type is retryable.
    #[serde(skip)]
    pub retryable: bool,
}

impl ErrorDescriptor {
    /// Create a descriptor. Statuses below 400 are raised to 500.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>, status: StatusCode) -> Self {
        let status = if status.as_u16() < 400 {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            status
        };
        Self {
            code: code.into(),
            message: message.into(),
            status: status.as_u16(),
            detail: None,
            stack: None,
            retryable: false,
        }
    }

    /// HTTP status as a typed value.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}
