//! Early-exit control flow for handlers and hooks.
//!
//! A handler or hook finishes in one of two ways:
//!
//! - [`Flow::Continue`]: normal completion with response data; the next phase runs
//! - [`Flow::EarlyExit`]: "stop here, this is the final response" without it being an error
//!
//! The request lifecycle pattern-matches on the returned `Flow` at the handler,
//! pre-commit and post-commit boundaries. An early exit is not an abort: whether
//! the transaction commits is still decided by the status it carries.

use http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::error::ApiError;

/// A non-error short-circuit carrying the final response.
#[derive(Debug, Clone, PartialEq)]
pub struct EarlyExit {
    /// Body to return.
    pub response_data: Value,
    /// Status to return (defaults to 200).
    pub status: StatusCode,
}

impl EarlyExit {
    /// Create an early exit with status 200.
    #[must_use]
    pub const fn new(response_data: Value) -> Self {
        Self {
            response_data,
            status: StatusCode::OK,
        }
    }

    /// Set the status returned with the early exit.
    #[must_use]
    pub const fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

/// Result of a handler or hook.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// Continue with this response data.
    Continue(Value),
    /// Stop executing handler logic and respond with this payload.
    EarlyExit(EarlyExit),
}

impl Flow {
    /// Continue with any serializable response data.
    ///
    /// # Errors
    ///
    /// Returns an internal error if `data` cannot be represented as JSON.
    pub fn json<T: Serialize + ?Sized>(data: &T) -> Result<Self, ApiError> {
        serde_json::to_value(data)
            .map(Self::Continue)
            .map_err(|e| ApiError::internal(format!("response is not serializable: {e}")))
    }

    /// Early-exit with the given data and status 200.
    #[must_use]
    pub const fn done(data: Value) -> Self {
        Self::EarlyExit(EarlyExit::new(data))
    }

    /// Whether this is an early exit.
    #[must_use]
    pub const fn is_early_exit(&self) -> bool {
        matches!(self, Self::EarlyExit(_))
    }
}

impl From<EarlyExit> for Flow {
    fn from(exit: EarlyExit) -> Self {
        Self::EarlyExit(exit)
    }
}
