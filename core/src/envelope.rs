//! The per-request response envelope.
//!
//! One envelope is created for every transaction attempt and threaded through
//! the handler and hooks of that attempt. Bodies are replaced, never merged.
//! Once [`ResponseEnvelope::finalize`] has been called the envelope is frozen:
//! every mutator checks the flag and fails with [`EnvelopeError::Finalized`].

use http::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::flow::Flow;

/// Errors raised when writing to an envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The envelope already holds a terminal response.
    #[error("response already finalized, cannot {0}")]
    Finalized(&'static str),
}

/// Mutable result of a request: status code, body and terminal flag.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    status: StatusCode,
    body: Value,
    finalized: bool,
}

impl Default for ResponseEnvelope {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseEnvelope {
    /// Create an envelope with status 200 and a null body.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            status: StatusCode::OK,
            body: Value::Null,
            finalized: false,
        }
    }

    /// Create an already finalized envelope.
    #[must_use]
    pub const fn finished(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            body,
            finalized: true,
        }
    }

    /// Current status code.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Current body.
    #[must_use]
    pub const fn body(&self) -> &Value {
        &self.body
    }

    /// Whether a terminal response has been produced.
    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Whether the status is 400 or above.
    ///
    /// Inside a transaction this is the signal that the attempt must not commit.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status.as_u16() >= 400
    }

    /// Set the status code.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Finalized`] once the envelope is frozen.
    pub fn set_status(&mut self, status: StatusCode) -> Result<(), EnvelopeError> {
        self.ensure_open("set status")?;
        self.status = status;
        Ok(())
    }

    /// Replace the body.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Finalized`] once the envelope is frozen.
    pub fn set_body(&mut self, body: Value) -> Result<(), EnvelopeError> {
        self.ensure_open("replace body")?;
        self.body = body;
        Ok(())
    }

    /// Move the body out, leaving `null` behind.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Finalized`] once the envelope is frozen.
    pub fn take_body(&mut self) -> Result<Value, EnvelopeError> {
        self.ensure_open("take body")?;
        Ok(std::mem::take(&mut self.body))
    }

    /// Apply the result of a handler or hook.
    ///
    /// `Continue` replaces the body. `EarlyExit` replaces the body and sets the
    /// status it carries. Returns `true` when an early exit was applied.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Finalized`] once the envelope is frozen.
    pub fn apply(&mut self, flow: Flow) -> Result<bool, EnvelopeError> {
        match flow {
            Flow::Continue(data) => {
                self.set_body(data)?;
                Ok(false)
            }
            Flow::EarlyExit(exit) => {
                self.set_status(exit.status)?;
                self.set_body(exit.response_data)?;
                Ok(true)
            }
        }
    }

    /// Freeze the envelope. Idempotent.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    /// Split into status and body.
    #[must_use]
    pub fn into_parts(self) -> (StatusCode, Value) {
        (self.status, self.body)
    }

    fn ensure_open(&self, action: &'static str) -> Result<(), EnvelopeError> {
        if self.finalized {
            Err(EnvelopeError::Finalized(action))
        } else {
            Ok(())
        }
    }
}
