//! # txapi Core
//!
//! Core types for the txapi transactional HTTP API framework.
//!
//! This crate holds the values that flow through a request, independent of the
//! transport layer and of any particular data store:
//!
//! - **Response Envelope**: the mutable per-request result (status, body, finalized flag)
//! - **Flow / Early Exit**: how handlers and hooks say "continue" or "stop here with this response"
//! - **`ApiError`**: the failure type raised by handlers, hooks and stores
//! - **Error Descriptor**: the normalized `{code, message, status, detail}` shape of a failure
//! - **Crash reporting**: the collaborator interface failures are forwarded to
//!
//! ## Example
//!
//! ```
//! use txapi_core::{EarlyExit, Flow, ResponseEnvelope};
//! use http::StatusCode;
//! use serde_json::json;
//!
//! let mut reply = ResponseEnvelope::new();
//! reply
//!     .apply(Flow::EarlyExit(
//!         EarlyExit::new(json!({"error": "bad"})).with_status(StatusCode::BAD_REQUEST),
//!     ))
//!     .ok();
//!
//! assert!(reply.is_error());
//! assert_eq!(reply.body(), &json!({"error": "bad"}));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod descriptor;
pub mod envelope;
pub mod error;
pub mod flow;
pub mod report;
pub mod request;

// Re-export key types for convenience
pub use descriptor::ErrorDescriptor;
pub use envelope::{EnvelopeError, ResponseEnvelope};
pub use error::{ApiError, ErrorKind};
pub use flow::{EarlyExit, Flow};
pub use report::{CrashReport, CrashReporter, NoopReporter, ReportUser, Severity};
pub use request::RequestInfo;

/// Re-exported so endpoint code can name bodies without a direct dependency.
pub use serde_json::Value;

/// Result type alias for handler and hook code.
pub type ApiResult<T> = Result<T, ApiError>;
