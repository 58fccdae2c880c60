//! Failure type for handlers, hooks and transactional stores.
//!
//! [`ApiError`] is what every fallible phase of a request returns. Its
//! [`ErrorKind`] decides whether the failure is retryable and which HTTP status
//! it declares; the message is for display only and never inspected for
//! classification.

use http::StatusCode;
use serde_json::{Map, Value};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::envelope::EnvelopeError;

static FORCE_TRACE_CAPTURE: AtomicBool = AtomicBool::new(false);

/// Capture a backtrace for every new failure, regardless of `RUST_BACKTRACE`.
///
/// Set once at startup when verbose error reporting is configured.
pub fn force_trace_capture(enabled: bool) {
    FORCE_TRACE_CAPTURE.store(enabled, Ordering::Relaxed);
}

/// Category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Request input failed validation.
    InvalidInput,
    /// The request body was sent with a content type the API does not accept.
    ContentTypeRejected,
    /// The requested resource does not exist.
    NotFound,
    /// A request error with a caller-declared status.
    Request,
    /// The data store detected a conflicting concurrent modification.
    WriteConflict,
    /// A transaction kept conflicting until retries were exhausted.
    TransactionFailed,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Type name reported as the error `code`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::InvalidInput => "InvalidInputException",
            Self::ContentTypeRejected => "ContentTypeNotPermittedException",
            Self::NotFound => "NotFoundException",
            Self::Request => "RequestError",
            Self::WriteConflict => "WriteConflictError",
            Self::TransactionFailed => "TransactionFailedError",
            Self::Internal => "InternalError",
        }
    }

    /// Status declared by this kind, if any.
    #[must_use]
    pub const fn declared_status(self) -> Option<StatusCode> {
        match self {
            Self::InvalidInput => Some(StatusCode::BAD_REQUEST),
            Self::ContentTypeRejected => Some(StatusCode::UNSUPPORTED_MEDIA_TYPE),
            Self::NotFound => Some(StatusCode::NOT_FOUND),
            Self::WriteConflict => Some(StatusCode::CONFLICT),
            Self::TransactionFailed => Some(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Request | Self::Internal => None,
        }
    }

    /// Whether an attempt failing with this kind may be retried.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::WriteConflict)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A failure raised while serving a request.
///
/// # Examples
///
/// ```
/// use txapi_core::{ApiError, ErrorKind};
/// use http::StatusCode;
///
/// let err = ApiError::not_found("order 42 does not exist");
/// assert_eq!(err.kind(), ErrorKind::NotFound);
/// assert_eq!(err.status(), StatusCode::NOT_FOUND);
/// assert_eq!(err.code(), "NotFoundException");
/// assert!(!err.is_retryable());
/// ```
pub struct ApiError {
    kind: ErrorKind,
    status: Option<StatusCode>,
    code: Option<String>,
    message: String,
    response: Option<Value>,
    extra: Map<String, Value>,
    source: Option<anyhow::Error>,
    backtrace: Backtrace,
    frames: Option<Vec<String>>,
}

impl ApiError {
    /// Create a failure of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        // Conflicts are retried internally and never reach the classifier
        let backtrace = if kind.is_retryable() {
            Backtrace::disabled()
        } else if FORCE_TRACE_CAPTURE.load(Ordering::Relaxed) {
            Backtrace::force_capture()
        } else {
            Backtrace::capture()
        };

        Self {
            kind,
            status: kind.declared_status(),
            code: None,
            message: message.into(),
            response: None,
            extra: Map::new(),
            source: None,
            backtrace,
            frames: None,
        }
    }

    /// Input validation failure (400).
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    /// Body sent with an unsupported content type (415).
    #[must_use]
    pub fn content_type_rejected(content_type: &str) -> Self {
        Self::new(
            ErrorKind::ContentTypeRejected,
            format!("Unsupported Media Type: {content_type}"),
        )
    }

    /// Missing resource (404).
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Request error with an explicit status.
    #[must_use]
    pub fn request(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Request, message).with_status(status)
    }

    /// Retryable write conflict reported by a data store.
    #[must_use]
    pub fn write_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::WriteConflict, message)
    }

    /// Retries exhausted; wraps the last conflict.
    #[must_use]
    pub fn transaction_failed(attempts: u32, last: Self) -> Self {
        Self::new(
            ErrorKind::TransactionFailed,
            format!("transaction failed after {attempts} attempts: {}", last.message),
        )
        .with_extra("attempts", Value::from(attempts))
        .with_source(anyhow::Error::new(last))
    }

    /// Unclassified server failure (500).
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Override the type name reported as `code`.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Override the declared status.
    #[must_use]
    pub const fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach a custom response payload, returned verbatim instead of the
    /// generic error body.
    #[must_use]
    pub fn with_response(mut self, response: Value) -> Self {
        self.response = Some(response);
        self
    }

    /// Attach a structured field for logs and crash reports.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Replace the captured backtrace with explicit frames, innermost first.
    #[must_use]
    pub fn with_trace<I, S>(mut self, frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.frames = Some(frames.into_iter().map(Into::into).collect());
        self
    }

    /// Failure category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Declared status, or 500 when none was declared.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Type name: the custom code if one was set, else the kind's name.
    #[must_use]
    pub fn code(&self) -> &str {
        self.code.as_deref().unwrap_or(self.kind.name())
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Custom response payload, if any.
    #[must_use]
    pub const fn response(&self) -> Option<&Value> {
        self.response.as_ref()
    }

    /// Structured fields attached to this failure.
    #[must_use]
    pub const fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Whether the failure may be retried by the transaction runner.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Whether the failure is a server crash (5xx) rather than a client error.
    #[must_use]
    pub fn is_crash(&self) -> bool {
        self.status().is_server_error()
    }

    /// Stack frames, innermost first.
    ///
    /// Explicit frames set with [`ApiError::with_trace`] win; otherwise the
    /// captured backtrace is rendered, or empty if capture was disabled.
    #[must_use]
    pub fn frames(&self) -> Vec<String> {
        if let Some(frames) = &self.frames {
            return frames.clone();
        }
        if self.backtrace.status() == BacktraceStatus::Captured {
            parse_backtrace(&self.backtrace.to_string())
        } else {
            Vec::new()
        }
    }
}

/// Split `Backtrace`'s display output into one string per frame.
fn parse_backtrace(rendered: &str) -> Vec<String> {
    let mut frames: Vec<String> = Vec::new();
    for line in rendered.lines() {
        let line = line.trim();
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(last) = frames.last_mut() {
                last.push_str(" at ");
                last.push_str(location);
            }
            continue;
        }
        let Some((index, symbol)) = line.split_once(": ") else {
            continue;
        };
        if !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) {
            frames.push(symbol.to_string());
        }
    }
    frames
}

impl fmt::Debug for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiError")
            .field("kind", &self.kind)
            .field("status", &self.status())
            .field("code", &self.code())
            .field("message", &self.message)
            .field("response", &self.response)
            .field("extra", &self.extra)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Convert `anyhow::Error` to an internal failure.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string()).with_source(err)
    }
}

impl From<EnvelopeError> for ApiError {
    fn from(err: EnvelopeError) -> Self {
        Self::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_defaults_to_500() {
        let err = ApiError::internal("boom");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.is_crash());
        assert_eq!(err.code(), "InternalError");
    }

    #[test]
    fn test_declared_status_wins() {
        let err = ApiError::request(StatusCode::FORBIDDEN, "no");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.code(), "RequestError");
        assert!(!err.is_crash());
    }

    #[test]
    fn test_retryable_comes_from_kind_not_message() {
        let conflict = ApiError::write_conflict("nothing to see");
        assert!(conflict.is_retryable());

        let lookalike = ApiError::internal("write conflict, please retry");
        assert!(!lookalike.is_retryable());
    }

    #[test]
    fn test_custom_code() {
        let err = ApiError::invalid_input("bad").with_code("OutOfStockException");
        assert_eq!(err.code(), "OutOfStockException");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_transaction_failed_wraps_last_conflict() {
        let err = ApiError::transaction_failed(4, ApiError::write_conflict("row 7 changed"));
        assert_eq!(err.code(), "TransactionFailedError");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.extra().get("attempts"), Some(&Value::from(4)));
        assert!(err.message().contains("row 7 changed"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_explicit_frames() {
        let err = ApiError::internal("x").with_trace(["a::b", "c::d"]);
        assert_eq!(err.frames(), vec!["a::b".to_string(), "c::d".to_string()]);
    }

    #[test]
    fn test_parse_backtrace() {
        let rendered = "   0: txapi_core::error::ApiError::new\n             at ./core/src/error.rs:10:5\n   1: my_app::handler\n             at ./src/main.rs:3:1\n";
        assert_eq!(
            parse_backtrace(rendered),
            vec![
                "txapi_core::error::ApiError::new at ./core/src/error.rs:10:5".to_string(),
                "my_app::handler at ./src/main.rs:3:1".to_string(),
            ]
        );
    }

    #[test]
    fn test_from_anyhow() {
        let err: ApiError = anyhow::anyhow!("disk full").into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.message(), "disk full");
    }

    #[test]
    fn test_from_envelope_error() {
        let err: ApiError = EnvelopeError::Finalized("set status").into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
