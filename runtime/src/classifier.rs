//! Failure classifier.
//!
//! Turns a failure that escaped the request lifecycle into:
//! - an [`ErrorDescriptor`] and the response body sent to the client
//! - one structured log record (`info` for client errors, `error` for crashes)
//! - one [`CrashReport`] for the injected [`CrashReporter`]
//!
//! Client errors caused by bad input get a fingerprint so that failures with
//! the same cause group together in observability tooling even when their
//! messages differ.

use chrono::Utc;
use http::StatusCode;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use txapi_core::{
    ApiError, CrashReport, CrashReporter, ErrorDescriptor, ErrorKind, ReportUser, RequestInfo,
    ResponseEnvelope, Severity,
};

use crate::metrics::LifecycleMetrics;
use crate::trace::TraceTrimmer;

/// Fingerprint of requests rejected for their content type.
pub const CONTENT_TYPE_FINGERPRINT: &str = "Content-Type Not Permitted";

const EMPTY_MESSAGE: &str = "empty error message";
const NOT_SET: &str = "not set";

/// Everything derived from one failure.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Normalized description.
    pub descriptor: ErrorDescriptor,
    /// Grouping key, for fingerprinted client errors.
    pub fingerprint: Option<String>,
    /// Message for logs: prefixed with the fingerprint unless it already
    /// contains the message.
    pub log_message: String,
    /// Trimmed stack frames.
    pub stack: Vec<String>,
    /// Server crash (5xx) rather than client error.
    pub is_crash: bool,
    /// Response body.
    pub body: Value,
}

impl Classification {
    /// Response status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.descriptor.status_code()
    }

    /// Severity used for logs and crash reports.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        if self.is_crash {
            Severity::Error
        } else {
            Severity::Warning
        }
    }
}

/// Classifies, logs and reports failures.
#[derive(Clone)]
pub struct FailureClassifier {
    verbose: bool,
    trimmer: TraceTrimmer,
    reporter: Arc<dyn CrashReporter>,
}

impl fmt::Debug for FailureClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureClassifier")
            .field("verbose", &self.verbose)
            .field("trimmer", &self.trimmer)
            .finish_non_exhaustive()
    }
}

impl FailureClassifier {
    /// Create a classifier reporting to `reporter`.
    #[must_use]
    pub fn new(reporter: Arc<dyn CrashReporter>) -> Self {
        Self {
            verbose: false,
            trimmer: TraceTrimmer::default(),
            reporter,
        }
    }

    /// Include `detail` and `stack` in error responses.
    #[must_use]
    pub const fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Use a custom trace trimmer.
    #[must_use]
    pub fn with_trimmer(mut self, trimmer: TraceTrimmer) -> Self {
        self.trimmer = trimmer;
        self
    }

    /// Whether responses include `detail` and `stack`.
    #[must_use]
    pub const fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Classify a failure. Pure: nothing is logged or reported.
    #[must_use]
    pub fn classify(&self, err: &ApiError) -> Classification {
        let message = if err.message().is_empty() {
            EMPTY_MESSAGE.to_string()
        } else {
            err.message().to_string()
        };

        let mut descriptor = ErrorDescriptor::new(err.code(), message.clone(), err.status());
        descriptor.retryable = err.is_retryable();
        let is_crash = descriptor.status_code().is_server_error();

        let fingerprint = if is_crash {
            None
        } else {
            match err.kind() {
                ErrorKind::ContentTypeRejected => Some(CONTENT_TYPE_FINGERPRINT.to_string()),
                ErrorKind::InvalidInput => Some(message.clone()),
                _ => None,
            }
        };

        let log_message = match &fingerprint {
            Some(fp) if !fp.contains(message.as_str()) => format!("{fp}: {message}"),
            _ => message,
        };
        if let Some(fp) = &fingerprint {
            descriptor.message.clone_from(fp);
        }

        let stack = self
            .trimmer
            .trim(&err.frames(), err.kind() == ErrorKind::InvalidInput);

        let body = if let Some(custom) = err.response() {
            custom.clone()
        } else {
            if self.verbose {
                descriptor.detail = Some(log_message.clone());
                descriptor.stack = Some(stack.clone());
            }
            serde_json::to_value(&descriptor).unwrap_or_else(
                |_| json!({"code": descriptor.code, "message": descriptor.message}),
            )
        };

        Classification {
            descriptor,
            fingerprint,
            log_message,
            stack,
            is_crash,
            body,
        }
    }

    /// Build the crash report for a classified failure.
    #[must_use]
    pub fn crash_report(
        &self,
        err: &ApiError,
        classification: &Classification,
        request: &RequestInfo,
    ) -> CrashReport {
        let user = match &request.uid {
            Some(uid) => ReportUser {
                id: Some(uid.clone()),
                ip: None,
            },
            None => ReportUser {
                id: None,
                ip: request.ip,
            },
        };

        let mut tags = BTreeMap::new();
        tags.insert("method".to_string(), request.method.clone());
        tags.insert("url".to_string(), request.url.clone());
        tags.insert(
            "status".to_string(),
            classification.descriptor.status.to_string(),
        );

        let mut extra: Map<String, Value> = err.extra().clone();
        extra.insert("msg".to_string(), Value::from(classification.log_message.clone()));
        extra.insert("reqId".to_string(), Value::from(request.id.clone()));
        extra.insert(
            "userAgent".to_string(),
            Value::from(request.user_agent.clone().unwrap_or_else(|| NOT_SET.to_string())),
        );

        CrashReport {
            error: classification.descriptor.code.clone(),
            message: classification.log_message.clone(),
            fingerprint: classification.fingerprint.clone(),
            level: classification.severity(),
            user,
            tags,
            extra,
            occurred_at: Utc::now(),
        }
    }

    /// Classify, log and report a failure, and build the final response.
    ///
    /// Never fails: whatever the failure, a finalized error envelope comes out.
    pub fn handle(&self, err: &ApiError, request: &RequestInfo) -> ResponseEnvelope {
        let classification = self.classify(err);
        let extra = Value::Object(err.extra().clone());

        if classification.is_crash {
            tracing::error!(
                status = classification.descriptor.status,
                stack = ?classification.stack,
                extra = %extra,
                code = %classification.descriptor.code,
                request_id = %request.id,
                source = ?std::error::Error::source(err),
                "{}",
                classification.log_message
            );
            LifecycleMetrics::record_failure("crash");
        } else {
            tracing::info!(
                status = classification.descriptor.status,
                stack = ?classification.stack,
                extra = %extra,
                code = %classification.descriptor.code,
                fingerprint = classification.fingerprint.as_deref(),
                request_id = %request.id,
                "{}",
                classification.log_message
            );
            LifecycleMetrics::record_failure("client_error");
        }

        self.reporter
            .capture(self.crash_report(err, &classification, request));

        let status = classification.status();
        ResponseEnvelope::finished(status, classification.body)
    }
}
