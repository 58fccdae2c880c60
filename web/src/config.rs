//! Application configuration.
//!
//! Every section has defaults, so the smallest valid configuration only names
//! the service. Unknown keys are rejected when deserializing.
//!
//! # Example
//!
//! ```
//! use txapi_web::AppConfig;
//!
//! let config = AppConfig::from_json(r#"{"service": "counter"}"#).unwrap();
//! assert_eq!(config.prefix(), "/counter");
//! assert_eq!(config.latency_tracker.header, "x-latency-ms");
//! ```

use http::HeaderName;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use txapi_core::report::{CrashReporter, NoopReporter, ReporterSettings, TracingReporter};
use txapi_runtime::{RetryPolicy, TransactionOptions};

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required value is missing or empty.
    #[error("Missing required value for {0}")]
    MissingValue(&'static str),

    /// A value is present but unusable.
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Serialized configuration could not be read.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AppConfig {
    /// Service name; every endpoint is mounted under `/{service}`.
    pub service: String,
    /// Health check route.
    pub health_check: HealthCheckConfig,
    /// Response latency header.
    pub latency_tracker: LatencyTrackerConfig,
    /// Logging and error detail.
    pub logging: LoggingConfig,
    /// Crash report forwarding.
    pub error_reporting: ErrorReportingConfig,
    /// Transaction retry defaults.
    pub transactions: TransactionConfig,
}

/// Health check route settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HealthCheckConfig {
    /// Do not register the route.
    pub disabled: bool,
    /// Route path, outside the service prefix.
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            path: "/".to_string(),
        }
    }
}

/// Latency header settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LatencyTrackerConfig {
    /// Do not add the header.
    pub disabled: bool,
    /// Header carrying the handling time in milliseconds.
    pub header: String,
}

impl Default for LatencyTrackerConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            header: "x-latency-ms".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// Human-readable output for test runs.
    pub unittesting: bool,
    /// Report every validation problem instead of the first one.
    pub report_all_errors: bool,
    /// Include `detail` and `stack` in error responses.
    pub report_error_detail: bool,
    /// Log every request and response.
    pub request_logging: bool,
}

/// Crash report settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ErrorReportingConfig {
    /// Forward crash reports.
    pub enabled: bool,
    /// Deployment environment. Nothing is forwarded from `localhost`.
    pub environment: String,
    /// Release identifier.
    pub release: Option<String>,
    /// Reported host name.
    pub server_name: Option<String>,
}

impl Default for ErrorReportingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            environment: "development".to_string(),
            release: None,
            server_name: None,
        }
    }
}

impl ErrorReportingConfig {
    /// Whether reports should leave the process.
    #[must_use]
    pub fn forwards(&self) -> bool {
        self.enabled && self.environment != "localhost"
    }

    /// Reporter for these settings: the installed global reporter or a
    /// tracing reporter when forwarding, a no-op otherwise.
    #[must_use]
    pub fn reporter(&self) -> Arc<dyn CrashReporter> {
        if !self.forwards() {
            return Arc::new(NoopReporter);
        }
        txapi_core::report::global().unwrap_or_else(|| self.tracing_reporter())
    }

    /// Install the process-wide reporter at startup when forwarding.
    ///
    /// Returns whether a reporter is installed afterwards. A reporter
    /// installed earlier stays in place.
    pub fn install_reporter(&self) -> bool {
        if !self.forwards() {
            return false;
        }
        if txapi_core::report::install(self.tracing_reporter()).is_err() {
            tracing::debug!("Crash reporter already installed");
        }
        true
    }

    fn tracing_reporter(&self) -> Arc<dyn CrashReporter> {
        Arc::new(TracingReporter::new(ReporterSettings {
            environment: self.environment.clone(),
            release: self.release.clone(),
            server_name: self.server_name.clone(),
        }))
    }
}

/// Transaction retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TransactionConfig {
    /// Retries after the first attempt.
    pub max_retries: usize,
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Upper bound for any delay.
    pub max_delay_ms: u64,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Randomize delays.
    pub jitter: bool,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 50,
            max_delay_ms: 2000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl TransactionConfig {
    /// Default options for every request.
    #[must_use]
    pub fn options(&self) -> TransactionOptions {
        TransactionOptions::new(
            RetryPolicy::builder()
                .max_retries(self.max_retries)
                .initial_delay(Duration::from_millis(self.initial_delay_ms))
                .max_delay(Duration::from_millis(self.max_delay_ms))
                .multiplier(self.multiplier)
                .jitter(self.jitter)
                .build(),
        )
    }
}

impl AppConfig {
    /// Configuration for `service` with every other section defaulted.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed input or unknown keys, otherwise
    /// whatever [`AppConfig::validate`] reports.
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the loaded configuration fails validation, which
    /// includes `API_SERVICE` not being set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_or("")
    }

    /// Load configuration from environment variables, using
    /// `default_service` when `API_SERVICE` is not set.
    ///
    /// # Errors
    ///
    /// Returns an error if the loaded configuration fails validation.
    pub fn from_env_or(default_service: &str) -> Result<Self, ConfigError> {
        let defaults = TransactionConfig::default();
        let config = Self {
            service: env::var("API_SERVICE").unwrap_or_else(|_| default_service.to_string()),
            health_check: HealthCheckConfig {
                disabled: env_flag("API_HEALTH_CHECK_DISABLED"),
                path: env::var("API_HEALTH_CHECK_PATH").unwrap_or_else(|_| "/".to_string()),
            },
            latency_tracker: LatencyTrackerConfig {
                disabled: env_flag("API_LATENCY_TRACKER_DISABLED"),
                header: env::var("API_LATENCY_HEADER")
                    .unwrap_or_else(|_| "x-latency-ms".to_string()),
            },
            logging: LoggingConfig {
                unittesting: env_flag("API_UNITTESTING"),
                report_all_errors: env_flag("API_REPORT_ALL_ERRORS"),
                report_error_detail: env_flag("API_REPORT_ERROR_DETAIL"),
                request_logging: env_flag("API_REQUEST_LOGGING"),
            },
            error_reporting: ErrorReportingConfig {
                enabled: env_flag("API_ERROR_REPORTING"),
                environment: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                release: env::var("GIT_HASH").ok(),
                server_name: env::var("HOSTNAME").ok(),
            },
            transactions: TransactionConfig {
                max_retries: env_parse("TX_MAX_RETRIES").unwrap_or(defaults.max_retries),
                initial_delay_ms: env_parse("TX_INITIAL_DELAY_MS")
                    .unwrap_or(defaults.initial_delay_ms),
                max_delay_ms: env_parse("TX_MAX_DELAY_MS").unwrap_or(defaults.max_delay_ms),
                multiplier: env_parse("TX_BACKOFF_MULTIPLIER").unwrap_or(defaults.multiplier),
                jitter: env::var("TX_JITTER").map_or(defaults.jitter, |v| is_truthy(&v)),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can be served.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingValue`] when the service name is empty
    /// - [`ConfigError::Invalid`] for a service name containing `/`, a
    ///   health check path not starting with `/`, an invalid latency header
    ///   name or a non-positive backoff multiplier
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.trim().is_empty() {
            return Err(ConfigError::MissingValue("service"));
        }
        if self.service.contains('/') {
            return Err(ConfigError::Invalid {
                field: "service",
                reason: format!("'{}' must not contain '/'", self.service),
            });
        }
        if !self.health_check.disabled && !self.health_check.path.starts_with('/') {
            return Err(ConfigError::Invalid {
                field: "health_check.path",
                reason: format!("'{}' must start with '/'", self.health_check.path),
            });
        }
        if !self.latency_tracker.disabled
            && HeaderName::from_bytes(self.latency_tracker.header.as_bytes()).is_err()
        {
            return Err(ConfigError::Invalid {
                field: "latency_tracker.header",
                reason: format!("'{}' is not a header name", self.latency_tracker.header),
            });
        }
        if self.transactions.multiplier <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "transactions.multiplier",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Path prefix shared by all endpoints.
    #[must_use]
    pub fn prefix(&self) -> String {
        format!("/{}", self.service)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn env_flag(key: &str) -> bool {
    env::var(key).is_ok_and(|v| is_truthy(&v))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = AppConfig::from_json(r#"{"service": "iam"}"#).unwrap();

        assert_eq!(config.service, "iam");
        assert_eq!(config.health_check, HealthCheckConfig::default());
        assert!(!config.logging.report_error_detail);
        assert!(!config.error_reporting.forwards());
        assert_eq!(config.transactions.max_retries, 3);
    }

    #[test]
    fn test_missing_service_is_rejected() {
        let err = AppConfig::from_json("{}").unwrap_err();
        assert!(matches!(err, ConfigError::MissingValue("service")));
        assert_eq!(err.to_string(), "Missing required value for service");
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = AppConfig::from_json(r#"{"service": "iam", "cookie": {}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let err =
            AppConfig::from_json(r#"{"service": "iam", "logging": {"verbose": true}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_values() {
        let mut config = AppConfig::new("iam");
        config.health_check.path = "health".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "health_check.path", .. })
        ));

        // Ignored while the route is disabled
        config.health_check.disabled = true;
        assert!(config.validate().is_ok());

        config.latency_tracker.header = "bad header".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "latency_tracker.header", .. })
        ));

        let config = AppConfig::new("a/b");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reporting_never_forwards_from_localhost() {
        let mut reporting = ErrorReportingConfig {
            enabled: true,
            environment: "localhost".to_string(),
            ..ErrorReportingConfig::default()
        };
        assert!(!reporting.forwards());

        reporting.environment = "production".to_string();
        assert!(reporting.forwards());
    }

    #[test]
    fn test_install_reporter_sets_the_global_handle() {
        let local = ErrorReportingConfig {
            enabled: true,
            environment: "localhost".to_string(),
            ..ErrorReportingConfig::default()
        };
        assert!(!local.install_reporter());

        let production = ErrorReportingConfig {
            enabled: true,
            environment: "production".to_string(),
            ..ErrorReportingConfig::default()
        };
        assert!(production.install_reporter());
        assert!(txapi_core::report::global().is_some());
        // A second install keeps the first reporter
        assert!(production.install_reporter());
    }

    #[test]
    fn test_transaction_options() {
        let config = TransactionConfig {
            max_retries: 5,
            jitter: false,
            ..TransactionConfig::default()
        };
        let options = config.options();

        assert!(!options.read_only);
        assert_eq!(options.retry.max_retries, 5);
        assert_eq!(options.retry.initial_delay, Duration::from_millis(50));
        assert!(!options.retry.jitter);
    }

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy("TRUE"));
        assert!(is_truthy("1"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy(""));
    }
}
