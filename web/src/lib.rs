//! Axum integration for txapi.
//!
//! Endpoints are declared as types implementing [`Endpoint`] and mounted
//! with [`ApiRouter`]. Each request goes through the same steps:
//!
//! 1. **Parse** the body as JSON (`{}` when empty, 415 for other content
//!    types)
//! 2. **Deserialize** it into the endpoint type and run its validation
//! 3. **Execute** the transactional lifecycle against the store
//! 4. **Render** the finished envelope, or classify the failure and render
//!    the error response
//!
//! # Example
//!
//! ```ignore
//! use txapi_web::{ApiRouter, AppConfig, telemetry};
//!
//! let config = AppConfig::from_env()?;
//! telemetry::init_tracing(&config.logging);
//!
//! let app = ApiRouter::new(store, config)?
//!     .endpoint::<Increment>()?
//!     .build();
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod body;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
pub mod telemetry;

pub use config::{AppConfig, ConfigError};
pub use endpoint::Endpoint;
pub use error::ApiReply;
pub use extractors::{ClientIp, CorrelationId, RequestMeta, UserAgent};
pub use middleware::{CORRELATION_ID_HEADER, LatencyLayer, correlation_id_layer};
pub use router::ApiRouter;
pub use state::AppState;
