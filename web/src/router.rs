//! Router assembly.
//!
//! [`ApiRouter`] mounts endpoints under the service prefix, adds the health
//! check, the not-found fallback and the middleware stack the configuration
//! asks for.

use axum::{
    Router,
    http::{HeaderName, Method},
    routing::{MethodFilter, get, on},
};
use std::collections::BTreeSet;
use tower_http::trace::TraceLayer;
use txapi_runtime::TransactionalStore;

use crate::config::{AppConfig, ConfigError};
use crate::endpoint::{Endpoint, serve};
use crate::handlers::{health_check, not_found};
use crate::middleware::{LatencyLayer, correlation_id_layer};
use crate::state::AppState;

/// Builder for the application router.
///
/// # Example
///
/// ```ignore
/// let app = ApiRouter::new(store, AppConfig::new("counter"))?
///     .endpoint::<Increment>()?
///     .endpoint::<Read>()?
///     .build();
/// axum::serve(listener, app).await?;
/// ```
pub struct ApiRouter<S> {
    state: AppState<S>,
    router: Router<AppState<S>>,
    routes: BTreeSet<(String, String)>,
}

impl<S> ApiRouter<S>
where
    S: TransactionalStore + 'static,
{
    /// Start a router for `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn new(store: S, config: AppConfig) -> Result<Self, ConfigError> {
        Self::from_state(AppState::new(store, config))
    }

    /// Start a router from prepared state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state's configuration does not validate.
    pub fn from_state(state: AppState<S>) -> Result<Self, ConfigError> {
        state.config().validate()?;
        let mut this = Self {
            state,
            router: Router::new(),
            routes: BTreeSet::new(),
        };

        let health = this.state.config().health_check.clone();
        if !health.disabled {
            this.claim(&Method::GET, &health.path)?;
            this.router = this.router.route(&health.path, get(health_check));
        }
        Ok(this)
    }

    /// Mount endpoint `E` at `/{service}{E::PATH}`. The path is also served
    /// with a trailing slash (or without one, if `E::PATH` ends in `/`).
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if `E::PATH` does not start with `/`, the
    /// method cannot be routed, or the method and path are already taken.
    pub fn endpoint<E: Endpoint<S>>(mut self) -> Result<Self, ConfigError> {
        if !E::PATH.starts_with('/') {
            return Err(ConfigError::Invalid {
                field: "endpoint path",
                reason: format!("'{}' must start with '/'", E::PATH),
            });
        }
        let method = E::METHOD;
        let filter = MethodFilter::try_from(method.clone()).map_err(|err| ConfigError::Invalid {
            field: "endpoint method",
            reason: err.to_string(),
        })?;

        let path = format!("{}{}", self.state.config().prefix(), E::PATH);
        let twin = match path.strip_suffix('/') {
            Some(bare) => bare.to_string(),
            None => format!("{path}/"),
        };
        if self.routes.contains(&(method.to_string(), twin.clone())) {
            return Err(taken(&method, &path));
        }
        self.claim(&method, &path)?;
        tracing::info!(method = %method, path = %path, desc = E::DESC, "Registered endpoint");

        self.router = self
            .router
            .route(&path, on(filter, serve::<S, E>))
            .route(&twin, on(filter, serve::<S, E>));
        Ok(self)
    }

    /// Registered `(method, path)` pairs, sorted.
    pub fn routes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.routes.iter().map(|(m, p)| (m.as_str(), p.as_str()))
    }

    /// Finish the router.
    pub fn build(self) -> Router {
        let config = self.state.config();
        let mut router = self.router.fallback(not_found::<S>);

        if config.logging.request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }
        if !config.latency_tracker.disabled {
            // Checked by AppConfig::validate
            if let Ok(header) = HeaderName::from_bytes(config.latency_tracker.header.as_bytes()) {
                router = router.layer(LatencyLayer::new(header));
            }
        }

        router.layer(correlation_id_layer()).with_state(self.state)
    }

    fn claim(&mut self, method: &Method, path: &str) -> Result<(), ConfigError> {
        if self.routes.insert((method.to_string(), path.to_string())) {
            Ok(())
        } else {
            Err(taken(method, path))
        }
    }
}

fn taken(method: &Method, path: &str) -> ConfigError {
    ConfigError::Invalid {
        field: "endpoint path",
        reason: format!("{method} {path} is registered twice"),
    }
}
