//! A transactional counter.
//!
//! - `POST /{service}/increment` `{"by": n}` adds `n` (1 to 1000)
//! - `GET /{service}/value` reads the counter
//! - `POST /{service}/reset` sets it back to zero
//!
//! Increments past [`LIMIT`] are refused with a 409; the write staged by the
//! handler is discarded.

use axum::Router;
use axum::http::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use txapi_core::{ApiError, EarlyExit, Flow, ResponseEnvelope};
use txapi_runtime::TxEndpoint;
use txapi_testing::{InMemoryStore, InMemoryTx};
use txapi_web::{ApiRouter, AppConfig, ConfigError, Endpoint};

/// Service name used when `API_SERVICE` is not set.
pub const DEFAULT_SERVICE: &str = "counter";

/// Highest value the counter may reach.
pub const LIMIT: i64 = 1_000_000;

const COUNTER: &str = "counter";
const INCREMENTS: &str = "increments";

fn read_counter(tx: &mut InMemoryTx) -> Result<i64, ApiError> {
    Ok(tx.get(COUNTER)?.and_then(|v| v.as_i64()).unwrap_or(0))
}

/// Adds to the counter.
#[derive(Debug, Deserialize)]
pub struct Increment {
    #[serde(default = "one")]
    by: i64,
}

const fn one() -> i64 {
    1
}

impl TxEndpoint<InMemoryStore> for Increment {
    fn read_only(&self) -> bool {
        false
    }

    async fn compute_response(
        &mut self,
        tx: &mut InMemoryTx,
        reply: &mut ResponseEnvelope,
    ) -> Result<Flow, ApiError> {
        let value = read_counter(tx)? + self.by;
        tx.put(COUNTER, json!(value))?;

        if value > LIMIT {
            reply.set_status(StatusCode::CONFLICT)?;
            return Ok(Flow::Continue(json!({
                "error": "counter limit reached",
                "limit": LIMIT,
            })));
        }
        Ok(Flow::Continue(json!({ "value": value })))
    }

    async fn pre_commit(
        &mut self,
        tx: &mut InMemoryTx,
        _reply: &mut ResponseEnvelope,
        data: Value,
    ) -> Result<Flow, ApiError> {
        let count = tx.get(INCREMENTS)?.and_then(|v| v.as_u64()).unwrap_or(0);
        tx.put(INCREMENTS, json!(count + 1))?;
        Ok(Flow::Continue(data))
    }

    async fn post_commit(
        &mut self,
        _reply: &mut ResponseEnvelope,
        mut data: Value,
    ) -> Result<Flow, ApiError> {
        if let Some(body) = data.as_object_mut() {
            body.insert("committed".to_string(), Value::Bool(true));
        }
        Ok(Flow::Continue(data))
    }
}

impl Endpoint<InMemoryStore> for Increment {
    const PATH: &'static str = "/increment";
    const DESC: &'static str = "Add to the counter";

    fn validate(&self) -> Vec<String> {
        if (1..=1000).contains(&self.by) {
            Vec::new()
        } else {
            vec![format!("by must be between 1 and 1000, got {}", self.by)]
        }
    }
}

/// Reads the counter.
#[derive(Debug, Deserialize)]
pub struct ReadValue {}

impl TxEndpoint<InMemoryStore> for ReadValue {
    async fn compute_response(
        &mut self,
        tx: &mut InMemoryTx,
        _reply: &mut ResponseEnvelope,
    ) -> Result<Flow, ApiError> {
        let increments = tx.get(INCREMENTS)?.unwrap_or(json!(0));
        Ok(Flow::Continue(json!({
            "value": read_counter(tx)?,
            "increments": increments,
        })))
    }
}

impl Endpoint<InMemoryStore> for ReadValue {
    const PATH: &'static str = "/value";
    const DESC: &'static str = "Read the counter";
    const METHOD: Method = Method::GET;
}

/// Sets the counter back to zero.
#[derive(Debug, Deserialize)]
pub struct Reset {}

impl TxEndpoint<InMemoryStore> for Reset {
    fn read_only(&self) -> bool {
        false
    }

    async fn compute_response(
        &mut self,
        tx: &mut InMemoryTx,
        _reply: &mut ResponseEnvelope,
    ) -> Result<Flow, ApiError> {
        if read_counter(tx)? == 0 {
            return Ok(EarlyExit::new(json!({ "value": 0, "changed": false })).into());
        }
        tx.put(COUNTER, json!(0))?;
        Ok(Flow::Continue(json!({ "value": 0, "changed": true })))
    }
}

impl Endpoint<InMemoryStore> for Reset {
    const PATH: &'static str = "/reset";
    const DESC: &'static str = "Reset the counter";
}

/// Router serving the counter endpoints from `store`.
///
/// # Errors
///
/// Returns an error if `config` does not validate.
pub fn app(store: InMemoryStore, config: AppConfig) -> Result<Router, ConfigError> {
    Ok(ApiRouter::new(store, config)?
        .endpoint::<Increment>()?
        .endpoint::<ReadValue>()?
        .endpoint::<Reset>()?
        .build())
}
