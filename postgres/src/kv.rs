//! A JSON key/value table usable from inside a [`PgTx`].
//!
//! Small enough for counters, idempotency keys and demo endpoints; real
//! applications run their own queries on [`PgTx::conn`].

use serde_json::Value;
use sqlx::Row;
use sqlx::postgres::PgPool;
use txapi_core::ApiError;

use crate::{PgTx, map_sqlx_error};

/// Table used by the helpers.
pub const TABLE: &str = "txapi_kv";

/// Create the key/value table if it does not exist.
///
/// # Errors
///
/// Returns an internal error if the statement fails.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), ApiError> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS txapi_kv (
            key TEXT PRIMARY KEY,
            value JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        ",
    )
    .execute(pool)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

/// Read a value.
///
/// # Errors
///
/// Retryable conflict on serialization failure, internal error otherwise.
pub async fn get(tx: &mut PgTx, key: &str) -> Result<Option<Value>, ApiError> {
    let row = sqlx::query("SELECT value FROM txapi_kv WHERE key = $1")
        .bind(key)
        .fetch_optional(tx.conn())
        .await
        .map_err(map_sqlx_error)?;

    row.map(|r| r.try_get::<Value, _>("value"))
        .transpose()
        .map_err(map_sqlx_error)
}

/// Insert or replace a value.
///
/// # Errors
///
/// Retryable conflict on serialization failure, internal error otherwise.
pub async fn put(tx: &mut PgTx, key: &str, value: &Value) -> Result<(), ApiError> {
    sqlx::query(
        r"
        INSERT INTO txapi_kv (key, value) VALUES ($1, $2)
        ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
        ",
    )
    .bind(key)
    .bind(value)
    .execute(tx.conn())
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

/// Delete a value. Returns whether it existed.
///
/// # Errors
///
/// Retryable conflict on serialization failure, internal error otherwise.
pub async fn delete(tx: &mut PgTx, key: &str) -> Result<bool, ApiError> {
    let result = sqlx::query("DELETE FROM txapi_kv WHERE key = $1")
        .bind(key)
        .execute(tx.conn())
        .await
        .map_err(map_sqlx_error)?;
    Ok(result.rows_affected() > 0)
}
