//! `PostgreSQL` transactional store for txapi.
//!
//! Every attempt runs in its own `SERIALIZABLE` transaction, so concurrent
//! requests that touch the same rows fail with a serialization error instead
//! of silently interleaving. Those errors (SQLSTATE `40001` and deadlocks,
//! `40P01`) are mapped to retryable write conflicts, which the attempt runner
//! retries with backoff.
//!
//! # Example
//!
//! ```ignore
//! use txapi_postgres::PgStore;
//! use txapi_runtime::{RequestLifecycle, TransactionOptions};
//!
//! async fn example() -> Result<(), txapi_core::ApiError> {
//!     let store = PgStore::connect("postgres://localhost/mydb").await?;
//!     let lifecycle = RequestLifecycle::new(&store, TransactionOptions::default());
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::Postgres;
use std::fmt;
use txapi_core::ApiError;
use txapi_runtime::{Transaction, TransactionalStore};

/// JSON key/value table helpers
pub mod kv;

/// SQLSTATE for `serialization_failure`.
pub const SERIALIZATION_FAILURE: &str = "40001";

/// SQLSTATE for `deadlock_detected`.
pub const DEADLOCK_DETECTED: &str = "40P01";

/// `PostgreSQL` store handing out one serializable transaction per attempt.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to `database_url` with a default pool.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the database is unreachable.
    pub async fn connect(database_url: &str) -> Result<Self, ApiError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self { pool })
    }

    /// Use an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl TransactionalStore for PgStore {
    type Tx = PgTx;

    async fn begin(&self, read_only: bool) -> Result<PgTx, ApiError> {
        let mut inner = self.pool.begin().await.map_err(map_sqlx_error)?;
        let isolation = if read_only {
            "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE, READ ONLY"
        } else {
            "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"
        };
        sqlx::query(isolation)
            .execute(&mut *inner)
            .await
            .map_err(map_sqlx_error)?;
        Ok(PgTx { inner, read_only })
    }
}

/// One attempt's transaction.
///
/// Dropping it without committing rolls it back.
pub struct PgTx {
    inner: sqlx::Transaction<'static, Postgres>,
    read_only: bool,
}

impl fmt::Debug for PgTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgTx")
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl PgTx {
    /// Connection to run queries on.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.inner
    }

    /// Whether the transaction was started read-only.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl Transaction for PgTx {
    async fn commit(self) -> Result<(), ApiError> {
        self.inner.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self) -> Result<(), ApiError> {
        self.inner.rollback().await.map_err(map_sqlx_error)
    }
}

/// Convert a sqlx error, classifying serialization failures and deadlocks
/// as retryable write conflicts.
#[must_use]
pub fn map_sqlx_error(err: sqlx::Error) -> ApiError {
    if let Some(message) = conflict_message(&err) {
        tracing::debug!(error = %message, "Serialization conflict");
        return ApiError::write_conflict(message).with_source(err);
    }
    if matches!(err, sqlx::Error::RowNotFound) {
        return ApiError::not_found("row not found").with_source(err);
    }
    ApiError::internal(format!("database error: {err}")).with_source(err)
}

fn conflict_message(err: &sqlx::Error) -> Option<String> {
    let sqlx::Error::Database(db) = err else {
        return None;
    };
    matches!(
        db.code().as_deref(),
        Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED)
    )
    .then(|| db.message().to_string())
}
