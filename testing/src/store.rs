//! In-memory transactional store for fast, deterministic tests.
//!
//! Records are JSON values keyed by string, each with a version number.
//! Transactions buffer their writes and validate the versions they read at
//! commit time (optimistic concurrency): if any record read by the
//! transaction changed since, the commit fails with a retryable
//! [`ApiError::write_conflict`] and nothing is written.
//!
//! Conflicts can also be injected with [`InMemoryStore::inject_conflicts`] to
//! exercise retry paths without real concurrency.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use txapi_core::ApiError;
use txapi_runtime::{Transaction, TransactionalStore};

#[derive(Debug, Clone)]
struct Versioned {
    value: Value,
    version: u64,
}

#[derive(Debug, Default)]
struct Shared {
    records: RwLock<HashMap<String, Versioned>>,
    /// Last version handed out; versions are never reused.
    sequence: AtomicU64,
    pending_conflicts: AtomicU32,
    begins: AtomicU32,
    commits: AtomicU32,
    rollbacks: AtomicU32,
    conflicts: AtomicU32,
}

impl Shared {
    fn next_version(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// In-memory optimistic-concurrency store.
///
/// Cloning shares the data.
///
/// # Example
///
/// ```
/// use txapi_testing::InMemoryStore;
/// use txapi_runtime::{Transaction, TransactionalStore};
/// use serde_json::json;
///
/// # async fn example() -> Result<(), txapi_core::ApiError> {
/// let store = InMemoryStore::new();
///
/// let mut tx = store.begin(false).await?;
/// tx.put("counter", json!(1))?;
/// tx.commit().await?;
///
/// assert_eq!(store.value("counter"), Some(json!(1)));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a record outside any transaction.
    pub fn seed(&self, key: impl Into<String>, value: Value) {
        let mut records = self
            .shared
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let version = self.shared.next_version();
        records.insert(key.into(), Versioned { value, version });
    }

    /// Current committed value of a record.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<Value> {
        self.shared
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|r| r.value.clone())
    }

    /// All committed records.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.shared
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, r)| (k.clone(), r.value.clone()))
            .collect()
    }

    /// Make the next `count` read-write commits fail with a write conflict.
    pub fn inject_conflicts(&self, count: u32) {
        self.shared.pending_conflicts.store(count, Ordering::SeqCst);
    }

    /// Number of transactions begun.
    #[must_use]
    pub fn begins(&self) -> u32 {
        self.shared.begins.load(Ordering::SeqCst)
    }

    /// Number of successful commits.
    #[must_use]
    pub fn commits(&self) -> u32 {
        self.shared.commits.load(Ordering::SeqCst)
    }

    /// Number of rollbacks.
    #[must_use]
    pub fn rollbacks(&self) -> u32 {
        self.shared.rollbacks.load(Ordering::SeqCst)
    }

    /// Number of commits rejected with a conflict, injected or real.
    #[must_use]
    pub fn conflicts(&self) -> u32 {
        self.shared.conflicts.load(Ordering::SeqCst)
    }
}

impl TransactionalStore for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self, read_only: bool) -> Result<InMemoryTx, ApiError> {
        self.shared.begins.fetch_add(1, Ordering::SeqCst);
        Ok(InMemoryTx {
            shared: Arc::clone(&self.shared),
            read_only,
            reads: HashMap::new(),
            writes: HashMap::new(),
        })
    }
}

/// A transaction on an [`InMemoryStore`].
///
/// Writes are buffered and only become visible on commit.
#[derive(Debug)]
pub struct InMemoryTx {
    shared: Arc<Shared>,
    read_only: bool,
    /// Version observed per key, 0 when absent.
    reads: HashMap<String, u64>,
    /// `None` marks a delete.
    writes: HashMap<String, Option<Value>>,
}

impl InMemoryTx {
    /// Read a record, seeing this transaction's own writes.
    ///
    /// # Errors
    ///
    /// Never fails; the signature matches real stores.
    pub fn get(&mut self, key: &str) -> Result<Option<Value>, ApiError> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        let records = self
            .shared
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let record = records.get(key);
        self.reads
            .entry(key.to_string())
            .or_insert_with(|| record.map_or(0, |r| r.version));
        Ok(record.map(|r| r.value.clone()))
    }

    /// Buffer a write.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is read-only.
    pub fn put(&mut self, key: impl Into<String>, value: Value) -> Result<(), ApiError> {
        self.ensure_writable()?;
        self.writes.insert(key.into(), Some(value));
        Ok(())
    }

    /// Buffer a delete.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is read-only.
    pub fn delete(&mut self, key: impl Into<String>) -> Result<(), ApiError> {
        self.ensure_writable()?;
        self.writes.insert(key.into(), None);
        Ok(())
    }

    /// Whether the transaction is read-only.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn ensure_writable(&self) -> Result<(), ApiError> {
        if self.read_only {
            Err(ApiError::internal("cannot write in a read-only transaction"))
        } else {
            Ok(())
        }
    }

    fn take_injected_conflict(&self) -> bool {
        self.shared
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Transaction for InMemoryTx {
    async fn commit(self) -> Result<(), ApiError> {
        if self.read_only {
            return Ok(());
        }

        if self.take_injected_conflict() {
            self.shared.conflicts.fetch_add(1, Ordering::SeqCst);
            return Err(ApiError::write_conflict("injected write conflict"));
        }

        let mut records = self
            .shared
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let stale = self
            .reads
            .iter()
            .find(|(key, seen)| records.get(key.as_str()).map_or(0, |r| r.version) != **seen);
        if let Some((key, _)) = stale {
            self.shared.conflicts.fetch_add(1, Ordering::SeqCst);
            return Err(ApiError::write_conflict(format!(
                "record {key} was modified concurrently"
            )));
        }

        for (key, write) in self.writes {
            match write {
                Some(value) => {
                    let version = self.shared.next_version();
                    records.insert(key, Versioned { value, version });
                }
                None => {
                    records.remove(&key);
                }
            }
        }
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self) -> Result<(), ApiError> {
        self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
