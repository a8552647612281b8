//! Transaction Wrapper
//!
//! Runs one unit of work against a named collection with a deadline. Every
//! transaction ends in exactly one of committed, aborted, or timed out, and its
//! registration is removed exactly once whichever way it ends, including when
//! the caller drops the future.

use crate::backend::{Store, StoreTransaction, TransactionMode};
use crate::error::{RuntimeError, StorageError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
    TimedOut,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionState::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Snapshot of an in-flight transaction.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionInfo {
    pub id: TransactionId,
    pub collection: String,
    pub mode: TransactionMode,
    pub started_at: DateTime<Utc>,
    pub deadline: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransactionStats {
    pub committed: usize,
    pub aborted: usize,
    pub timed_out: usize,
}

struct CellInner {
    state: TransactionState,
    handle: Option<Box<dyn StoreTransaction>>,
}

/// Shared by the wrapper and every [`TransactionScope`] clone.
struct TransactionCell {
    id: TransactionId,
    collection: String,
    mode: TransactionMode,
    started: Instant,
    deadline: Instant,
    inner: Mutex<CellInner>,
}

impl TransactionCell {
    fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    /// Commit if still active and inside the deadline. The lock is held across
    /// the commit so a racing timeout cannot interleave.
    fn commit(&self) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Active {
            return Err(self.inactive_error(inner.state));
        }
        let now = Instant::now();
        if now >= self.deadline {
            // Work that overran without yielding still loses to the deadline
            inner.state = TransactionState::TimedOut;
            if let Some(handle) = inner.handle.take() {
                if self.mode.is_writable() {
                    handle.abort();
                }
            }
            return Err(RuntimeError::TransactionTimeout {
                collection: self.collection.clone(),
                elapsed: now.duration_since(self.started),
            });
        }
        let handle = inner.handle.take();
        let result = match handle {
            Some(handle) => handle.commit(),
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                inner.state = TransactionState::Committed;
                Ok(())
            }
            Err(err) => {
                // Nothing was applied; the batch is gone with the handle.
                inner.state = TransactionState::Aborted;
                Err(RuntimeError::transaction(&self.collection, err.to_string()))
            }
        }
    }

    /// Move to `terminal` and roll back, unless a terminal state was already
    /// reached. Returns whether this call won.
    fn roll_back(&self, terminal: TransactionState) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Active {
            return false;
        }
        inner.state = terminal;
        if let Some(handle) = inner.handle.take() {
            if self.mode.is_writable() {
                handle.abort();
            } else {
                // Nothing to roll back for reads
                drop(handle);
            }
        }
        true
    }

    fn inactive_error(&self, state: TransactionState) -> RuntimeError {
        RuntimeError::transaction(
            &self.collection,
            format!("transaction is no longer active ({:?})", state),
        )
    }

    fn with_handle<R>(
        &self,
        f: impl FnOnce(&mut dyn StoreTransaction) -> Result<R, StorageError>,
    ) -> Result<R, RuntimeError> {
        let mut inner = self.inner.lock();
        let state = inner.state;
        match inner.handle.as_mut() {
            Some(handle) if state == TransactionState::Active => {
                f(handle.as_mut()).map_err(RuntimeError::from)
            }
            _ => Err(self.inactive_error(state)),
        }
    }
}

/// Access to the collection inside a running transaction.
#[derive(Clone)]
pub struct TransactionScope {
    cell: Arc<TransactionCell>,
}

impl TransactionScope {
    pub fn id(&self) -> TransactionId {
        self.cell.id
    }

    pub fn collection(&self) -> &str {
        &self.cell.collection
    }

    pub fn mode(&self) -> TransactionMode {
        self.cell.mode
    }

    pub fn state(&self) -> TransactionState {
        self.cell.state()
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, RuntimeError> {
        self.cell.with_handle(|txn| txn.get(key))
    }

    pub fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, RuntimeError> {
        self.cell.with_handle(|txn| txn.scan())
    }

    pub fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), RuntimeError> {
        self.cell.with_handle(|txn| txn.put(key, value))
    }

    pub fn delete(&self, key: &[u8]) -> Result<(), RuntimeError> {
        self.cell.with_handle(|txn| txn.delete(key))
    }
}

/// Deregisters and rolls back (if still active) exactly once.
struct CleanupGuard<'a> {
    cell: Arc<TransactionCell>,
    registry: &'a Mutex<HashMap<TransactionId, TransactionInfo>>,
    aborted: &'a AtomicUsize,
    done: bool,
}

impl CleanupGuard<'_> {
    fn cleanup(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        // Dropped mid-flight: treat as an abort
        if self.cell.roll_back(TransactionState::Aborted) {
            self.aborted.fetch_add(1, Ordering::Relaxed);
            debug!(
                transaction_id = self.cell.id.as_u64(),
                collection = %self.cell.collection,
                "Transaction dropped while active, rolled back"
            );
        }
        self.registry.lock().remove(&self.cell.id);
    }
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Opens, times, and finishes transactions.
pub struct TransactionManager {
    default_timeout: Duration,
    registry: Mutex<HashMap<TransactionId, TransactionInfo>>,
    next_id: AtomicU64,
    committed: AtomicUsize,
    aborted: AtomicUsize,
    timed_out: AtomicUsize,
}

impl TransactionManager {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            registry: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            committed: AtomicUsize::new(0),
            aborted: AtomicUsize::new(0),
            timed_out: AtomicUsize::new(0),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run `work` in a transaction bounded by the default timeout.
    pub async fn execute<T, F, Fut>(
        &self,
        store: &dyn Store,
        collection: &str,
        mode: TransactionMode,
        work: F,
    ) -> Result<T, RuntimeError>
    where
        F: FnOnce(TransactionScope) -> Fut,
        Fut: Future<Output = Result<T, RuntimeError>>,
    {
        self.execute_with_timeout(store, collection, mode, self.default_timeout, work)
            .await
    }

    /// Run `work` in a transaction that must finish within `timeout`.
    ///
    /// On success the transaction commits. On error or timeout it is rolled
    /// back (read-write) or abandoned (read-only) before the error is returned.
    pub async fn execute_with_timeout<T, F, Fut>(
        &self,
        store: &dyn Store,
        collection: &str,
        mode: TransactionMode,
        timeout: Duration,
        work: F,
    ) -> Result<T, RuntimeError>
    where
        F: FnOnce(TransactionScope) -> Fut,
        Fut: Future<Output = Result<T, RuntimeError>>,
    {
        let handle = store
            .begin(collection, mode)
            .map_err(|e| RuntimeError::transaction(collection, e.to_string()))?;

        let id = TransactionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let started = Instant::now();
        let cell = Arc::new(TransactionCell {
            id,
            collection: collection.to_string(),
            mode,
            started,
            deadline: started + timeout,
            inner: Mutex::new(CellInner {
                state: TransactionState::Active,
                handle: Some(handle),
            }),
        });
        self.registry.lock().insert(
            id,
            TransactionInfo {
                id,
                collection: collection.to_string(),
                mode,
                started_at: Utc::now(),
                deadline: timeout,
            },
        );
        let mut guard = CleanupGuard {
            cell: Arc::clone(&cell),
            registry: &self.registry,
            aborted: &self.aborted,
            done: false,
        };
        debug!(
            transaction_id = id.as_u64(),
            collection,
            mode = ?mode,
            timeout_ms = timeout.as_millis() as u64,
            "Transaction started"
        );

        let scope = TransactionScope {
            cell: Arc::clone(&cell),
        };
        let outcome = tokio::time::timeout(timeout, work(scope)).await;

        let result = match outcome {
            Ok(Ok(value)) => match cell.commit() {
                Ok(()) => {
                    self.committed.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        transaction_id = id.as_u64(),
                        collection,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Transaction committed"
                    );
                    Ok(value)
                }
                Err(err @ RuntimeError::TransactionTimeout { .. }) => {
                    self.timed_out.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        transaction_id = id.as_u64(),
                        collection,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Work finished past the deadline, rolled back"
                    );
                    Err(err)
                }
                Err(err) => {
                    self.aborted.fetch_add(1, Ordering::Relaxed);
                    warn!(transaction_id = id.as_u64(), collection, error = %err, "Commit failed");
                    Err(err)
                }
            },
            Ok(Err(err)) => {
                if cell.roll_back(TransactionState::Aborted) {
                    self.aborted.fetch_add(1, Ordering::Relaxed);
                }
                debug!(
                    transaction_id = id.as_u64(),
                    collection,
                    error = %err,
                    "Transaction aborted"
                );
                Err(wrap_failure(collection, err))
            }
            Err(_elapsed) => {
                let elapsed = started.elapsed();
                if cell.roll_back(TransactionState::TimedOut) {
                    self.timed_out.fetch_add(1, Ordering::Relaxed);
                }
                warn!(
                    transaction_id = id.as_u64(),
                    collection,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Transaction timed out, rolled back"
                );
                Err(RuntimeError::TransactionTimeout {
                    collection: collection.to_string(),
                    elapsed,
                })
            }
        };

        guard.cleanup();
        result
    }

    /// Apply `op` to every item in one read-write transaction. Any failure
    /// aborts the whole batch.
    pub async fn batch_operation<I, F>(
        &self,
        store: &dyn Store,
        collection: &str,
        items: Vec<I>,
        op: F,
    ) -> Result<usize, RuntimeError>
    where
        F: Fn(&TransactionScope, I) -> Result<(), RuntimeError>,
    {
        let count = items.len();
        self.execute(store, collection, TransactionMode::ReadWrite, |scope| async move {
            for (index, item) in items.into_iter().enumerate() {
                op(&scope, item).map_err(|err| {
                    debug!(index, error = %err, "Batch item failed");
                    err
                })?;
            }
            Ok(count)
        })
        .await
    }

    /// In-flight transactions, oldest first.
    pub fn active(&self) -> Vec<TransactionInfo> {
        let mut active: Vec<TransactionInfo> = self.registry.lock().values().cloned().collect();
        active.sort_by_key(|info| info.id.as_u64());
        active
    }

    pub fn stats(&self) -> TransactionStats {
        TransactionStats {
            committed: self.committed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSACTION_TIMEOUT)
    }
}

/// Store failures become transaction errors; typed errors from the unit of
/// work pass through.
fn wrap_failure(collection: &str, err: RuntimeError) -> RuntimeError {
    match err {
        RuntimeError::Storage(message) => RuntimeError::transaction(collection, message),
        other => other,
    }
}
