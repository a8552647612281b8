//! Database Runtime
//!
//! The façade callers talk to. It owns the lifecycle, the operation queue, the
//! transaction manager, and the open store handle. Each [`DatabaseRuntime`] is
//! an independent handle; clones share the same state.

use crate::backend::{SledOpener, Store, StoreOpener, TransactionMode};
use crate::collection::CollectionStore;
use crate::config::StrongboxConfig;
use crate::error::RuntimeError;
use crate::init::InitializationManager;
use crate::lifecycle::{LifecycleState, ListenerId, StateEmitter, StateTransition};
use crate::queue::{Priority, QueueConfig, QueueManager, QueueStats};
use crate::record::{DocumentRecord, Record};
use crate::transaction::{
    TransactionInfo, TransactionManager, TransactionScope, TransactionStats,
    DEFAULT_TRANSACTION_TIMEOUT,
};
use futures::FutureExt;
use parking_lot::{ReentrantMutex, RwLock};
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Tuning knobs for one runtime.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub queue: QueueConfig,
    pub transaction_timeout: Duration,
    /// Default bound for [`DatabaseRuntime::wait_for_initialization`]
    pub init_timeout: Option<Duration>,
    /// Bound on opening the store
    pub open_timeout: Option<Duration>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
            init_timeout: None,
            open_timeout: None,
        }
    }
}

/// Point-in-time view of a runtime, printed by `strongbox status`.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub state: LifecycleState,
    pub queue: QueueStats,
    pub transactions: TransactionStats,
    pub active_transactions: Vec<TransactionInfo>,
    pub collections: Vec<String>,
    pub history: Vec<StateTransition>,
}

struct RuntimeInner {
    emitter: StateEmitter,
    init: Arc<InitializationManager>,
    queue: QueueManager,
    transactions: TransactionManager,
    opener: Arc<dyn StoreOpener>,
    store: RwLock<Option<Arc<dyn Store>>>,
    /// Bumped by every reset; an open that started in an older epoch is stale.
    epoch: AtomicU64,
    /// Serializes epoch changes with installing an opened store. Reentrant so a
    /// state listener may call back into the runtime.
    lifecycle: ReentrantMutex<()>,
    options: RuntimeOptions,
}

/// Cloneable handle to one data-access runtime.
#[derive(Clone)]
pub struct DatabaseRuntime {
    inner: Arc<RuntimeInner>,
}

impl std::fmt::Debug for DatabaseRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseRuntime")
            .field("state", &self.state())
            .field("pending", &self.inner.queue.len())
            .finish_non_exhaustive()
    }
}

impl DatabaseRuntime {
    pub fn new(opener: impl StoreOpener + 'static, options: RuntimeOptions) -> Self {
        Self::with_opener(Arc::new(opener), options)
    }

    pub fn with_opener(opener: Arc<dyn StoreOpener>, options: RuntimeOptions) -> Self {
        let emitter = StateEmitter::new();
        let init = Arc::new(InitializationManager::new());
        let signal = Arc::clone(&init);
        emitter.add_listener(move |state| signal.handle_state_change(state));

        Self {
            inner: Arc::new(RuntimeInner {
                emitter,
                init,
                queue: QueueManager::new(options.queue.clone()),
                transactions: TransactionManager::new(options.transaction_timeout),
                opener,
                store: RwLock::new(None),
                epoch: AtomicU64::new(0),
                lifecycle: ReentrantMutex::new(()),
                options,
            }),
        }
    }

    /// Build a runtime over the sled store described by `config`.
    pub fn from_config(config: &StrongboxConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        let opener: SledOpener = config.storage.opener()?;
        Ok(Self::new(opener, config.runtime.options()))
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.inner.options
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.emitter.state()
    }

    /// Open the store once. Concurrent callers share a single attempt and its
    /// outcome.
    pub async fn initialize(&self) -> Result<(), RuntimeError> {
        match self
            .inner
            .emitter
            .transition(LifecycleState::Uninitialized, LifecycleState::Initializing)
        {
            Ok(()) => {
                let epoch = self.inner.epoch.load(Ordering::SeqCst);
                let runtime = self.clone();
                // Outlives this caller if it stops waiting
                tokio::spawn(async move { runtime.open_store(epoch).await });
            }
            Err(LifecycleState::Ready) => return Ok(()),
            Err(LifecycleState::Initializing) => {
                debug!("Initialization already in progress, waiting on it");
            }
            Err(LifecycleState::Error) => return Err(self.latched_error()),
            Err(from @ LifecycleState::Uninitialized) => {
                return Err(RuntimeError::InvalidTransition {
                    from,
                    to: LifecycleState::Initializing,
                })
            }
        }
        self.wait_for_initialization(None).await
    }

    async fn open_store(&self, epoch: u64) {
        let started = Instant::now();
        info!(open_timeout = ?self.inner.options.open_timeout, "Initializing runtime");

        let opened = AssertUnwindSafe(self.open_bounded())
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(RuntimeError::Initialization("store opener panicked".into())));

        let ready = {
            let _lifecycle = self.inner.lifecycle.lock();
            if self.inner.epoch.load(Ordering::SeqCst) != epoch {
                warn!("Runtime was reset while the store was opening, discarding result");
                return;
            }
            self.finish_open(opened, started)
        };
        if ready {
            self.schedule_drain();
        }
    }

    /// Install the open outcome. Runs under the lifecycle lock with the epoch
    /// already checked; returns whether the runtime became ready.
    fn finish_open(
        &self,
        opened: Result<Arc<dyn Store>, RuntimeError>,
        started: Instant,
    ) -> bool {
        match opened {
            Ok(store) => {
                *self.inner.store.write() = Some(store);
                match self
                    .inner
                    .emitter
                    .transition(LifecycleState::Initializing, LifecycleState::Ready)
                {
                    Ok(()) => {
                        info!(
                            duration_ms = started.elapsed().as_millis() as u64,
                            pending = self.inner.queue.len(),
                            "Runtime ready"
                        );
                        true
                    }
                    Err(observed) => {
                        *self.inner.store.write() = None;
                        warn!(state = %observed, "Runtime left Initializing before the store opened");
                        false
                    }
                }
            }
            Err(err) => {
                error!(
                    duration_ms = started.elapsed().as_millis() as u64,
                    error = %err,
                    "Initialization failed"
                );
                self.inner.init.note_failure(err.clone());
                if self
                    .inner
                    .emitter
                    .transition(LifecycleState::Initializing, LifecycleState::Error)
                    .is_ok()
                {
                    self.inner
                        .queue
                        .reject_all(RuntimeError::RuntimeErrorState(err.to_string()));
                }
                false
            }
        }
    }

    async fn open_bounded(&self) -> Result<Arc<dyn Store>, RuntimeError> {
        let open = self.inner.opener.open();
        let result = match self.inner.options.open_timeout {
            Some(limit) => tokio::time::timeout(limit, open).await.map_err(|_| {
                RuntimeError::Initialization(format!("store did not open within {:?}", limit))
            })?,
            None => open.await,
        };
        result.map_err(|e| RuntimeError::Initialization(e.to_string()))
    }

    /// Wait for `Ready`. Falls back to the configured `init_timeout`.
    pub async fn wait_for_initialization(
        &self,
        timeout: Option<Duration>,
    ) -> Result<(), RuntimeError> {
        let timeout = timeout.or(self.inner.options.init_timeout);
        self.inner.init.wait_for_initialization(timeout).await
    }

    /// Queue `operation` at normal priority and wait for its result.
    pub async fn queue_operation<T, F, Fut>(&self, operation: F) -> Result<T, RuntimeError>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, RuntimeError>> + Send + 'static,
    {
        self.queue_operation_with_priority(Priority::NORMAL, operation)
            .await
    }

    /// Queue `operation` and wait for its result.
    ///
    /// Work always goes through the queue, even when the runtime is ready, so
    /// submission order is preserved. `operation` runs once per attempt and
    /// must not itself wait on another queued operation.
    pub async fn queue_operation_with_priority<T, F, Fut>(
        &self,
        priority: Priority,
        operation: F,
    ) -> Result<T, RuntimeError>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, RuntimeError>> + Send + 'static,
    {
        if self.state() == LifecycleState::Error {
            return Err(self.latched_error());
        }
        let (id, rx) = self.inner.queue.enqueue(priority, operation)?;
        if self.state() == LifecycleState::Error {
            // Raced with mark_as_error
            self.inner.queue.reject_all(self.latched_error());
        } else {
            self.schedule_drain();
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => {
                debug!(operation_id = id.as_u64(), "Operation discarded before dispatch");
                Err(RuntimeError::OperationDiscarded)
            }
        }
    }

    fn schedule_drain(&self) {
        if self.state() != LifecycleState::Ready || self.inner.queue.is_empty() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner
                .queue
                .process_queue(|| inner.emitter.state() == LifecycleState::Ready)
                .await;
        });
    }

    /// Latch the runtime in `Error`. Pending operations are rejected and the
    /// store handle is released.
    pub fn mark_as_error(&self, err: RuntimeError) {
        let reason = err.to_string();
        error!(error = %reason, "Runtime marked as failed");
        let _lifecycle = self.inner.lifecycle.lock();
        self.inner
            .init
            .note_failure(RuntimeError::RuntimeErrorState(reason.clone()));
        self.inner.emitter.force(LifecycleState::Error);
        *self.inner.store.write() = None;
        self.inner
            .queue
            .reject_all(RuntimeError::RuntimeErrorState(reason));
    }

    /// Return to `Uninitialized`, discarding pending work.
    pub fn reset(&self) {
        let _lifecycle = self.inner.lifecycle.lock();
        let discarded = self.inner.queue.clear();
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        *self.inner.store.write() = None;
        self.inner.init.reset();
        self.inner.emitter.force(LifecycleState::Uninitialized);
        info!(discarded, "Runtime reset");
    }

    /// Discard pending operations. Their callers get `OperationDiscarded`.
    pub fn clear(&self) -> usize {
        self.inner.queue.clear()
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.queue.stats()
    }

    pub fn transaction_stats(&self) -> TransactionStats {
        self.inner.transactions.stats()
    }

    pub fn status(&self) -> RuntimeStatus {
        let collections = match self.inner.store.read().as_ref() {
            Some(store) => store.collections().unwrap_or_else(|e| {
                warn!(error = %e, "Failed to list collections");
                Vec::new()
            }),
            None => Vec::new(),
        };
        RuntimeStatus {
            state: self.state(),
            queue: self.stats(),
            transactions: self.inner.transactions.stats(),
            active_transactions: self.inner.transactions.active(),
            collections,
            history: self.inner.emitter.history(),
        }
    }

    pub fn add_state_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(LifecycleState) + Send + Sync + 'static,
    {
        self.inner.emitter.add_listener(listener)
    }

    pub fn remove_state_listener(&self, id: ListenerId) -> bool {
        self.inner.emitter.remove_listener(id)
    }

    /// The open store, or why there is none.
    pub fn store(&self) -> Result<Arc<dyn Store>, RuntimeError> {
        if let Some(store) = self.inner.store.read().as_ref() {
            return Ok(Arc::clone(store));
        }
        match self.state() {
            LifecycleState::Error => Err(self.latched_error()),
            state => Err(RuntimeError::RuntimeErrorState(format!(
                "store is not open (state: {})",
                state
            ))),
        }
    }

    /// Run `work` in a transaction on `collection` under the default deadline.
    ///
    /// This does not go through the queue; queued operations call it.
    pub async fn transaction<T, F, Fut>(
        &self,
        collection: &str,
        mode: TransactionMode,
        work: F,
    ) -> Result<T, RuntimeError>
    where
        F: FnOnce(TransactionScope) -> Fut,
        Fut: Future<Output = Result<T, RuntimeError>>,
    {
        let store = self.store()?;
        self.inner
            .transactions
            .execute(store.as_ref(), collection, mode, work)
            .await
    }

    pub async fn transaction_with_timeout<T, F, Fut>(
        &self,
        collection: &str,
        mode: TransactionMode,
        timeout: Duration,
        work: F,
    ) -> Result<T, RuntimeError>
    where
        F: FnOnce(TransactionScope) -> Fut,
        Fut: Future<Output = Result<T, RuntimeError>>,
    {
        let store = self.store()?;
        self.inner
            .transactions
            .execute_with_timeout(store.as_ref(), collection, mode, timeout, work)
            .await
    }

    /// Apply `op` to every item in one read-write transaction on `collection`.
    pub async fn batch_operation<I, F>(
        &self,
        collection: &str,
        items: Vec<I>,
        op: F,
    ) -> Result<usize, RuntimeError>
    where
        F: Fn(&TransactionScope, I) -> Result<(), RuntimeError>,
    {
        let store = self.store()?;
        self.inner
            .transactions
            .batch_operation(store.as_ref(), collection, items, op)
            .await
    }

    pub fn collection<R: Record>(&self, name: &str) -> CollectionStore<R> {
        CollectionStore::new(self.clone(), name)
    }

    pub async fn get_all<R: Record>(&self, collection: &str) -> Result<Vec<R>, RuntimeError> {
        self.collection::<R>(collection).get_all().await
    }

    pub async fn get<R: Record>(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<R>, RuntimeError> {
        self.collection::<R>(collection).get(id).await
    }

    pub async fn put<R: Record>(&self, collection: &str, record: R) -> Result<(), RuntimeError> {
        self.collection::<R>(collection).put(record).await
    }

    pub async fn put_many<R: Record>(
        &self,
        collection: &str,
        records: Vec<R>,
    ) -> Result<usize, RuntimeError> {
        self.collection::<R>(collection).put_many(records).await
    }

    /// Remove a record by id. Deletion never decodes, so no record type is
    /// needed.
    pub async fn delete(&self, collection: &str, id: &str) -> Result<bool, RuntimeError> {
        self.collection::<DocumentRecord>(collection)
            .delete(id)
            .await
    }

    fn latched_error(&self) -> RuntimeError {
        match self.inner.init.outcome() {
            Some(Err(RuntimeError::RuntimeErrorState(reason))) => {
                RuntimeError::RuntimeErrorState(reason)
            }
            Some(Err(err)) => RuntimeError::RuntimeErrorState(err.to_string()),
            _ => RuntimeError::RuntimeErrorState("runtime is in the error state".into()),
        }
    }
}
