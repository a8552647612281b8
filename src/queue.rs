//! Deferred Operation Queue
//!
//! Holds operations submitted before the store is ready and drains them in
//! priority order once it is. Failed operations are retried with backoff up to a
//! fixed bound before their caller sees the error.

use crate::error::RuntimeError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::futures::Notified;
use tokio::sync::{oneshot, Notify};
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Priority of a queued operation. Higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(pub i32);

impl Priority {
    pub const LOW: Priority = Priority(-10);
    pub const NORMAL: Priority = Priority(0);
    pub const HIGH: Priority = Priority(10);
    pub const URGENT: Priority = Priority(100);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

/// Identifier assigned at enqueue time, unique per queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(u64);

impl OperationId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Delay strategy between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// `retry_delay * retry_count`
    #[default]
    Linear,
    /// `retry_delay * 2^(retry_count - 1)`
    Exponential,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Upper bound on any single backoff wait
    pub max_retry_delay: Duration,
    pub backoff: BackoffPolicy,
    /// Pending operations accepted before enqueue fails with `QueueOverflow`
    pub max_queue_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            max_retry_delay: Duration::from_secs(30),
            backoff: BackoffPolicy::Linear,
            max_queue_size: 10_000,
        }
    }
}

impl QueueConfig {
    /// Backoff before the given retry (1-based).
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let delay = match self.backoff {
            BackoffPolicy::Linear => self.retry_delay.saturating_mul(retry_count),
            BackoffPolicy::Exponential => {
                let exponent = retry_count.saturating_sub(1).min(31);
                self.retry_delay.saturating_mul(1u32 << exponent)
            }
        };
        delay.min(self.max_retry_delay)
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Operations waiting in the backlog
    pub pending: usize,
    /// Operations currently executing
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    /// Retry attempts scheduled
    pub retried: usize,
}

/// Type-erased unit of work plus its completion channel.
#[async_trait]
trait Deferred: Send {
    /// Run the operation once. On success the caller has been resolved.
    async fn attempt(&mut self) -> Result<(), RuntimeError>;

    fn reject(self: Box<Self>, err: RuntimeError);
}

struct DeferredOperation<T, F> {
    operation: F,
    completion: Option<oneshot::Sender<Result<T, RuntimeError>>>,
}

#[async_trait]
impl<T, F, Fut> Deferred for DeferredOperation<T, F>
where
    T: Send + 'static,
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, RuntimeError>> + Send,
{
    async fn attempt(&mut self) -> Result<(), RuntimeError> {
        let value = (self.operation)().await?;
        if let Some(tx) = self.completion.take() {
            // Receiver gone means the caller stopped waiting.
            let _ = tx.send(Ok(value));
        }
        Ok(())
    }

    fn reject(mut self: Box<Self>, err: RuntimeError) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(Err(err));
        }
    }
}

/// A deferred unit of work owned by the queue until dispatched.
pub struct QueuedOperation {
    pub id: OperationId,
    pub priority: Priority,
    pub retry_count: u32,
    pub enqueued_at: Instant,
    work: Box<dyn Deferred>,
}

impl std::fmt::Debug for QueuedOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedOperation")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("retry_count", &self.retry_count)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Backlog {
    items: VecDeque<QueuedOperation>,
    draining: bool,
    /// Bumped by clear/reject_all; a retry from an older generation is dropped
    generation: u64,
}

impl Backlog {
    /// Insert after every entry of equal or higher priority, so the backlog
    /// stays ordered by (priority desc, arrival asc).
    fn insert_ordered(&mut self, op: QueuedOperation) {
        let position = self
            .items
            .iter()
            .rposition(|queued| queued.priority >= op.priority)
            .map(|index| index + 1)
            .unwrap_or(0);
        self.items.insert(position, op);
    }
}

enum Step {
    Done,
    Retry(RuntimeError),
    Fail(RuntimeError),
}

/// Resets the draining flag if a drain is cancelled mid-way.
struct DrainGuard<'a> {
    backlog: &'a Mutex<Backlog>,
    armed: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.backlog.lock().draining = false;
        }
    }
}

pub struct QueueManager {
    backlog: Mutex<Backlog>,
    config: QueueConfig,
    stats: Mutex<QueueStats>,
    next_id: AtomicU64,
    /// Wakes a backoff wait early on clear/reject_all
    cancel_backoff: Notify,
}

impl QueueManager {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            backlog: Mutex::new(Backlog::default()),
            config,
            stats: Mutex::new(QueueStats::default()),
            next_id: AtomicU64::new(1),
            cancel_backoff: Notify::new(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Add an operation to the backlog.
    ///
    /// `operation` is called once per attempt, so it may run up to
    /// `max_retries + 1` times. The returned receiver resolves with the final
    /// result, or errors if the operation is discarded by [`clear`](Self::clear).
    pub fn enqueue<T, F, Fut>(
        &self,
        priority: Priority,
        operation: F,
    ) -> Result<(OperationId, oneshot::Receiver<Result<T, RuntimeError>>), RuntimeError>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, RuntimeError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let mut backlog = self.backlog.lock();

        if backlog.items.len() >= self.config.max_queue_size {
            warn!(
                queue_size = backlog.items.len(),
                max_size = self.config.max_queue_size,
                "Operation queue is full, rejecting operation"
            );
            return Err(RuntimeError::QueueOverflow {
                limit: self.config.max_queue_size,
            });
        }

        let id = OperationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        backlog.insert_ordered(QueuedOperation {
            id,
            priority,
            retry_count: 0,
            enqueued_at: Instant::now(),
            work: Box::new(DeferredOperation {
                operation,
                completion: Some(tx),
            }),
        });
        let queue_size = backlog.items.len();
        drop(backlog);

        debug!(
            operation_id = id.as_u64(),
            priority = priority.0,
            queue_size,
            "Enqueued operation"
        );
        Ok((id, rx))
    }

    /// Drain the backlog while `is_ready` holds and nobody else is draining.
    ///
    /// Readiness is checked before every dispatch, so a drain stops as soon as
    /// the runtime leaves `Ready` and leaves the rest of the backlog pending.
    /// Safe to call repeatedly; extra calls return immediately.
    pub async fn process_queue<R>(&self, is_ready: R)
    where
        R: Fn() -> bool,
    {
        {
            let mut backlog = self.backlog.lock();
            if backlog.draining || backlog.items.is_empty() || !is_ready() {
                return;
            }
            backlog.draining = true;
        }
        let mut guard = DrainGuard {
            backlog: &self.backlog,
            armed: true,
        };

        loop {
            let (next, generation) = {
                let mut backlog = self.backlog.lock();
                let next = if is_ready() {
                    backlog.items.pop_front()
                } else {
                    debug!(pending = backlog.items.len(), "Runtime not ready, pausing drain");
                    None
                };
                match next {
                    Some(op) => (op, backlog.generation),
                    None => {
                        // Released under the same lock that saw the backlog
                        // empty (or the runtime not ready), so a later enqueue
                        // or ready transition always finds a drainer or starts
                        // one.
                        backlog.draining = false;
                        guard.armed = false;
                        break;
                    }
                }
            };
            self.dispatch(next, generation).await;
        }
    }

    async fn dispatch(&self, mut op: QueuedOperation, generation: u64) {
        self.stats.lock().processing += 1;
        debug!(
            operation_id = op.id.as_u64(),
            attempt = op.retry_count + 1,
            waited_ms = op.enqueued_at.elapsed().as_millis() as u64,
            "Dispatching operation"
        );

        let result = op.work.attempt().await;

        let step = {
            let mut stats = self.stats.lock();
            stats.processing = stats.processing.saturating_sub(1);
            match result {
                Ok(()) => {
                    stats.completed += 1;
                    Step::Done
                }
                Err(err) if err.is_retryable() && op.retry_count < self.config.max_retries => {
                    stats.retried += 1;
                    Step::Retry(err)
                }
                Err(err) => {
                    stats.failed += 1;
                    Step::Fail(err)
                }
            }
        };

        match step {
            Step::Done => {}
            Step::Retry(err) => {
                op.retry_count += 1;
                op.enqueued_at = Instant::now();
                let delay = self.config.backoff_delay(op.retry_count);
                warn!(
                    operation_id = op.id.as_u64(),
                    retry_count = op.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, retrying"
                );
                // Armed before the lock is released so a clear between here
                // and the select still wakes the wait.
                let cancelled = self.cancel_backoff.notified();
                tokio::pin!(cancelled);
                {
                    let mut backlog = self.backlog.lock();
                    if backlog.generation != generation {
                        drop(backlog);
                        debug!(
                            operation_id = op.id.as_u64(),
                            "Backlog cleared mid-attempt, dropping retry"
                        );
                        op.work.reject(RuntimeError::OperationDiscarded);
                        return;
                    }
                    cancelled.as_mut().enable();
                    // Front of the line: retries are not starved by newer work.
                    backlog.items.push_front(op);
                }
                self.backoff(delay, cancelled).await;
            }
            Step::Fail(err) => {
                let attempts = op.retry_count + 1;
                error!(
                    operation_id = op.id.as_u64(),
                    attempts,
                    error = %err,
                    "Operation failed permanently"
                );
                let err = if err.is_retryable() {
                    RuntimeError::RetriesExhausted {
                        attempts,
                        source: Box::new(err),
                    }
                } else {
                    err
                };
                op.work.reject(err);
            }
        }
    }

    async fn backoff(&self, delay: Duration, cancelled: Pin<&mut Notified<'_>>) {
        tokio::select! {
            _ = sleep(delay) => {}
            _ = cancelled => {
                debug!("Retry backoff cancelled");
            }
        }
    }

    /// Discard every pending operation without resolving it.
    ///
    /// Callers awaiting a discarded operation observe a closed channel.
    pub fn clear(&self) -> usize {
        let discarded = {
            let mut backlog = self.backlog.lock();
            backlog.generation += 1;
            std::mem::take(&mut backlog.items)
        };
        self.cancel_backoff.notify_waiters();
        if !discarded.is_empty() {
            warn!(discarded = discarded.len(), "Discarded pending operations");
        }
        discarded.len()
    }

    /// Reject every pending operation with `err` and empty the backlog.
    pub fn reject_all(&self, err: RuntimeError) -> usize {
        let rejected = {
            let mut backlog = self.backlog.lock();
            backlog.generation += 1;
            std::mem::take(&mut backlog.items)
        };
        self.cancel_backoff.notify_waiters();
        let count = rejected.len();
        if count > 0 {
            self.stats.lock().failed += count;
            warn!(rejected = count, error = %err, "Rejected pending operations");
        }
        for op in rejected {
            op.work.reject(err.clone());
        }
        count
    }

    pub fn len(&self) -> usize {
        self.backlog.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_draining(&self) -> bool {
        self.backlog.lock().draining
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = self.stats.lock().clone();
        stats.pending = self.len();
        stats
    }

    /// Priorities of pending operations, head first.
    pub fn pending_priorities(&self) -> Vec<Priority> {
        self.backlog
            .lock()
            .items
            .iter()
            .map(|op| op.priority)
            .collect()
    }
}
