//! Initialization Manager
//!
//! Turns lifecycle transitions into one awaitable "ready" signal. Every waiter
//! shares the same signal, so concurrent callers observe a single outcome.

use crate::error::RuntimeError;
use crate::lifecycle::LifecycleState;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

pub type Outcome = Option<Result<(), RuntimeError>>;

pub struct InitializationManager {
    signal: Mutex<watch::Sender<Outcome>>,
    failure: Mutex<Option<RuntimeError>>,
}

impl InitializationManager {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            signal: Mutex::new(tx),
            failure: Mutex::new(None),
        }
    }

    /// Wait until the runtime reaches `Ready` (Ok) or `Error` (Err).
    ///
    /// Without a timeout this blocks for as long as the state machine stays
    /// put.
    pub async fn wait_for_initialization(
        &self,
        timeout: Option<Duration>,
    ) -> Result<(), RuntimeError> {
        let mut rx = self.signal.lock().subscribe();
        let wait = async move {
            match rx.wait_for(|outcome| outcome.is_some()).await {
                Ok(outcome) => outcome.clone().unwrap_or(Err(RuntimeError::Reset)),
                // Sender replaced by reset()
                Err(_) => Err(RuntimeError::Reset),
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| RuntimeError::InitializationTimeout(limit))?,
            None => wait.await,
        }
    }

    /// Listener wired to the state emitter.
    pub fn handle_state_change(&self, state: LifecycleState) {
        match state {
            LifecycleState::Ready => self.resolve(Ok(())),
            LifecycleState::Error => {
                let reason = self.failure.lock().clone().unwrap_or_else(|| {
                    RuntimeError::RuntimeErrorState("initialization did not complete".into())
                });
                // Overrides an earlier Ready
                self.signal.lock().send_replace(Some(Err(reason)));
                debug!("Initialization signal latched to error");
            }
            LifecycleState::Uninitialized | LifecycleState::Initializing => {}
        }
    }

    /// Record why initialization failed, reported to waiters on `Error`.
    pub fn note_failure(&self, err: RuntimeError) {
        *self.failure.lock() = Some(err);
    }

    /// Drop the current signal and start over with an unresolved one.
    pub fn reset(&self) {
        let (tx, _rx) = watch::channel(None);
        *self.signal.lock() = tx;
        *self.failure.lock() = None;
        debug!("Initialization signal reset");
    }

    /// The resolved outcome, if any.
    pub fn outcome(&self) -> Outcome {
        self.signal.lock().borrow().clone()
    }

    fn resolve(&self, outcome: Result<(), RuntimeError>) {
        let signal = self.signal.lock();
        let resolved = signal.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(outcome);
            true
        });
        if resolved {
            debug!(receivers = signal.receiver_count(), "Initialization signal resolved");
        }
    }
}

impl Default for InitializationManager {
    fn default() -> Self {
        Self::new()
    }
}
