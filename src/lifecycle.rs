//! Lifecycle state machine and state-change listeners.
//!
//! Holds whether the underlying store is usable and tells subscribers when that
//! changes. Queuing and readiness waiting live elsewhere.

use crate::error::RuntimeError;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info};

const HISTORY_LIMIT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
    Error,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Ready => "ready",
            LifecycleState::Error => "error",
        }
    }

    /// Edges accepted by [`StateEmitter::set_state`].
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        matches!(
            (self, next),
            (LifecycleState::Uninitialized, LifecycleState::Initializing)
                | (LifecycleState::Initializing, LifecycleState::Ready)
                | (LifecycleState::Initializing, LifecycleState::Error)
                | (LifecycleState::Error, LifecycleState::Uninitialized)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle returned by [`StateEmitter::add_listener`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type StateListener = Arc<dyn Fn(LifecycleState) + Send + Sync>;

/// One recorded state change.
#[derive(Debug, Clone, Serialize)]
pub struct StateTransition {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub at: DateTime<Utc>,
    pub forced: bool,
}

pub struct StateEmitter {
    state: RwLock<LifecycleState>,
    listeners: Mutex<Vec<(ListenerId, StateListener)>>,
    history: Mutex<VecDeque<StateTransition>>,
    next_listener: AtomicU64,
}

impl StateEmitter {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LifecycleState::Uninitialized),
            listeners: Mutex::new(Vec::new()),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
            next_listener: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    /// Move to `next` if the transition table allows it, then notify listeners.
    pub fn set_state(&self, next: LifecycleState) -> Result<(), RuntimeError> {
        let from = {
            let mut state = self.state.write();
            let from = *state;
            if !from.can_transition_to(next) {
                return Err(RuntimeError::InvalidTransition { from, to: next });
            }
            *state = next;
            from
        };
        self.record_and_notify(from, next, false);
        Ok(())
    }

    /// Compare-and-set: move from `expected` to `next` only if the current state
    /// is `expected`. Returns the observed state on mismatch.
    pub fn transition(
        &self,
        expected: LifecycleState,
        next: LifecycleState,
    ) -> Result<(), LifecycleState> {
        {
            let mut state = self.state.write();
            if *state != expected {
                return Err(*state);
            }
            if !expected.can_transition_to(next) {
                return Err(*state);
            }
            *state = next;
        }
        self.record_and_notify(expected, next, false);
        Ok(())
    }

    /// Set the state without consulting the transition table.
    ///
    /// Only `mark_as_error` and `reset` on the runtime go through here. A no-op
    /// when already in `next`.
    pub fn force(&self, next: LifecycleState) {
        let from = {
            let mut state = self.state.write();
            let from = *state;
            if from == next {
                return;
            }
            *state = next;
            from
        };
        self.record_and_notify(from, next, true);
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(LifecycleState) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Returns false if the listener was already removed.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Most recent transitions, oldest first.
    pub fn history(&self) -> Vec<StateTransition> {
        self.history.lock().iter().cloned().collect()
    }

    fn record_and_notify(&self, from: LifecycleState, to: LifecycleState, forced: bool) {
        {
            let mut history = self.history.lock();
            if history.len() == HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(StateTransition {
                from,
                to,
                at: Utc::now(),
                forced,
            });
        }
        info!(from = %from, to = %to, forced, "Lifecycle state changed");

        // Snapshot so listeners may add or remove listeners without deadlocking.
        let listeners: Vec<(ListenerId, StateListener)> = self.listeners.lock().clone();
        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(to))).is_err() {
                error!(listener = id.0, state = %to, "State listener panicked");
            }
        }
    }
}

impl Default for StateEmitter {
    fn default() -> Self {
        Self::new()
    }
}
