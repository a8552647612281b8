//! strongbox: a dependable local data-access runtime
//!
//! Wraps an embedded transactional key-value store (sled) so the rest of an
//! application can read and write records without caring whether the store is
//! open yet. Work submitted early is queued and drained in priority order once
//! the store is ready; every unit of work runs in a deadline-bounded
//! transaction that ends exactly once.

pub mod backend;
pub mod cli;
pub mod collection;
pub mod config;
pub mod error;
pub mod init;
pub mod lifecycle;
pub mod logging;
pub mod queue;
pub mod record;
pub mod runtime;
pub mod transaction;

pub use crate::backend::{SledOpener, SledStore, Store, StoreOpener, StoreTransaction, TransactionMode};
pub use crate::collection::{Collection, CollectionStore};
pub use crate::config::{ConfigLoader, StrongboxConfig};
pub use crate::error::{RuntimeError, StorageError};
pub use crate::lifecycle::{LifecycleState, ListenerId};
pub use crate::queue::{BackoffPolicy, Priority, QueueConfig, QueueStats};
pub use crate::record::{DocumentRecord, Record};
pub use crate::runtime::{DatabaseRuntime, RuntimeOptions, RuntimeStatus};
pub use crate::transaction::{TransactionScope, TransactionState};
