//! Error types for the strongbox data-access runtime.

use crate::lifecycle::LifecycleState;
use std::time::Duration;
use thiserror::Error;

/// Storage-engine errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Invalid collection name: {0:?}")]
    InvalidCollection(String),

    #[error("Write attempted in read-only transaction on '{0}'")]
    ReadOnly(String),

    #[error("Failed to encode record: {0}")]
    Encode(String),

    #[error("Failed to decode record: {0}")]
    Decode(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::IoError(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("sled: {}", err),
        ))
    }
}

/// Errors surfaced by the runtime to its callers.
///
/// Cloneable so one outcome (an initialization failure, say) can be handed to
/// every waiter.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Timed out after {0:?} waiting for the runtime to initialize")]
    InitializationTimeout(Duration),

    #[error("Transaction on '{collection}' failed: {message}")]
    Transaction { collection: String, message: String },

    #[error("Transaction on '{collection}' timed out after {elapsed:?}")]
    TransactionTimeout { collection: String, elapsed: Duration },

    #[error("Operation queue is full ({limit} pending)")]
    QueueOverflow { limit: usize },

    #[error("Runtime entered error state: {0}")]
    RuntimeErrorState(String),

    #[error("Operation failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<RuntimeError>,
    },

    #[error("Invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("Operation was discarded before it ran")]
    OperationDiscarded,

    #[error("Runtime was reset while waiting")]
    Reset,

    #[error("Invalid record: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RuntimeError {
    pub fn transaction(collection: impl Into<String>, message: impl Into<String>) -> Self {
        RuntimeError::Transaction {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// The error with any retry context stripped.
    pub fn root_cause(&self) -> &RuntimeError {
        match self {
            RuntimeError::RetriesExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether the queue may retry an operation that failed with this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            RuntimeError::Transaction { .. } => true,
            RuntimeError::TransactionTimeout { .. } => true,
            RuntimeError::Storage(_) => true,
            RuntimeError::Initialization(_)
            | RuntimeError::InitializationTimeout(_)
            | RuntimeError::QueueOverflow { .. }
            | RuntimeError::RuntimeErrorState(_)
            | RuntimeError::RetriesExhausted { .. }
            | RuntimeError::InvalidTransition { .. }
            | RuntimeError::OperationDiscarded
            | RuntimeError::Reset
            | RuntimeError::Validation(_)
            | RuntimeError::Config(_) => false,
        }
    }
}

impl From<StorageError> for RuntimeError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Encode(msg) | StorageError::Decode(msg) => RuntimeError::Validation(msg),
            other => RuntimeError::Storage(other.to_string()),
        }
    }
}

impl From<config::ConfigError> for RuntimeError {
    fn from(err: config::ConfigError) -> Self {
        RuntimeError::Config(err.to_string())
    }
}
