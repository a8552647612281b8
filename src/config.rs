//! Configuration System
//!
//! Layered configuration for the runtime, its store, and logging. Lowest to
//! highest precedence: built-in defaults, the global file, workspace files,
//! then `STRONGBOX__*` environment variables.

use crate::backend::SledOpener;
use crate::error::RuntimeError;
use crate::logging::LoggingConfig;
use crate::queue::{BackoffPolicy, QueueConfig};
use crate::runtime::RuntimeOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrongboxConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Queue, transaction, and initialization tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_transaction_timeout_ms")]
    pub transaction_timeout_ms: u64,

    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    #[serde(default)]
    pub backoff: BackoffPolicy,

    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Default bound on waiting for initialization; unbounded when unset
    #[serde(default)]
    pub init_timeout_ms: Option<u64>,

    /// Bound on opening the store; unbounded when unset
    #[serde(default)]
    pub open_timeout_ms: Option<u64>,
}

fn default_transaction_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_max_retry_delay_ms() -> u64 {
    30_000
}

fn default_max_queue_size() -> usize {
    10_000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            transaction_timeout_ms: default_transaction_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            backoff: BackoffPolicy::default(),
            max_queue_size: default_max_queue_size(),
            init_timeout_ms: None,
            open_timeout_ms: None,
        }
    }
}

impl RuntimeConfig {
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            max_retry_delay: Duration::from_millis(self.max_retry_delay_ms),
            backoff: self.backoff,
            max_queue_size: self.max_queue_size,
        }
    }

    pub fn options(&self) -> RuntimeOptions {
        RuntimeOptions {
            queue: self.queue_config(),
            transaction_timeout: Duration::from_millis(self.transaction_timeout_ms),
            init_timeout: self.init_timeout_ms.map(Duration::from_millis),
            open_timeout: self.open_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.transaction_timeout_ms == 0 {
            problems.push("transaction_timeout_ms must be greater than zero".to_string());
        }
        if self.max_queue_size == 0 {
            problems.push("max_queue_size must be greater than zero".to_string());
        }
        if self.max_retry_delay_ms < self.retry_delay_ms {
            problems.push(format!(
                "max_retry_delay_ms ({}) is below retry_delay_ms ({})",
                self.max_retry_delay_ms, self.retry_delay_ms
            ));
        }
        if self.init_timeout_ms == Some(0) {
            problems.push("init_timeout_ms must be greater than zero when set".to_string());
        }
        if self.open_timeout_ms == Some(0) {
            problems.push("open_timeout_ms must be greater than zero when set".to_string());
        }
        problems
    }
}

/// Where the store lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database directory; defaults under the platform data directory
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Use a throwaway database removed on exit
    #[serde(default)]
    pub temporary: bool,

    /// Flush to disk after every commit
    #[serde(default)]
    pub flush_on_commit: bool,
}

impl StorageConfig {
    /// Configured path, else `<data dir>/strongbox/store`.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(|| {
            directories::ProjectDirs::from("", "", "strongbox")
                .map(|dirs| dirs.data_dir().join("store"))
        })
    }

    pub fn opener(&self) -> Result<SledOpener, RuntimeError> {
        let opener = if self.temporary {
            SledOpener::temporary()
        } else {
            let path = self.resolved_path().ok_or_else(|| {
                RuntimeError::Config(
                    "no storage path configured and no home directory to default to".to_string(),
                )
            })?;
            SledOpener::at_path(path)
        };
        Ok(opener.flush_on_commit(self.flush_on_commit))
    }

    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if let Some(path) = &self.path {
            if path.as_os_str().is_empty() {
                problems.push("path cannot be empty".to_string());
            }
            if self.temporary {
                problems.push("path and temporary are mutually exclusive".to_string());
            }
        }
        problems
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Runtime(String),
    Storage(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Runtime(msg) => write!(f, "runtime: {}", msg),
            ValidationError::Storage(msg) => write!(f, "storage: {}", msg),
            ValidationError::Logging(msg) => write!(f, "logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl StrongboxConfig {
    /// Validate the entire configuration, collecting every problem.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let errors: Vec<ValidationError> = self
            .runtime
            .validate()
            .into_iter()
            .map(ValidationError::Runtime)
            .chain(self.storage.validate().into_iter().map(ValidationError::Storage))
            .chain(self.logging.validate().into_iter().map(ValidationError::Logging))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl From<Vec<ValidationError>> for RuntimeError {
    fn from(errors: Vec<ValidationError>) -> Self {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        RuntimeError::Config(format!(
            "Configuration validation failed: {}",
            messages.join("; ")
        ))
    }
}
