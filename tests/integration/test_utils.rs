//! Shared test utilities for integration tests
//!
//! Environment isolation for configuration tests, runtime builders with short
//! retry delays, a typed record, and store openers with controllable behavior.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strongbox::{
    DatabaseRuntime, QueueConfig, Record, RuntimeOptions, SledOpener, SledStore, StorageError,
    Store, StoreOpener, TransactionMode,
};
use tempfile::TempDir;

/// Serializes environment mutation across tests in this binary.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

const TRACKED_VARS: &[&str] = &["HOME", "XDG_CONFIG_HOME", "STRONGBOX_ENV"];

/// Environment variable state to restore after test
struct EnvState {
    saved: Vec<(String, Option<String>)>,
}

impl EnvState {
    fn capture(extra: &[(&str, &str)]) -> Self {
        let saved = TRACKED_VARS
            .iter()
            .copied()
            .chain(extra.iter().map(|(name, _)| *name))
            .map(|name| (name.to_string(), std::env::var(name).ok()))
            .collect();
        Self { saved }
    }

    fn restore(self) {
        for (name, value) in self.saved {
            match value {
                Some(value) => std::env::set_var(&name, value),
                None => std::env::remove_var(&name),
            }
        }
    }
}

/// Run `f` with HOME and XDG_CONFIG_HOME inside `test_dir`, STRONGBOX_ENV
/// unset, and `vars` set. Everything is restored afterwards.
pub fn with_config_env<F, R>(test_dir: &TempDir, vars: &[(&str, &str)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let env_state = EnvState::capture(vars);

    let test_home = test_dir.path().join("home");
    let test_config_home = test_dir.path().join("xdg");
    std::fs::create_dir_all(&test_home).unwrap();
    std::fs::create_dir_all(&test_config_home).unwrap();

    std::env::set_var("HOME", &test_home);
    std::env::set_var("XDG_CONFIG_HOME", &test_config_home);
    std::env::remove_var("STRONGBOX_ENV");
    for (name, value) in vars {
        std::env::set_var(name, value);
    }

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
    env_state.restore();
    match result {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Options with millisecond retry delays so retry tests stay fast.
pub fn fast_options() -> RuntimeOptions {
    RuntimeOptions {
        queue: QueueConfig {
            retry_delay: Duration::from_millis(5),
            max_retry_delay: Duration::from_millis(20),
            ..QueueConfig::default()
        },
        ..RuntimeOptions::default()
    }
}

pub fn temp_runtime() -> DatabaseRuntime {
    DatabaseRuntime::new(SledOpener::temporary(), fast_options())
}

/// Runtime over an on-disk store inside `dir`.
pub fn disk_runtime(dir: &TempDir) -> DatabaseRuntime {
    DatabaseRuntime::new(SledOpener::at_path(dir.path().join("store")), fast_options())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partner {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tier: u8,
}

impl Partner {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            tier: 1,
        }
    }
}

impl Record for Partner {
    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("partner name must not be empty".to_string());
        }
        Ok(())
    }
}

/// Counts opens and takes `delay` to finish each one.
pub struct CountingOpener {
    pub opens: Arc<AtomicUsize>,
    pub delay: Duration,
}

impl CountingOpener {
    pub fn new(delay: Duration) -> (Self, Arc<AtomicUsize>) {
        let opens = Arc::new(AtomicUsize::new(0));
        (
            Self {
                opens: Arc::clone(&opens),
                delay,
            },
            opens,
        )
    }
}

#[async_trait]
impl StoreOpener for CountingOpener {
    async fn open(&self) -> Result<Arc<dyn Store>, StorageError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(Arc::new(SledStore::temporary()?))
    }
}

/// Always fails after `delay`.
pub struct FailingOpener {
    pub delay: Duration,
}

#[async_trait]
impl StoreOpener for FailingOpener {
    async fn open(&self) -> Result<Arc<dyn Store>, StorageError> {
        tokio::time::sleep(self.delay).await;
        Err(StorageError::IoError(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "database is locked by another process",
        )))
    }
}

/// The first open takes `first_delay` and yields a store holding a `stale`
/// record in the `markers` collection. Later opens are immediate and empty.
pub struct SlowFirstOpener {
    pub first_delay: Duration,
    pub opens: Arc<AtomicUsize>,
}

impl SlowFirstOpener {
    pub fn new(first_delay: Duration) -> Self {
        Self {
            first_delay,
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl StoreOpener for SlowFirstOpener {
    async fn open(&self) -> Result<Arc<dyn Store>, StorageError> {
        let store = SledStore::temporary()?;
        if self.opens.fetch_add(1, Ordering::SeqCst) == 0 {
            let mut tx = store.begin("markers", TransactionMode::ReadWrite)?;
            tx.put(b"stale", br#"{"id":"stale"}"#.to_vec())?;
            tx.commit()?;
            tokio::time::sleep(self.first_delay).await;
        }
        Ok(Arc::new(store))
    }
}
