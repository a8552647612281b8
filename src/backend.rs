//! Underlying store contract and the sled engine behind it.
//!
//! The runtime only needs named collections and transactions that end exactly
//! once, by commit or by abort. Any engine meeting [`Store`] can be swapped in.

use crate::error::StorageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// sled's own default tree, never exposed as a collection
const DEFAULT_TREE: &[u8] = b"__sled__default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

impl TransactionMode {
    pub fn is_writable(self) -> bool {
        matches!(self, TransactionMode::ReadWrite)
    }
}

/// An open store handle.
pub trait Store: Send + Sync {
    /// Start a transaction scoped to one collection, creating it if needed.
    fn begin(
        &self,
        collection: &str,
        mode: TransactionMode,
    ) -> Result<Box<dyn StoreTransaction>, StorageError>;

    fn collections(&self) -> Result<Vec<String>, StorageError>;

    fn flush(&self) -> Result<(), StorageError>;
}

/// One in-flight transaction. Consumed by exactly one of `commit` or `abort`.
pub trait StoreTransaction: Send {
    fn collection(&self) -> &str;

    fn mode(&self) -> TransactionMode;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Every entry in key order, including this transaction's own writes.
    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError>;

    fn delete(&mut self, key: &[u8]) -> Result<(), StorageError>;

    fn commit(self: Box<Self>) -> Result<(), StorageError>;

    fn abort(self: Box<Self>);
}

/// Opens the store. Called once per successful initialization.
#[async_trait]
pub trait StoreOpener: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn Store>, StorageError>;
}

/// Sled-backed store: one tree per collection.
pub struct SledStore {
    db: sled::Db,
    flush_on_commit: bool,
}

impl SledStore {
    pub fn new(db: sled::Db, flush_on_commit: bool) -> Self {
        Self {
            db,
            flush_on_commit,
        }
    }

    /// Temporary database removed on drop.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self::new(db, false))
    }

    pub fn db(&self) -> &sled::Db {
        &self.db
    }
}

fn validate_collection_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name.as_bytes() == DEFAULT_TREE || name.starts_with("__") {
        return Err(StorageError::InvalidCollection(name.to_string()));
    }
    Ok(())
}

impl Store for SledStore {
    fn begin(
        &self,
        collection: &str,
        mode: TransactionMode,
    ) -> Result<Box<dyn StoreTransaction>, StorageError> {
        validate_collection_name(collection)?;
        let tree = self.db.open_tree(collection)?;
        Ok(Box::new(SledTransaction {
            collection: collection.to_string(),
            tree,
            mode,
            staged: BTreeMap::new(),
            flush_on_commit: self.flush_on_commit,
        }))
    }

    fn collections(&self) -> Result<Vec<String>, StorageError> {
        let mut names: Vec<String> = self
            .db
            .tree_names()
            .into_iter()
            .filter(|name| &name[..] != DEFAULT_TREE)
            .map(|name| String::from_utf8_lossy(&name).into_owned())
            .collect();
        names.sort();
        Ok(names)
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

/// Writes are staged in memory and applied as one `sled::Batch` on commit,
/// so an abort simply drops them.
struct SledTransaction {
    collection: String,
    tree: sled::Tree,
    mode: TransactionMode,
    /// `None` marks a staged delete
    staged: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    flush_on_commit: bool,
}

impl SledTransaction {
    fn ensure_writable(&self) -> Result<(), StorageError> {
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(StorageError::ReadOnly(self.collection.clone()))
        }
    }
}

impl StoreTransaction for SledTransaction {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        if let Some(staged) = self.staged.get(key) {
            return Ok(staged.clone());
        }
        Ok(self.tree.get(key)?.map(|value| value.to_vec()))
    }

    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for item in self.tree.iter() {
            let (key, value) = item?;
            merged.insert(key.to_vec(), value.to_vec());
        }
        for (key, staged) in &self.staged {
            match staged {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError> {
        self.ensure_writable()?;
        self.staged.insert(key.to_vec(), Some(value));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StorageError> {
        self.ensure_writable()?;
        self.staged.insert(key.to_vec(), None);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StorageError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let writes = self.staged.len();
        let mut batch = sled::Batch::default();
        for (key, staged) in self.staged {
            match staged {
                Some(value) => batch.insert(key, value),
                None => batch.remove(key),
            }
        }
        self.tree.apply_batch(batch)?;
        if self.flush_on_commit {
            self.tree.flush()?;
        }
        debug!(collection = %self.collection, writes, "Committed sled batch");
        Ok(())
    }

    fn abort(self: Box<Self>) {
        debug!(
            collection = %self.collection,
            discarded = self.staged.len(),
            "Aborted transaction"
        );
    }
}

/// Opens a [`SledStore`] at a path, or a temporary one.
#[derive(Debug, Clone)]
pub struct SledOpener {
    path: Option<PathBuf>,
    flush_on_commit: bool,
}

impl SledOpener {
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            flush_on_commit: false,
        }
    }

    pub fn temporary() -> Self {
        Self {
            path: None,
            flush_on_commit: false,
        }
    }

    pub fn flush_on_commit(mut self, flush: bool) -> Self {
        self.flush_on_commit = flush;
        self
    }
}

#[async_trait]
impl StoreOpener for SledOpener {
    async fn open(&self) -> Result<Arc<dyn Store>, StorageError> {
        let path = self.path.clone();
        let flush_on_commit = self.flush_on_commit;
        // sled::open does blocking file I/O
        let db = tokio::task::spawn_blocking(move || match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                sled::Config::new().path(path).open().map_err(StorageError::from)
            }
            None => sled::Config::new()
                .temporary(true)
                .open()
                .map_err(StorageError::from),
        })
        .await
        .map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Store open task failed: {}", e),
            ))
        })??;

        info!(
            path = ?self.path,
            recovered = db.was_recovered(),
            "Opened sled store"
        );
        Ok(Arc::new(SledStore::new(db, flush_on_commit)))
    }
}
