//! Typed collection accessors.
//!
//! [`Collection`] reads and writes records inside a transaction someone else
//! opened. [`CollectionStore`] is the same view bound to a runtime: every call
//! goes through the operation queue and its own transaction.

use crate::backend::TransactionMode;
use crate::error::RuntimeError;
use crate::record::{decode_record, encode_record, Record};
use crate::runtime::DatabaseRuntime;
use crate::transaction::TransactionScope;
use std::marker::PhantomData;
use std::sync::Arc;

/// A named, typed view over one collection.
pub struct Collection<R> {
    name: Arc<str>,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for Collection<R> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            _record: PhantomData,
        }
    }
}

impl<R> std::fmt::Debug for Collection<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("name", &self.name).finish()
    }
}

impl<R: Record> Collection<R> {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            _record: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, scope: &TransactionScope, id: &str) -> Result<Option<R>, RuntimeError> {
        self.check_scope(scope)?;
        match scope.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_all(&self, scope: &TransactionScope) -> Result<Vec<R>, RuntimeError> {
        self.check_scope(scope)?;
        scope
            .scan()?
            .into_iter()
            .map(|(_, bytes)| decode_record(&bytes).map_err(RuntimeError::from))
            .collect()
    }

    pub fn put(&self, scope: &TransactionScope, record: &R) -> Result<(), RuntimeError> {
        self.check_scope(scope)?;
        let bytes = encode_record(record)?;
        scope.put(record.id().as_bytes(), bytes)
    }

    /// Returns whether a record was removed.
    pub fn delete(&self, scope: &TransactionScope, id: &str) -> Result<bool, RuntimeError> {
        self.check_scope(scope)?;
        let existed = scope.get(id.as_bytes())?.is_some();
        if existed {
            scope.delete(id.as_bytes())?;
        }
        Ok(existed)
    }

    fn check_scope(&self, scope: &TransactionScope) -> Result<(), RuntimeError> {
        if scope.collection() != self.name() {
            return Err(RuntimeError::transaction(
                self.name(),
                format!("scope belongs to collection '{}'", scope.collection()),
            ));
        }
        Ok(())
    }
}

/// A collection bound to a runtime.
pub struct CollectionStore<R> {
    runtime: DatabaseRuntime,
    collection: Collection<R>,
}

impl<R> Clone for CollectionStore<R> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            collection: self.collection.clone(),
        }
    }
}

impl<R: Record> CollectionStore<R> {
    pub fn new(runtime: DatabaseRuntime, name: impl AsRef<str>) -> Self {
        Self {
            runtime,
            collection: Collection::new(name),
        }
    }

    pub fn name(&self) -> &str {
        self.collection.name()
    }

    pub async fn get_all(&self) -> Result<Vec<R>, RuntimeError> {
        self.run(TransactionMode::ReadOnly, |collection, scope| {
            collection.get_all(scope)
        })
        .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<R>, RuntimeError> {
        let id = id.to_string();
        self.run(TransactionMode::ReadOnly, move |collection, scope| {
            collection.get(scope, &id)
        })
        .await
    }

    /// Insert or replace a record. Invalid records are rejected before they
    /// are queued.
    pub async fn put(&self, record: R) -> Result<(), RuntimeError> {
        encode_record(&record)?;
        let record = Arc::new(record);
        self.run(TransactionMode::ReadWrite, move |collection, scope| {
            collection.put(scope, &record)
        })
        .await
    }

    /// Write every record in one transaction; nothing is written if any fails.
    pub async fn put_many(&self, records: Vec<R>) -> Result<usize, RuntimeError> {
        for record in &records {
            encode_record(record)?;
        }
        let runtime = self.runtime.clone();
        let collection = self.collection.clone();
        let records = Arc::new(records);
        self.runtime
            .queue_operation(move || {
                let runtime = runtime.clone();
                let collection = collection.clone();
                let records = Arc::clone(&records);
                async move {
                    let name = collection.name().to_string();
                    let items: Vec<&R> = records.iter().collect();
                    runtime
                        .batch_operation(&name, items, |scope, record| {
                            collection.put(scope, record)
                        })
                        .await
                }
            })
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, RuntimeError> {
        let id = id.to_string();
        self.run(TransactionMode::ReadWrite, move |collection, scope| {
            collection.delete(scope, &id)
        })
        .await
    }

    /// Queue `work` to run in a fresh transaction on each attempt.
    async fn run<T, F>(&self, mode: TransactionMode, work: F) -> Result<T, RuntimeError>
    where
        T: Send + 'static,
        F: Fn(&Collection<R>, &TransactionScope) -> Result<T, RuntimeError> + Send + Sync + 'static,
    {
        let runtime = self.runtime.clone();
        let collection = self.collection.clone();
        let work = Arc::new(work);
        self.runtime
            .queue_operation(move || {
                let runtime = runtime.clone();
                let collection = collection.clone();
                let work = Arc::clone(&work);
                async move {
                    let name = collection.name().to_string();
                    runtime
                        .transaction(&name, mode, |scope| async move {
                            work(&collection, &scope)
                        })
                        .await
                }
            })
            .await
    }
}
