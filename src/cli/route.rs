//! CLI route: single route table and run context. Dispatches to the runtime
//! façade and presentation.

use crate::cli::parse::Commands;
use crate::cli::presentation::{
    format_record_json, format_records_json, format_records_table, format_status_json,
    format_status_text,
};
use crate::config::{ConfigLoader, StrongboxConfig};
use crate::error::RuntimeError;
use crate::record::{DocumentRecord, Record};
use crate::runtime::DatabaseRuntime;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Runtime context for CLI execution: resolved configuration and the runtime.
pub struct RunContext {
    runtime: DatabaseRuntime,
    config: StrongboxConfig,
}

impl RunContext {
    /// Load configuration (one file if given, otherwise the layered sources
    /// for `workspace_root`), apply the `--store` override, and build the
    /// runtime. The store is not opened yet.
    pub fn new(
        workspace_root: &Path,
        config_path: Option<&Path>,
        store_override: Option<PathBuf>,
    ) -> Result<Self, RuntimeError> {
        let mut config = match config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(workspace_root)?,
        };
        if let Some(path) = store_override {
            config.storage.path = Some(path);
            config.storage.temporary = false;
        }
        let runtime = DatabaseRuntime::from_config(&config)?;
        Ok(Self { runtime, config })
    }

    pub fn runtime(&self) -> &DatabaseRuntime {
        &self.runtime
    }

    pub fn config(&self) -> &StrongboxConfig {
        &self.config
    }

    /// Execute a CLI command via the single route table.
    pub async fn execute(&self, command: &Commands) -> Result<String, RuntimeError> {
        let started = Instant::now();
        self.runtime.initialize().await?;
        let result = self.execute_inner(command).await;
        info!(
            command = command.name(),
            ok = result.is_ok(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Command finished"
        );
        result
    }

    async fn execute_inner(&self, command: &Commands) -> Result<String, RuntimeError> {
        match command {
            Commands::Put { collection, json } => {
                let record = parse_document(json)?;
                let id = record.id().to_string();
                self.runtime.put(collection, record).await?;
                Ok(format!("Stored '{}' in '{}'", id, collection))
            }
            Commands::Get { collection, id } => {
                match self.runtime.get::<DocumentRecord>(collection, id).await? {
                    Some(record) => format_record_json(&record),
                    None => Err(RuntimeError::Validation(format!(
                        "No record '{}' in '{}'",
                        id, collection
                    ))),
                }
            }
            Commands::List { collection, json } => {
                let records = self.runtime.get_all::<DocumentRecord>(collection).await?;
                if *json {
                    format_records_json(&records)
                } else {
                    Ok(format_records_table(collection, &records))
                }
            }
            Commands::Delete { collection, id } => {
                if self.runtime.delete(collection, id).await? {
                    Ok(format!("Deleted '{}' from '{}'", id, collection))
                } else {
                    Ok(format!("No record '{}' in '{}'", id, collection))
                }
            }
            Commands::Import { collection, file } => {
                let records = read_import_file(file)?;
                debug!(file = %file.display(), records = records.len(), "Importing records");
                let count = self.runtime.put_many(collection, records).await?;
                Ok(format!("Imported {} record(s) into '{}'", count, collection))
            }
            Commands::Status { json } => {
                let status = self.runtime.status();
                if *json {
                    format_status_json(&status)
                } else {
                    Ok(format_status_text(&status))
                }
            }
        }
    }
}

fn parse_document(json: &str) -> Result<DocumentRecord, RuntimeError> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| RuntimeError::Validation(format!("Invalid JSON: {}", e)))?;
    DocumentRecord::try_from(value).map_err(RuntimeError::Validation)
}

/// A JSON array of objects. Any bad element fails the whole import.
fn read_import_file(path: &Path) -> Result<Vec<DocumentRecord>, RuntimeError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        RuntimeError::Validation(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let values: Vec<Value> = serde_json::from_str(&contents).map_err(|e| {
        RuntimeError::Validation(format!(
            "{} must contain a JSON array of records: {}",
            path.display(),
            e
        ))
    })?;
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            DocumentRecord::try_from(value)
                .map_err(|e| RuntimeError::Validation(format!("record {}: {}", index, e)))
        })
        .collect()
}
