//! Records stored in collections.

use crate::error::StorageError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A value that can live in a collection, keyed by its id.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Schema check run before every write.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Validate and serialize a record for storage.
pub fn encode_record<R: Record>(record: &R) -> Result<Vec<u8>, StorageError> {
    if record.id().is_empty() {
        return Err(StorageError::Encode("record id must not be empty".to_string()));
    }
    record.validate().map_err(StorageError::Encode)?;
    serde_json::to_vec(record).map_err(|e| StorageError::Encode(e.to_string()))
}

pub fn decode_record<R: Record>(bytes: &[u8]) -> Result<R, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Decode(e.to_string()))
}

/// Schema-free JSON object with a required string `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct DocumentRecord(Map<String, Value>);

impl DocumentRecord {
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl TryFrom<Map<String, Value>> for DocumentRecord {
    type Error = String;

    fn try_from(fields: Map<String, Value>) -> Result<Self, Self::Error> {
        match fields.get("id") {
            Some(Value::String(id)) if !id.is_empty() => Ok(DocumentRecord(fields)),
            Some(Value::String(_)) => Err("field \"id\" must not be empty".to_string()),
            Some(_) => Err("field \"id\" must be a string".to_string()),
            None => Err("missing field \"id\"".to_string()),
        }
    }
}

impl TryFrom<Value> for DocumentRecord {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => DocumentRecord::try_from(fields),
            other => Err(format!("expected a JSON object, got {}", other)),
        }
    }
}

impl From<DocumentRecord> for Map<String, Value> {
    fn from(record: DocumentRecord) -> Self {
        record.0
    }
}

impl Record for DocumentRecord {
    fn id(&self) -> &str {
        self.0.get("id").and_then(Value::as_str).unwrap_or_default()
    }
}
