//! CLI presentation: text and json formatters per command family.

mod records;
mod status;

pub use records::{format_record_json, format_records_json, format_records_table};
pub use status::{format_status_json, format_status_text};

use crate::error::RuntimeError;
use serde::Serialize;

fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<String, RuntimeError> {
    serde_json::to_string_pretty(value).map_err(|e| RuntimeError::Validation(e.to_string()))
}
