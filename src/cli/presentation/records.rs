//! Record formatters for get/list.

use super::to_pretty_json;
use crate::error::RuntimeError;
use crate::record::{DocumentRecord, Record};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use serde_json::Value;
use std::collections::BTreeSet;

pub fn format_record_json(record: &DocumentRecord) -> Result<String, RuntimeError> {
    to_pretty_json(record.fields())
}

pub fn format_records_json(records: &[DocumentRecord]) -> Result<String, RuntimeError> {
    let values: Vec<&serde_json::Map<String, Value>> =
        records.iter().map(DocumentRecord::fields).collect();
    to_pretty_json(&values)
}

/// One row per record: `id` first, then every other field seen, sorted.
pub fn format_records_table(collection: &str, records: &[DocumentRecord]) -> String {
    if records.is_empty() {
        return format!("No records in '{}'.", collection);
    }

    let columns: BTreeSet<&str> = records
        .iter()
        .flat_map(|record| record.fields().keys())
        .map(String::as_str)
        .filter(|key| *key != "id")
        .collect();

    let mut header = vec!["id"];
    header.extend(columns.iter().copied());

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(header);
    for record in records {
        let mut row = vec![record.id().to_string()];
        row.extend(
            columns
                .iter()
                .map(|column| render_cell(record.fields().get(*column))),
        );
        table.add_row(row);
    }
    format!("{}\n{} record(s)", table, records.len())
}

fn render_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
