//! Status formatter.

use super::to_pretty_json;
use crate::error::RuntimeError;
use crate::runtime::RuntimeStatus;
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;

pub fn format_status_json(status: &RuntimeStatus) -> Result<String, RuntimeError> {
    to_pretty_json(status)
}

pub fn format_status_text(status: &RuntimeStatus) -> String {
    let mut out = format!("State: {}\n\n", status.state);

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Queue", "Count"]);
    table.add_row(vec!["pending".to_string(), status.queue.pending.to_string()]);
    table.add_row(vec!["processing".to_string(), status.queue.processing.to_string()]);
    table.add_row(vec!["completed".to_string(), status.queue.completed.to_string()]);
    table.add_row(vec!["failed".to_string(), status.queue.failed.to_string()]);
    table.add_row(vec!["retried".to_string(), status.queue.retried.to_string()]);
    out.push_str(&format!("{}\n\n", table));

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Transactions", "Count"]);
    table.add_row(vec!["committed".to_string(), status.transactions.committed.to_string()]);
    table.add_row(vec!["aborted".to_string(), status.transactions.aborted.to_string()]);
    table.add_row(vec!["timed out".to_string(), status.transactions.timed_out.to_string()]);
    table.add_row(vec![
        "active".to_string(),
        status.active_transactions.len().to_string(),
    ]);
    out.push_str(&format!("{}\n\n", table));

    if status.collections.is_empty() {
        out.push_str("Collections: none");
    } else {
        out.push_str(&format!("Collections: {}", status.collections.join(", ")));
    }
    out
}
