//! CLI domain: parse, route, output, and presentation only.
//! Every command goes through the runtime façade; nothing here touches sled.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::map_error;
pub use parse::{Cli, Commands};
pub use presentation::{
    format_record_json, format_records_json, format_records_table, format_status_json,
    format_status_text,
};
pub use route::RunContext;
