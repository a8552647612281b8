//! CLI parse: clap types for strongbox. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// strongbox - local data-access runtime over an embedded store
#[derive(Parser, Debug)]
#[command(name = "strongbox")]
#[command(about = "Read and write JSON records in a local transactional store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Store directory (overrides storage.path from configuration)
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Workspace root directory, searched for config/config.toml
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Insert or replace one record
    Put {
        collection: String,
        /// JSON object with a string "id" field
        json: String,
    },
    /// Print one record by id
    Get { collection: String, id: String },
    /// List every record in a collection
    List {
        collection: String,
        /// Print raw JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Delete one record by id
    Delete { collection: String, id: String },
    /// Import a JSON array of records in one transaction
    Import {
        collection: String,
        file: PathBuf,
    },
    /// Show lifecycle, queue, and transaction status
    Status {
        /// Print raw JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Put { .. } => "put",
            Commands::Get { .. } => "get",
            Commands::List { .. } => "list",
            Commands::Delete { .. } => "delete",
            Commands::Import { .. } => "import",
            Commands::Status { .. } => "status",
        }
    }
}
