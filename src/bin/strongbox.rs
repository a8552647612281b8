//! strongbox CLI binary
//!
//! Command-line access to a local strongbox store.

use anyhow::Context;
use clap::Parser;
use std::process;
use strongbox::cli::{map_error, Cli, RunContext};
use strongbox::config::ConfigLoader;
use strongbox::logging::{init_logging, LoggingConfig};
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();

    // Build logging config from CLI args, env vars, and config file
    let logging_config = build_logging_config(&cli);

    // Initialize logging early
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    info!(command = cli.command.name(), "strongbox starting");

    match run(&cli) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("{:#}", e);
            process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<String> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async {
        let context = RunContext::new(&cli.workspace, cli.config.as_deref(), cli.store.clone())
            .map_err(|e| anyhow::anyhow!(map_error(&e)))
            .context("Failed to load configuration")?;
        context
            .execute(&cli.command)
            .await
            .map_err(|e| anyhow::anyhow!(map_error(&e)))
    })
}

/// Build logging configuration from CLI args and config file.
/// Precedence: CLI flags override config file override defaults.
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    let mut config = if let Some(ref config_path) = cli.config {
        ConfigLoader::load_from_file(config_path)
            .ok()
            .map(|c| c.logging)
            .unwrap_or_default()
    } else {
        ConfigLoader::load(&cli.workspace)
            .ok()
            .map(|c| c.logging)
            .unwrap_or_default()
    };

    if !cli.verbose && cli.log_level.is_none() && config.level == "info" {
        // Keep command output readable unless asked otherwise
        config.level = "warn".to_string();
    }
    if cli.verbose {
        config.level = "debug".to_string();
    }
    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.clone();
    }

    config
}
