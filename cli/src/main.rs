// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # wsvol
//!
//! Drives the workspace volume strategies from the command line.
//!
//! ## Commands
//!
//! - `wsvol provision` - Rewrite a volume request model and print it
//! - `wsvol prepare` - Provision a model and create its storage on the cluster
//! - `wsvol cleanup` - Release the storage of a deleted workspace
//! - `wsvol config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

mod commands;

use commands::{CleanupArgs, ConfigCommand, PrepareArgs, ProvisionArgs};
use workspace_volumes::domain::config::StorageConfigManifest;

/// Workspace volume provisioning and lifecycle
#[derive(Parser)]
#[command(name = "wsvol")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "WSVOL_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long, global = true, env = "WSVOL_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite a volume request model for a workspace
    #[command(name = "provision")]
    Provision(ProvisionArgs),

    /// Provision a model and create its storage on the cluster
    #[command(name = "prepare")]
    Prepare(PrepareArgs),

    /// Release the storage of a deleted workspace
    #[command(name = "cleanup")]
    Cleanup(CleanupArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings come from the config file; a broken file is reported by the command itself.
    let observability = StorageConfigManifest::load_or_default(cli.config.clone())
        .map(|config| config.spec.observability)
        .unwrap_or_default();
    let level = cli
        .log_level
        .clone()
        .unwrap_or(observability.log_level);
    init_logging(&level, &observability.log_format)?;

    match cli.command {
        Some(Commands::Provision(args)) => commands::volumes::provision(args, cli.config).await,
        Some(Commands::Prepare(args)) => commands::volumes::prepare(args, cli.config).await,
        Some(Commands::Cleanup(args)) => commands::volumes::cleanup(args, cli.config).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if format == "json" {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
