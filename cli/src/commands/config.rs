// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use workspace_volumes::domain::config::StorageConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./wsvol-config.yaml")]
        output: PathBuf,

        /// Include comments explaining every field
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = StorageConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. WSVOL_CONFIG_PATH: {}",
            std::env::var("WSVOL_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./wsvol-config.yaml");
        println!("  4. ~/.wsvol/config.yaml");
        println!("  5. /etc/wsvol/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Strategy:".bold());
    println!("  Kind: {}", spec.strategy);
    println!("  Lifecycle management: {}", enabled(spec.enabled));
    println!("  Wait for bound claims: {}", enabled(spec.wait_bound));
    println!(
        "  Pre-create subpaths: {} (fail on error: {})",
        enabled(spec.precreate_subpaths),
        spec.fail_on_precreate_error
    );
    println!();

    println!("{}", "Claim:".bold());
    println!("  Name: {}", spec.claim.name);
    println!("  Size: {}", spec.claim.quantity);
    println!("  Access mode: {}", spec.claim.access_mode);
    println!(
        "  Storage class: {}",
        spec.claim.storage_class.as_deref().unwrap_or("(cluster default)")
    );
    println!();

    println!("{}", "Jobs:".bold());
    println!("  Image: {} ({})", spec.jobs.image, spec.jobs.image_pull_policy);
    println!("  Memory limit: {}", spec.jobs.memory_limit);
    println!("  Workers: {}", spec.jobs.workers);
    println!("  Timeout: {:?}", spec.jobs.timeout);
    println!("  Shutdown grace: {:?}", spec.jobs.shutdown_grace);
    println!();

    Ok(())
}

fn enabled(flag: bool) -> colored::ColoredString {
    if flag {
        "enabled".green()
    } else {
        "disabled".yellow()
    }
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = StorageConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    std::fs::write(&output, sample(with_examples))
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

fn sample(with_examples: bool) -> &'static str {
    if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    }
}
