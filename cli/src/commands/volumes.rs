// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Volume lifecycle commands
//!
//! Commands: provision, prepare, cleanup

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use workspace_volumes::application::strategy::{
    CleanupOutcome, PrepareOptions, VolumeStrategy, WorkspaceVolumesStrategy,
};
use workspace_volumes::application::subpath_jobs::SubpathJobRunner;
use workspace_volumes::domain::config::StorageConfigManifest;
use workspace_volumes::domain::model::VolumeRequestModel;
use workspace_volumes::domain::workspace::{RuntimeIdentity, Workspace, PERSIST_VOLUMES_ATTRIBUTE};
use workspace_volumes::infrastructure::cluster::{create_cluster_client, ClusterBackend};
use workspace_volumes::infrastructure::event_bus::EventBus;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Args)]
pub struct ProvisionArgs {
    /// Volume request model (YAML or JSON)
    #[arg(short, long, value_name = "FILE")]
    model: PathBuf,

    /// Workspace ID
    #[arg(short, long)]
    workspace: String,

    /// Target namespace
    #[arg(short, long, default_value = "default")]
    namespace: String,

    /// Use an empty in-memory cluster instead of the real one
    #[arg(long)]
    offline: bool,

    /// Output format of the rewritten model
    #[arg(long, value_enum, default_value = "yaml")]
    format: OutputFormat,
}

#[derive(Args)]
pub struct PrepareArgs {
    /// Volume request model (YAML or JSON)
    #[arg(short, long, value_name = "FILE")]
    model: PathBuf,

    /// Workspace ID
    #[arg(short, long)]
    workspace: String,

    /// Target namespace
    #[arg(short, long, default_value = "default")]
    namespace: String,

    /// How long to wait for claims to be bound
    #[arg(long, default_value = "300")]
    timeout_secs: u64,

    /// Log helper job output even when jobs succeed
    #[arg(long)]
    debug: bool,
}

#[derive(Args)]
pub struct CleanupArgs {
    /// Workspace ID
    #[arg(short, long)]
    workspace: String,

    /// Target namespace
    #[arg(short, long, default_value = "default")]
    namespace: String,

    /// The workspace ran without persistent storage
    #[arg(long)]
    ephemeral: bool,
}

/// Everything a command needs to run a strategy
struct Engine {
    /// Storage lifecycle management switch from the configuration
    enabled: bool,
    strategy: VolumeStrategy,
    runner: Arc<SubpathJobRunner>,
}

async fn engine(config_path: Option<PathBuf>, backend: ClusterBackend) -> Result<Engine> {
    let config = StorageConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    let cluster = create_cluster_client(backend)
        .await
        .context("Failed to connect to the cluster")?;
    let event_bus = EventBus::with_default_capacity();
    let runner = Arc::new(SubpathJobRunner::new(
        cluster.clone(),
        config.spec.jobs.clone(),
        event_bus.clone(),
    ));
    let strategy = VolumeStrategy::from_config(&config.spec, cluster, runner.clone(), event_bus);
    info!(strategy = %strategy.kind(), "Volume strategy ready");

    Ok(Engine {
        enabled: config.spec.enabled,
        strategy,
        runner,
    })
}

fn read_model(path: &Path) -> Result<VolumeRequestModel> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read model {:?}", path))?;
    VolumeRequestModel::from_yaml_str(&content)
        .with_context(|| format!("Failed to parse model {:?}", path))
}

pub async fn provision(args: ProvisionArgs, config_path: Option<PathBuf>) -> Result<()> {
    let backend = if args.offline {
        ClusterBackend::InMemory
    } else {
        ClusterBackend::Kubernetes
    };
    let engine = engine(config_path, backend).await?;
    let identity = RuntimeIdentity::new(args.workspace, args.namespace);

    let mut model = read_model(&args.model)?;
    engine
        .strategy
        .provision(&mut model, &identity)
        .await
        .context("Provisioning failed")?;

    let rendered = match args.format {
        OutputFormat::Yaml => serde_yaml::to_string(&model)?,
        OutputFormat::Json => serde_json::to_string_pretty(&model)?,
    };
    println!("{}", rendered);
    Ok(())
}

pub async fn prepare(args: PrepareArgs, config_path: Option<PathBuf>) -> Result<()> {
    let engine = engine(config_path, ClusterBackend::Kubernetes).await?;
    let identity = RuntimeIdentity::new(args.workspace, args.namespace);

    let mut model = read_model(&args.model)?;
    engine
        .strategy
        .provision(&mut model, &identity)
        .await
        .context("Provisioning failed")?;

    let result = engine
        .strategy
        .prepare(
            &model,
            &identity,
            Duration::from_secs(args.timeout_secs),
            &PrepareOptions { debug: args.debug },
        )
        .await;
    engine.runner.shutdown().await;
    result.context("Preparing workspace storage failed")?;

    println!(
        "{}",
        format!(
            "✓ Storage ready for workspace {} ({} claim(s))",
            identity.workspace_id,
            model.claims.len()
        )
        .green()
    );
    Ok(())
}

pub async fn cleanup(args: CleanupArgs, config_path: Option<PathBuf>) -> Result<()> {
    let engine = engine(config_path, ClusterBackend::Kubernetes).await?;
    if !engine.enabled {
        println!(
            "{}",
            "Storage lifecycle management is disabled, nothing was removed".yellow()
        );
        return Ok(());
    }

    let mut workspace = Workspace::new(args.workspace, args.namespace);
    if args.ephemeral {
        workspace = workspace.with_attribute(PERSIST_VOLUMES_ATTRIBUTE, "false");
    }

    let outcome = engine
        .strategy
        .cleanup(&workspace)
        .await
        .context("Cleanup failed")?;

    match outcome {
        CleanupOutcome::Skipped => {
            println!("{}", "Ephemeral workspace, nothing to clean up".yellow());
        }
        CleanupOutcome::ClaimsDeleted => {
            println!(
                "{}",
                format!("✓ Deleted claims of workspace {}", workspace.id).green()
            );
        }
        CleanupOutcome::RemovalScheduled(handle) => {
            let job = handle.job().to_string();
            engine
                .runner
                .complete_removal(handle)
                .await
                .with_context(|| format!("Removal job {} failed", job))?;
            println!(
                "{}",
                format!("✓ Removed storage of workspace {}", workspace.id).green()
            );
        }
    }
    Ok(())
}
