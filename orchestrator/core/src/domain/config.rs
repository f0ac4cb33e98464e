// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Workspace Storage Configuration
//
// Defines the configuration manifest of the storage engine:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Strategy selection (common, per-workspace, unique)
// - Claim template (name, size, access mode, storage class)
// - Helper job settings (image, pull policy, memory, worker pool, timeouts)
// - Logging settings for the CLI

use crate::domain::claim::ClaimTemplate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const API_VERSION: &str = "workspace-volumes/v1";
pub const KIND: &str = "WorkspaceStorageConfig";

const ACCESS_MODES: &[&str] = &["ReadWriteOnce", "ReadOnlyMany", "ReadWriteMany", "ReadWriteOncePod"];

/// Top-level Kubernetes-style storage configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfigManifest {
    /// API version (must be "workspace-volumes/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "WorkspaceStorageConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: StorageConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfigSpec {
    /// Storage lifecycle management; when off, deleted workspaces keep their storage
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub strategy: StrategyKind,

    #[serde(default)]
    pub claim: ClaimSettings,

    /// Block `prepare` until newly created claims are bound
    #[serde(default = "default_true")]
    pub wait_bound: bool,

    /// Create workspace directories inside shared claims before the workspace starts
    #[serde(default = "default_true")]
    pub precreate_subpaths: bool,

    /// Fail `prepare` when the directory pre-creation job fails.
    /// Default: false (the failure is logged and the start continues)
    #[serde(default)]
    pub fail_on_precreate_error: bool,

    #[serde(default)]
    pub jobs: JobSettings,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// One claim shared by every workspace
    #[default]
    Common,
    /// One claim per workspace
    PerWorkspace,
    /// One claim per logical volume
    Unique,
}

impl FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "common" => Ok(Self::Common),
            "per-workspace" | "per_workspace" | "perworkspace" => Ok(Self::PerWorkspace),
            "unique" => Ok(Self::Unique),
            other => anyhow::bail!(
                "Unknown volume strategy '{}'. Supported: common, per-workspace, unique",
                other
            ),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Common => "common",
            Self::PerWorkspace => "per-workspace",
            Self::Unique => "unique",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSettings {
    /// Shared claim name (common) or claim name prefix (per-workspace)
    #[serde(default = "default_claim_name")]
    pub name: String,

    #[serde(default = "default_quantity")]
    pub quantity: String,

    #[serde(default = "default_access_mode")]
    pub access_mode: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

impl ClaimSettings {
    pub fn template(&self) -> ClaimTemplate {
        ClaimTemplate {
            access_mode: self.access_mode.clone(),
            quantity: self.quantity.clone(),
            storage_class: self.storage_class.clone(),
        }
    }
}

impl Default for ClaimSettings {
    fn default() -> Self {
        Self {
            name: default_claim_name(),
            quantity: default_quantity(),
            access_mode: default_access_mode(),
            storage_class: None,
        }
    }
}

/// Settings of the helper jobs that create and remove directories inside claims
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSettings {
    #[serde(default = "default_job_image")]
    pub image: String,

    #[serde(default = "default_pull_policy")]
    pub image_pull_policy: String,

    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,

    /// Size of the worker pool running asynchronous removals
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How long a job may take to reach a terminal phase
    #[serde(default = "default_job_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// How long shutdown waits for in-flight removals before cancelling them
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            image: default_job_image(),
            image_pull_policy: default_pull_policy(),
            memory_limit: default_memory_limit(),
            workers: default_workers(),
            timeout: default_job_timeout(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "compact" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_claim_name() -> String {
    "che-workspace-pvc".to_string()
}

fn default_quantity() -> String {
    "10Gi".to_string()
}

fn default_access_mode() -> String {
    "ReadWriteOnce".to_string()
}

fn default_job_image() -> String {
    "registry.access.redhat.com/ubi8-minimal:8.3".to_string()
}

fn default_pull_policy() -> String {
    "IfNotPresent".to_string()
}

fn default_memory_limit() -> String {
    "250Mi".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_job_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for StorageConfigSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: StrategyKind::default(),
            claim: ClaimSettings::default(),
            wait_bound: true,
            precreate_subpaths: true,
            fail_on_precreate_error: false,
            jobs: JobSettings::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for StorageConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "workspace-storage".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: StorageConfigSpec::default(),
        }
    }
}

impl StorageConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. WSVOL_CONFIG_PATH environment variable
    /// 2. ./wsvol-config.yaml (working directory)
    /// 3. ~/.wsvol/config.yaml (user home)
    /// 4. /etc/wsvol/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("WSVOL_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./wsvol-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".wsvol").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/wsvol/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("WSVOL_STRATEGY") {
            match val.parse::<StrategyKind>() {
                Ok(strategy) => {
                    tracing::info!("Environment override: WSVOL_STRATEGY={}", strategy);
                    self.spec.strategy = strategy;
                }
                Err(e) => tracing::warn!("Ignoring WSVOL_STRATEGY: {}", e),
            }
        }

        if let Some(val) = lookup("WSVOL_CLAIM_NAME") {
            if val.trim().is_empty() {
                tracing::warn!("Ignoring empty WSVOL_CLAIM_NAME");
            } else {
                tracing::info!("Environment override: WSVOL_CLAIM_NAME={}", val);
                self.spec.claim.name = val;
            }
        }

        if let Some(val) = lookup("WSVOL_WAIT_BOUND") {
            if let Some(flag) = parse_flag("WSVOL_WAIT_BOUND", &val) {
                self.spec.wait_bound = flag;
            }
        }

        if let Some(val) = lookup("WSVOL_PRECREATE_SUBPATHS") {
            if let Some(flag) = parse_flag("WSVOL_PRECREATE_SUBPATHS", &val) {
                self.spec.precreate_subpaths = flag;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let claim = &self.spec.claim;
        if claim.name.trim().is_empty() {
            anyhow::bail!("spec.claim.name cannot be empty");
        }
        if claim.quantity.trim().is_empty() {
            anyhow::bail!("spec.claim.quantity cannot be empty");
        }
        if !ACCESS_MODES.contains(&claim.access_mode.as_str()) {
            anyhow::bail!(
                "Unknown access mode '{}'. Supported: {}",
                claim.access_mode,
                ACCESS_MODES.join(", ")
            );
        }

        let jobs = &self.spec.jobs;
        if jobs.image.is_empty() {
            anyhow::bail!("spec.jobs.image cannot be empty");
        }
        if jobs.workers == 0 {
            anyhow::bail!("spec.jobs.workers must be at least 1");
        }
        if jobs.timeout.is_zero() {
            anyhow::bail!("spec.jobs.timeout must be greater than zero");
        }
        if jobs.shutdown_grace.is_zero() {
            anyhow::bail!("spec.jobs.shutdownGrace must be greater than zero");
        }

        match self.spec.observability.log_format.as_str() {
            "compact" | "json" => {}
            other => anyhow::bail!("Unknown log format '{}'. Supported: compact, json", other),
        }

        Ok(())
    }
}

fn parse_flag(name: &str, val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => {
            tracing::info!("Environment override: {}=true", name);
            Some(true)
        }
        "false" | "0" | "no" | "off" => {
            tracing::info!("Environment override: {}=false", name);
            Some(false)
        }
        _ => {
            tracing::warn!(
                "Invalid value for {}: '{}'. Expected true/false. Ignoring.",
                name,
                val
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = StorageConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert_eq!(manifest.spec.strategy, StrategyKind::Common);
        assert_eq!(manifest.spec.claim.name, "che-workspace-pvc");
        assert_eq!(manifest.spec.jobs.workers, 4);
        assert_eq!(manifest.spec.jobs.timeout, Duration::from_secs(300));
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = r#"
apiVersion: workspace-volumes/v1
kind: WorkspaceStorageConfig
metadata:
  name: test
spec:
  strategy: per-workspace
  claim:
    name: claim-che-workspace
    storageClass: fast
  jobs:
    timeout: 90s
"#;
        let manifest = StorageConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.spec.strategy, StrategyKind::PerWorkspace);
        assert_eq!(manifest.spec.claim.name, "claim-che-workspace");
        assert_eq!(manifest.spec.claim.storage_class.as_deref(), Some("fast"));
        assert_eq!(manifest.spec.claim.quantity, "10Gi");
        assert_eq!(manifest.spec.jobs.timeout, Duration::from_secs(90));
        assert_eq!(manifest.spec.jobs.shutdown_grace, Duration::from_secs(30));
        assert!(manifest.spec.wait_bound);
        assert!(!manifest.spec.fail_on_precreate_error);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let mut manifest = StorageConfigManifest::default();
        manifest.spec.strategy = StrategyKind::Unique;
        manifest.spec.jobs.workers = 2;
        manifest.to_yaml_file(&path).unwrap();

        let loaded = StorageConfigManifest::from_yaml_file(&path).unwrap();
        assert_eq!(loaded.spec.strategy, StrategyKind::Unique);
        assert_eq!(loaded.spec.jobs.workers, 2);
    }

    #[test]
    fn test_load_explicit_missing_path_fails() {
        let result = StorageConfigManifest::load_or_default(Some(PathBuf::from(
            "/nonexistent/wsvol-config.yaml",
        )));
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides() {
        let mut manifest = StorageConfigManifest::default();
        let vars = HashMap::from([
            ("WSVOL_STRATEGY", "unique"),
            ("WSVOL_CLAIM_NAME", "shared-claim"),
            ("WSVOL_WAIT_BOUND", "off"),
            ("WSVOL_PRECREATE_SUBPATHS", "maybe"),
        ]);
        manifest.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(manifest.spec.strategy, StrategyKind::Unique);
        assert_eq!(manifest.spec.claim.name, "shared-claim");
        assert!(!manifest.spec.wait_bound);
        // invalid flag is ignored
        assert!(manifest.spec.precreate_subpaths);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut manifest = StorageConfigManifest::default();
        manifest.spec.jobs.workers = 0;
        assert!(manifest.validate().is_err());

        let mut manifest = StorageConfigManifest::default();
        manifest.spec.claim.access_mode = "ReadWriteSometimes".to_string();
        assert!(manifest.validate().is_err());

        let mut manifest = StorageConfigManifest::default();
        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());

        let mut manifest = StorageConfigManifest::default();
        manifest.spec.claim.name = "  ".to_string();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_strategy_kind_parse() {
        assert_eq!("common".parse::<StrategyKind>().unwrap(), StrategyKind::Common);
        assert_eq!("Per-Workspace".parse::<StrategyKind>().unwrap(), StrategyKind::PerWorkspace);
        assert_eq!("unique".parse::<StrategyKind>().unwrap(), StrategyKind::Unique);
        assert!("sharded".parse::<StrategyKind>().is_err());
    }
}
