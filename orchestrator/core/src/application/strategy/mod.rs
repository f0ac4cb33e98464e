// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workspace Volume Strategies
//!
//! A strategy decides how many claims back a workspace and what "removing
//! a workspace's storage" means:
//!
//! | Strategy       | Claims                              | Cleanup                          |
//! |----------------|-------------------------------------|----------------------------------|
//! | `Common`       | one, shared by every workspace      | remove the workspace subtree     |
//! | `PerWorkspace` | one per workspace, `{prefix}-{id}`  | delete the workspace's claims    |
//! | `Unique`       | one per logical volume              | delete the workspace's claims    |
//!
//! Every strategy follows the same lifecycle:
//! 1. `provision` rewrites the model in memory.
//! 2. `prepare` realizes the model on the cluster and may be repeated on restart.
//! 3. `cleanup` releases the storage of a deleted workspace.
//!
//! Ephemeral workspaces bypass the strategy: they are provisioned by the
//! `EphemeralAdapter`, need no preparation and have nothing to clean up.

pub mod shared;
pub mod unique;

pub use shared::{ClaimScope, SharedClaimStrategy};
pub use unique::UniqueClaimStrategy;

use crate::application::claim_provisioner::ClaimProvisioner;
use crate::application::ephemeral::EphemeralAdapter;
use crate::application::subpath_jobs::{RemovalHandle, SubpathJobRunner};
use crate::domain::claim::claim_name;
use crate::domain::cluster::{ClusterClient, ClusterError};
use crate::domain::config::{StorageConfigSpec, StrategyKind};
use crate::domain::error::InfrastructureError;
use crate::domain::events::StorageEvent;
use crate::domain::model::VolumeRequestModel;
use crate::domain::workspace::{RuntimeIdentity, Workspace};
use crate::infrastructure::event_bus::EventBus;
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Option key enabling verbose job output during `prepare`
pub const DEBUG_WORKSPACE_START: &str = "debug-workspace-start";

/// Caller options for `prepare`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareOptions {
    /// Fetch and log job output even when the job succeeds
    pub debug: bool,
}

impl PrepareOptions {
    pub fn from_map(options: &HashMap<String, String>) -> Self {
        Self {
            debug: options
                .get(DEBUG_WORKSPACE_START)
                .is_some_and(|value| value.eq_ignore_ascii_case("true")),
        }
    }
}

/// What `cleanup` did for a workspace
#[derive(Debug)]
pub enum CleanupOutcome {
    /// Nothing to clean up (ephemeral workspace)
    Skipped,
    /// The workspace's claims were deleted
    ClaimsDeleted,
    /// Removal of the workspace subtree was queued
    RemovalScheduled(RemovalHandle),
}

#[async_trait]
pub trait WorkspaceVolumesStrategy: Send + Sync {
    /// Rewrite `model` so that every claim-backed mount uses the claims of this strategy
    async fn provision(
        &self,
        model: &mut VolumeRequestModel,
        identity: &RuntimeIdentity,
    ) -> Result<(), InfrastructureError>;

    /// Create what `model` needs on the cluster; repeated calls are no-ops
    async fn prepare(
        &self,
        model: &VolumeRequestModel,
        identity: &RuntimeIdentity,
        timeout: Duration,
        options: &PrepareOptions,
    ) -> Result<(), InfrastructureError>;

    /// Release the storage owned by `workspace`
    async fn cleanup(&self, workspace: &Workspace) -> Result<CleanupOutcome, InfrastructureError>;
}

/// Settings shared by every strategy
#[derive(Debug, Clone, Copy)]
pub struct PrepareSettings {
    pub wait_bound: bool,
    pub precreate_subpaths: bool,
    pub fail_on_precreate_error: bool,
}

impl From<&StorageConfigSpec> for PrepareSettings {
    fn from(spec: &StorageConfigSpec) -> Self {
        Self {
            wait_bound: spec.wait_bound,
            precreate_subpaths: spec.precreate_subpaths,
            fail_on_precreate_error: spec.fail_on_precreate_error,
        }
    }
}

/// The configured strategy
pub enum VolumeStrategy {
    Common(SharedClaimStrategy),
    PerWorkspace(SharedClaimStrategy),
    Unique(UniqueClaimStrategy),
}

impl VolumeStrategy {
    pub fn from_config(
        spec: &StorageConfigSpec,
        cluster: Arc<dyn ClusterClient>,
        runner: Arc<SubpathJobRunner>,
        event_bus: EventBus,
    ) -> Self {
        let provisioner = ClaimProvisioner::new(spec.claim.template());
        let settings = PrepareSettings::from(spec);
        let claims = ClaimLifecycle::new(cluster, event_bus, settings);

        match spec.strategy {
            StrategyKind::Common => VolumeStrategy::Common(SharedClaimStrategy::new(
                ClaimScope::Cluster,
                spec.claim.name.clone(),
                spec.claim.template(),
                provisioner,
                claims,
                runner,
            )),
            StrategyKind::PerWorkspace => VolumeStrategy::PerWorkspace(SharedClaimStrategy::new(
                ClaimScope::Workspace,
                spec.claim.name.clone(),
                spec.claim.template(),
                provisioner,
                claims,
                runner,
            )),
            StrategyKind::Unique => {
                VolumeStrategy::Unique(UniqueClaimStrategy::new(provisioner, claims))
            }
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            VolumeStrategy::Common(_) => StrategyKind::Common,
            VolumeStrategy::PerWorkspace(_) => StrategyKind::PerWorkspace,
            VolumeStrategy::Unique(_) => StrategyKind::Unique,
        }
    }

    fn inner(&self) -> &dyn WorkspaceVolumesStrategy {
        match self {
            VolumeStrategy::Common(strategy) | VolumeStrategy::PerWorkspace(strategy) => {
                strategy as &dyn WorkspaceVolumesStrategy
            }
            VolumeStrategy::Unique(strategy) => strategy,
        }
    }

    fn ephemeral_adapter(&self) -> EphemeralAdapter {
        let provisioner = match self {
            VolumeStrategy::Common(strategy) | VolumeStrategy::PerWorkspace(strategy) => {
                strategy.provisioner()
            }
            VolumeStrategy::Unique(strategy) => strategy.provisioner(),
        };
        EphemeralAdapter::new(provisioner.clone())
    }
}

#[async_trait]
impl WorkspaceVolumesStrategy for VolumeStrategy {
    async fn provision(
        &self,
        model: &mut VolumeRequestModel,
        identity: &RuntimeIdentity,
    ) -> Result<(), InfrastructureError> {
        identity.workspace_id.validate()?;
        if model.is_ephemeral() {
            self.ephemeral_adapter().provision(model, &identity.workspace_id);
            return Ok(());
        }
        self.inner().provision(model, identity).await
    }

    async fn prepare(
        &self,
        model: &VolumeRequestModel,
        identity: &RuntimeIdentity,
        timeout: Duration,
        options: &PrepareOptions,
    ) -> Result<(), InfrastructureError> {
        identity.workspace_id.validate()?;
        if model.is_ephemeral() {
            debug!(workspace_id = %identity.workspace_id, "Ephemeral workspace, nothing to prepare");
            return Ok(());
        }
        self.inner().prepare(model, identity, timeout, options).await
    }

    async fn cleanup(&self, workspace: &Workspace) -> Result<CleanupOutcome, InfrastructureError> {
        workspace.id.validate()?;
        if workspace.is_ephemeral() {
            debug!(workspace_id = %workspace.id, "Ephemeral workspace, nothing to clean up");
            return Ok(CleanupOutcome::Skipped);
        }
        self.inner().cleanup(workspace).await
    }
}

/// Claim creation, bind waiting and label deletion as shared by the strategies
pub struct ClaimLifecycle {
    cluster: Arc<dyn ClusterClient>,
    event_bus: EventBus,
    settings: PrepareSettings,
}

impl ClaimLifecycle {
    pub fn new(cluster: Arc<dyn ClusterClient>, event_bus: EventBus, settings: PrepareSettings) -> Self {
        Self {
            cluster,
            event_bus,
            settings,
        }
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterClient> {
        &self.cluster
    }

    pub fn settings(&self) -> &PrepareSettings {
        &self.settings
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Create the claims missing from the cluster, then wait for the created ones to bind.
    ///
    /// Returns the names of the claims created by this call.
    pub async fn ensure_claims<'a>(
        &self,
        identity: &RuntimeIdentity,
        claims: impl IntoIterator<Item = &'a PersistentVolumeClaim>,
        timeout: Duration,
    ) -> Result<Vec<String>, InfrastructureError> {
        let namespace = identity.namespace.as_str();
        let mut created = Vec::new();

        for claim in claims {
            let name = claim_name(claim);
            if self.cluster.get_claim(namespace, name).await?.is_some() {
                debug!(namespace = %namespace, claim = %name, "Claim already exists");
                continue;
            }

            match self.cluster.create_claim(namespace, claim).await {
                Ok(_) => {}
                Err(ClusterError::AlreadyExists(_)) => {
                    // Created concurrently by another workspace start
                    debug!(namespace = %namespace, claim = %name, "Claim created concurrently");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            metrics::counter!("workspace_volumes_claims_created_total").increment(1);
            info!(
                workspace_id = %identity.workspace_id,
                namespace = %namespace,
                claim = %name,
                "Created claim"
            );
            self.event_bus.publish_storage_event(StorageEvent::ClaimCreated {
                workspace_id: identity.workspace_id.clone(),
                namespace: namespace.to_string(),
                claim: name.to_string(),
                created_at: Utc::now(),
            });
            created.push(name.to_string());
        }

        if self.settings.wait_bound {
            for name in &created {
                self.cluster
                    .wait_claim_bound(namespace, name, timeout)
                    .await
                    .map_err(|e| match e {
                        ClusterError::Timeout { after, .. } => InfrastructureError::ClaimBindTimeout {
                            claim: name.clone(),
                            timeout: after,
                        },
                        other => InfrastructureError::Cluster(other),
                    })?;
                debug!(namespace = %namespace, claim = %name, "Claim bound");
            }
        }

        Ok(created)
    }

    /// Delete every claim labeled with the workspace id
    pub async fn delete_workspace_claims(&self, workspace: &Workspace) -> Result<(), InfrastructureError> {
        self.cluster
            .delete_claims_by_label(
                &workspace.namespace,
                crate::domain::claim::WORKSPACE_ID_LABEL,
                workspace.id.as_str(),
            )
            .await?;
        info!(
            workspace_id = %workspace.id,
            namespace = %workspace.namespace,
            "Deleted workspace claims"
        );
        self.event_bus.publish_storage_event(StorageEvent::ClaimsDeleted {
            workspace_id: workspace.id.clone(),
            namespace: workspace.namespace.clone(),
            deleted_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::claim::ClaimTemplate;
    use crate::infrastructure::cluster::InMemoryCluster;
    use k8s_openapi::api::core::v1::Pod;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Reports the next claim lookup as missing, like a start racing another start
    struct StaleReadCluster {
        inner: InMemoryCluster,
        stale: AtomicBool,
    }

    #[async_trait]
    impl ClusterClient for StaleReadCluster {
        async fn get_claim(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<PersistentVolumeClaim>, ClusterError> {
            if self.stale.swap(false, Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.get_claim(namespace, name).await
        }

        async fn list_claims_by_label(
            &self,
            namespace: &str,
            key: &str,
            value: &str,
        ) -> Result<Vec<PersistentVolumeClaim>, ClusterError> {
            self.inner.list_claims_by_label(namespace, key, value).await
        }

        async fn create_claim(
            &self,
            namespace: &str,
            claim: &PersistentVolumeClaim,
        ) -> Result<PersistentVolumeClaim, ClusterError> {
            self.inner.create_claim(namespace, claim).await
        }

        async fn delete_claims_by_label(
            &self,
            namespace: &str,
            key: &str,
            value: &str,
        ) -> Result<(), ClusterError> {
            self.inner.delete_claims_by_label(namespace, key, value).await
        }

        async fn wait_claim_bound(
            &self,
            namespace: &str,
            name: &str,
            timeout: Duration,
        ) -> Result<(), ClusterError> {
            self.inner.wait_claim_bound(namespace, name, timeout).await
        }

        async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ClusterError> {
            self.inner.create_pod(namespace, pod).await
        }

        async fn wait_pod_finished(
            &self,
            namespace: &str,
            name: &str,
            timeout: Duration,
        ) -> Result<Pod, ClusterError> {
            self.inner.wait_pod_finished(namespace, name, timeout).await
        }

        async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String, ClusterError> {
            self.inner.pod_logs(namespace, name).await
        }

        async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
            self.inner.delete_pod(namespace, name).await
        }
    }

    #[tokio::test]
    async fn test_concurrently_created_claim_is_treated_as_present() {
        let template = ClaimTemplate {
            access_mode: "ReadWriteOnce".to_string(),
            quantity: "1Gi".to_string(),
            storage_class: None,
        };
        let cluster = Arc::new(StaleReadCluster {
            inner: InMemoryCluster::new(),
            stale: AtomicBool::new(true),
        });
        // Left unbound so that waiting on it would time out
        cluster.inner.set_auto_bind(false);
        cluster
            .inner
            .insert_claim("che", template.new_claim("che-workspace-pvc"));

        let lifecycle = ClaimLifecycle::new(
            cluster.clone(),
            EventBus::new(16),
            PrepareSettings {
                wait_bound: true,
                precreate_subpaths: false,
                fail_on_precreate_error: false,
            },
        );
        let claim = template.new_claim("che-workspace-pvc");
        let created = lifecycle
            .ensure_claims(
                &RuntimeIdentity::new("ws2", "che"),
                std::iter::once(&claim),
                Duration::from_millis(50),
            )
            .await
            .unwrap();

        assert!(created.is_empty());
        assert!(cluster.inner.created_claims().is_empty());
    }

    #[test]
    fn test_prepare_options_from_map() {
        let options = HashMap::from([(DEBUG_WORKSPACE_START.to_string(), "TRUE".to_string())]);
        assert!(PrepareOptions::from_map(&options).debug);

        let options = HashMap::from([(DEBUG_WORKSPACE_START.to_string(), "no".to_string())]);
        assert!(!PrepareOptions::from_map(&options).debug);

        assert!(!PrepareOptions::from_map(&HashMap::new()).debug);
    }
}
