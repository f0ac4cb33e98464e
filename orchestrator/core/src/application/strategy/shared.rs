// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared-claim strategies (`Common` and `PerWorkspace`).
//!
//! Every claim-backed mount of a workspace ends up on one claim, isolated by
//! its subpath. The scope decides whether that claim is shared by the whole
//! namespace or owned by the workspace.

use super::{ClaimLifecycle, CleanupOutcome, PrepareOptions, WorkspaceVolumesStrategy};
use crate::application::claim_provisioner::ClaimProvisioner;
use crate::application::subpath_jobs::SubpathJobRunner;
use crate::domain::claim::{claim_name, put_label, ClaimTemplate, WORKSPACE_ID_LABEL};
use crate::domain::error::InfrastructureError;
use crate::domain::model::VolumeRequestModel;
use crate::domain::pod_volumes::collapse_to_shared;
use crate::domain::subpath::{prefix_volume_mount_subpaths, workspace_subpath};
use crate::domain::workspace::{RuntimeIdentity, Workspace, WorkspaceId};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimScope {
    /// One claim, named by configuration, shared by every workspace
    Cluster,
    /// One claim per workspace named `{prefix}-{workspaceId}`
    Workspace,
}

pub struct SharedClaimStrategy {
    scope: ClaimScope,
    /// Claim name (cluster scope) or claim name prefix (workspace scope)
    claim_name: String,
    template: ClaimTemplate,
    provisioner: ClaimProvisioner,
    claims: ClaimLifecycle,
    runner: Arc<SubpathJobRunner>,
}

impl SharedClaimStrategy {
    pub fn new(
        scope: ClaimScope,
        claim_name: String,
        template: ClaimTemplate,
        provisioner: ClaimProvisioner,
        claims: ClaimLifecycle,
        runner: Arc<SubpathJobRunner>,
    ) -> Self {
        Self {
            scope,
            claim_name,
            template,
            provisioner,
            claims,
            runner,
        }
    }

    pub fn scope(&self) -> ClaimScope {
        self.scope
    }

    pub(crate) fn provisioner(&self) -> &ClaimProvisioner {
        &self.provisioner
    }

    /// Name of the claim backing `workspace_id`
    pub fn shared_claim_name(&self, workspace_id: &WorkspaceId) -> String {
        match self.scope {
            ClaimScope::Cluster => self.claim_name.clone(),
            ClaimScope::Workspace => format!("{}-{}", self.claim_name, workspace_id),
        }
    }

    fn shared_claim(&self, workspace_id: &WorkspaceId) -> PersistentVolumeClaim {
        let mut claim = self.template.new_claim(&self.shared_claim_name(workspace_id));
        if self.scope == ClaimScope::Workspace {
            put_label(&mut claim, WORKSPACE_ID_LABEL, workspace_id.as_str());
        }
        claim
    }
}

#[async_trait]
impl WorkspaceVolumesStrategy for SharedClaimStrategy {
    async fn provision(
        &self,
        model: &mut VolumeRequestModel,
        identity: &RuntimeIdentity,
    ) -> Result<(), InfrastructureError> {
        let workspace_id = &identity.workspace_id;

        let user_claims = std::mem::take(&mut model.claims).into_values();
        self.provisioner.provision(model, user_claims);
        self.provisioner.convert(model, workspace_id);
        // Subpaths depend on the per-claim identity that collapsing erases.
        prefix_volume_mount_subpaths(model, workspace_id);

        let shared = self.shared_claim(workspace_id);
        let shared_name = claim_name(&shared).to_string();
        collapse_to_shared(model.pods.values_mut(), &shared_name);

        if self.claims.settings().precreate_subpaths {
            model.subpaths_to_create = model.claim_backed_subpaths();
        }
        model.claims = BTreeMap::from([(shared_name.clone(), shared)]);

        info!(
            workspace_id = %workspace_id,
            claim = %shared_name,
            "Provisioned workspace volumes on shared claim"
        );
        Ok(())
    }

    async fn prepare(
        &self,
        model: &VolumeRequestModel,
        identity: &RuntimeIdentity,
        timeout: Duration,
        options: &PrepareOptions,
    ) -> Result<(), InfrastructureError> {
        if model.claims.len() > 1 {
            return Err(InfrastructureError::InvalidState(format!(
                "Expected at most one claim for workspace '{}', found {}",
                identity.workspace_id,
                model.claims.len()
            )));
        }
        let Some(claim) = model.claims.values().next() else {
            return Ok(());
        };

        self.claims
            .ensure_claims(identity, std::iter::once(claim), timeout)
            .await?;

        let settings = self.claims.settings();
        if !settings.precreate_subpaths || model.subpaths_to_create.is_empty() {
            return Ok(());
        }

        let subpaths: Vec<String> = model.subpaths_to_create.iter().cloned().collect();
        let claim = claim_name(claim);
        if let Err(e) = self
            .runner
            .create_dirs(identity, claim, &subpaths, options.debug)
            .await
        {
            if settings.fail_on_precreate_error {
                return Err(e);
            }
            warn!(
                workspace_id = %identity.workspace_id,
                claim = %claim,
                error = %e,
                "Failed to pre-create workspace subpaths, continuing"
            );
        }
        Ok(())
    }

    async fn cleanup(&self, workspace: &Workspace) -> Result<CleanupOutcome, InfrastructureError> {
        match self.scope {
            ClaimScope::Cluster => {
                workspace.id.validate()?;
                let claim = self.shared_claim_name(&workspace.id);
                let handle = self.runner.remove_dirs(
                    &workspace.identity(),
                    &claim,
                    vec![workspace_subpath(&workspace.id)],
                )?;
                info!(
                    workspace_id = %workspace.id,
                    claim = %claim,
                    job = %handle.job(),
                    "Scheduled removal of workspace subpath"
                );
                Ok(CleanupOutcome::RemovalScheduled(handle))
            }
            ClaimScope::Workspace => {
                self.claims.delete_workspace_claims(workspace).await?;
                Ok(CleanupOutcome::ClaimsDeleted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::strategy::PrepareSettings;
    use crate::domain::config::JobSettings;
    use crate::infrastructure::cluster::InMemoryCluster;
    use crate::infrastructure::event_bus::EventBus;

    fn strategy(scope: ClaimScope, cluster: Arc<InMemoryCluster>) -> SharedClaimStrategy {
        let template = ClaimTemplate {
            access_mode: "ReadWriteOnce".to_string(),
            quantity: "10Gi".to_string(),
            storage_class: None,
        };
        let event_bus = EventBus::new(16);
        SharedClaimStrategy::new(
            scope,
            "claim-che-workspace".to_string(),
            template.clone(),
            ClaimProvisioner::new(template),
            ClaimLifecycle::new(
                cluster.clone(),
                event_bus.clone(),
                PrepareSettings {
                    wait_bound: true,
                    precreate_subpaths: true,
                    fail_on_precreate_error: false,
                },
            ),
            Arc::new(SubpathJobRunner::new(cluster, JobSettings::default(), event_bus)),
        )
    }

    #[test]
    fn test_shared_claim_naming() {
        let cluster = Arc::new(InMemoryCluster::new());
        let ws = WorkspaceId::from("ws1");

        let common = strategy(ClaimScope::Cluster, cluster.clone());
        assert_eq!(common.shared_claim_name(&ws), "claim-che-workspace");
        assert!(common.shared_claim(&ws).metadata.labels.is_none());

        let per_workspace = strategy(ClaimScope::Workspace, cluster);
        assert_eq!(per_workspace.shared_claim_name(&ws), "claim-che-workspace-ws1");
        let claim = per_workspace.shared_claim(&ws);
        assert_eq!(
            crate::domain::claim::label(&claim, WORKSPACE_ID_LABEL),
            Some("ws1")
        );
    }

    #[tokio::test]
    async fn test_prepare_rejects_multiple_claims() {
        let cluster = Arc::new(InMemoryCluster::new());
        let strategy = strategy(ClaimScope::Cluster, cluster.clone());
        let template = strategy.template.clone();

        let mut model = VolumeRequestModel::new();
        model.add_claim(template.new_claim("a"));
        model.add_claim(template.new_claim("b"));

        let err = strategy
            .prepare(
                &model,
                &RuntimeIdentity::new("ws1", "che"),
                Duration::from_secs(1),
                &PrepareOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, InfrastructureError::InvalidState(_)));
        assert!(cluster.created_claims().is_empty());
    }

    #[tokio::test]
    async fn test_prepare_skips_existing_claim() {
        let cluster = Arc::new(InMemoryCluster::new());
        let strategy = strategy(ClaimScope::Cluster, cluster.clone());
        cluster.insert_claim("che", strategy.template.new_claim("claim-che-workspace"));

        let mut model = VolumeRequestModel::new();
        strategy
            .provision(&mut model, &RuntimeIdentity::new("ws1", "che"))
            .await
            .unwrap();
        strategy
            .prepare(
                &model,
                &RuntimeIdentity::new("ws1", "che"),
                Duration::from_secs(1),
                &PrepareOptions::default(),
            )
            .await
            .unwrap();

        assert!(cluster.created_claims().is_empty());
        // no mounts, so nothing to pre-create
        assert!(cluster.created_pods().is_empty());
    }
}
