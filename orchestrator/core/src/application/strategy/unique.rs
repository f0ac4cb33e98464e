// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! One claim per logical volume. Claims are labeled with the owning
//! workspace so a restarted workspace finds and reuses them.

use super::{ClaimLifecycle, CleanupOutcome, PrepareOptions, WorkspaceVolumesStrategy};
use crate::application::claim_provisioner::ClaimProvisioner;
use crate::domain::claim::{put_label, WORKSPACE_ID_LABEL};
use crate::domain::error::InfrastructureError;
use crate::domain::model::VolumeRequestModel;
use crate::domain::subpath::prefix_volume_mount_subpaths;
use crate::domain::workspace::{RuntimeIdentity, Workspace};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

pub struct UniqueClaimStrategy {
    provisioner: ClaimProvisioner,
    claims: ClaimLifecycle,
}

impl UniqueClaimStrategy {
    pub fn new(provisioner: ClaimProvisioner, claims: ClaimLifecycle) -> Self {
        Self {
            provisioner,
            claims,
        }
    }

    pub(crate) fn provisioner(&self) -> &ClaimProvisioner {
        &self.provisioner
    }
}

#[async_trait]
impl WorkspaceVolumesStrategy for UniqueClaimStrategy {
    async fn provision(
        &self,
        model: &mut VolumeRequestModel,
        identity: &RuntimeIdentity,
    ) -> Result<(), InfrastructureError> {
        let workspace_id = &identity.workspace_id;
        let existing = self
            .claims
            .cluster()
            .list_claims_by_label(&identity.namespace, WORKSPACE_ID_LABEL, workspace_id.as_str())
            .await?;
        let reused = existing.len();

        let user_claims = std::mem::take(&mut model.claims).into_values();
        for claim in existing {
            model.add_claim(claim);
        }
        self.provisioner.provision(model, user_claims);
        self.provisioner.convert(model, workspace_id);
        prefix_volume_mount_subpaths(model, workspace_id);

        for claim in model.claims.values_mut() {
            put_label(claim, WORKSPACE_ID_LABEL, workspace_id.as_str());
        }

        info!(
            workspace_id = %workspace_id,
            claims = model.claims.len(),
            reused = reused,
            "Provisioned workspace volumes on unique claims"
        );
        Ok(())
    }

    async fn prepare(
        &self,
        model: &VolumeRequestModel,
        identity: &RuntimeIdentity,
        timeout: Duration,
        _options: &PrepareOptions,
    ) -> Result<(), InfrastructureError> {
        self.claims
            .ensure_claims(identity, model.claims.values(), timeout)
            .await?;
        Ok(())
    }

    async fn cleanup(&self, workspace: &Workspace) -> Result<CleanupOutcome, InfrastructureError> {
        self.claims.delete_workspace_claims(workspace).await?;
        Ok(CleanupOutcome::ClaimsDeleted)
    }
}
