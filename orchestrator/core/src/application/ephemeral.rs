// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Ephemeral Adapter
//!
//! Provisions a workspace that opted out of persistence. Mounts are built and
//! prefixed exactly as for a persistent workspace, then every claim-backed
//! volume is swapped for an `emptyDir` and the claims are dropped, so nothing
//! is ever created on the cluster. Data in an `emptyDir` is gone as soon as
//! its pod is removed.

use crate::application::claim_provisioner::ClaimProvisioner;
use crate::domain::model::VolumeRequestModel;
use crate::domain::pod_volumes::replace_claims_with_empty_dir;
use crate::domain::subpath::prefix_volume_mount_subpaths;
use crate::domain::workspace::WorkspaceId;
use tracing::info;

#[derive(Debug, Clone)]
pub struct EphemeralAdapter {
    provisioner: ClaimProvisioner,
}

impl EphemeralAdapter {
    pub fn new(provisioner: ClaimProvisioner) -> Self {
        Self { provisioner }
    }

    pub fn provision(&self, model: &mut VolumeRequestModel, workspace_id: &WorkspaceId) {
        let user_claims = std::mem::take(&mut model.claims).into_values();
        self.provisioner.provision(model, user_claims);
        self.provisioner.convert(model, workspace_id);
        prefix_volume_mount_subpaths(model, workspace_id);

        replace_claims_with_empty_dir(model.pods.values_mut());
        model.claims.clear();
        model.subpaths_to_create.clear();

        info!(workspace_id = %workspace_id, "Provisioned ephemeral volumes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::claim::{claim_volume, volume_mount, ClaimTemplate};
    use crate::domain::model::{MachineConfig, PodData};
    use k8s_openapi::api::core::v1::{Container, PodSpec};

    #[test]
    fn test_ephemeral_model_has_no_claims() {
        let template = ClaimTemplate {
            access_mode: "ReadWriteOnce".to_string(),
            quantity: "1Gi".to_string(),
            storage_class: None,
        };
        let adapter = EphemeralAdapter::new(ClaimProvisioner::new(template.clone()));

        let mut model = VolumeRequestModel::new();
        model.add_claim(template.new_claim("user-claim"));
        model.add_pod(PodData::new(
            "pod1",
            PodSpec {
                containers: vec![Container {
                    name: "main".to_string(),
                    volume_mounts: Some(vec![volume_mount("user", "/user", None)]),
                    ..Default::default()
                }],
                volumes: Some(vec![claim_volume("user", "user-claim")]),
                ..Default::default()
            },
        ));
        model
            .machines
            .insert("pod1/main".to_string(), MachineConfig::default().with_volume("data", "/data"));

        adapter.provision(&mut model, &WorkspaceId::from("ws1"));

        assert!(model.claims.is_empty());
        let pod = &model.pods["pod1"];
        assert_eq!(pod.volumes().len(), 2);
        assert!(pod.volumes().iter().all(|v| v.empty_dir.is_some() && v.persistent_volume_claim.is_none()));

        let mounts = pod.spec.containers[0].volume_mounts.as_ref().unwrap();
        let data = mounts.iter().find(|m| m.mount_path == "/data").unwrap();
        assert_eq!(data.sub_path.as_deref(), Some("ws1/data"));
        let user = mounts.iter().find(|m| m.mount_path == "/user").unwrap();
        assert_eq!(user.sub_path.as_deref(), Some("ws1/user-claim"));
    }
}
