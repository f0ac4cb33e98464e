// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Subpath Prefixer
//!
//! Places every claim-backed mount under `{workspaceId}/{logicalVolume}` so
//! that tenants and machines sharing one claim never see each other's data.
//! Mounts of the logs volume get an extra `/{machineName}` level because
//! machines running the same agents write identically named log files.
//!
//! Prefixing depends on the claim behind each pod volume, so it has to run
//! after logical names are final and before claims are collapsed into a
//! shared one.

use crate::domain::claim::ensure_logical_name;
use crate::domain::model::{machine_name, VolumeRequestModel, LOGS_VOLUME_NAME};
use crate::domain::workspace::WorkspaceId;
use std::collections::HashMap;
use tracing::debug;

/// Subpath of a logical volume inside a claim
pub fn volume_subpath(workspace_id: &WorkspaceId, volume_name: &str) -> String {
    format!("{}/{}", workspace_id, volume_name)
}

/// Subpath of a logical volume inside a claim, split per machine
pub fn machine_volume_subpath(
    workspace_id: &WorkspaceId,
    volume_name: &str,
    machine_name: &str,
) -> String {
    format!("{}/{}/{}", workspace_id, volume_name, machine_name)
}

/// Root directory of a workspace inside a shared claim
pub fn workspace_subpath(workspace_id: &WorkspaceId) -> String {
    workspace_id.to_string()
}

fn mount_subpath(
    workspace_id: &WorkspaceId,
    volume_name: &str,
    machine: &str,
    original: Option<&str>,
) -> String {
    let base = if volume_name == LOGS_VOLUME_NAME {
        machine_volume_subpath(workspace_id, volume_name, machine)
    } else {
        volume_subpath(workspace_id, volume_name)
    };

    match original.filter(|subpath| !subpath.is_empty()) {
        Some(subpath) if subpath.starts_with('/') => format!("{}{}", base, subpath),
        Some(subpath) => format!("{}/{}", base, subpath),
        None => base,
    }
}

/// Prefix the subpath of every claim-backed mount in the model
pub fn prefix_volume_mount_subpaths(model: &mut VolumeRequestModel, workspace_id: &WorkspaceId) {
    let claim_to_volume: HashMap<String, String> = model
        .claims
        .iter_mut()
        .map(|(name, claim)| (name.clone(), ensure_logical_name(claim)))
        .collect();

    for pod in model.pods.values_mut() {
        let volume_to_claim = pod.claim_backed_volumes();
        if volume_to_claim.is_empty() {
            continue;
        }
        let pod_name = pod.name.clone();

        for container in pod.all_containers_mut() {
            let machine = machine_name(&pod_name, &container.name);
            for mount in container.volume_mounts.iter_mut().flatten() {
                let Some(claim) = volume_to_claim.get(&mount.name) else {
                    continue;
                };
                // Claims outside the model keep their own name as logical identity.
                let volume_name = claim_to_volume
                    .get(claim)
                    .map(String::as_str)
                    .unwrap_or(claim.as_str());
                let subpath =
                    mount_subpath(workspace_id, volume_name, &machine, mount.sub_path.as_deref());
                debug!(
                    machine = %machine,
                    mount_path = %mount.mount_path,
                    subpath = %subpath,
                    "Prefixed volume mount subpath"
                );
                mount.sub_path = Some(subpath);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::claim::{claim_volume, put_label, volume_mount, ClaimTemplate, VOLUME_NAME_LABEL};
    use crate::domain::model::PodData;
    use k8s_openapi::api::core::v1::{Container, PodSpec};

    fn template() -> ClaimTemplate {
        ClaimTemplate {
            access_mode: "ReadWriteOnce".to_string(),
            quantity: "1Gi".to_string(),
            storage_class: None,
        }
    }

    fn model_with_mount(volume: &str, sub_path: Option<&str>) -> VolumeRequestModel {
        let mut model = VolumeRequestModel::new();
        let mut claim = template().new_claim("pvc-1");
        put_label(&mut claim, VOLUME_NAME_LABEL, volume);
        model.add_claim(claim);
        model.add_pod(PodData::new(
            "pod1",
            PodSpec {
                containers: vec![Container {
                    name: "main".to_string(),
                    volume_mounts: Some(vec![volume_mount("vol", "/mnt", sub_path)]),
                    ..Default::default()
                }],
                volumes: Some(vec![claim_volume("vol", "pvc-1")]),
                ..Default::default()
            },
        ));
        model
    }

    fn first_subpath(model: &VolumeRequestModel) -> Option<String> {
        model.pods["pod1"].spec.containers[0].volume_mounts.as_ref().unwrap()[0]
            .sub_path
            .clone()
    }

    #[test]
    fn test_prefix_empty_subpath() {
        let mut model = model_with_mount("data", Some(""));
        prefix_volume_mount_subpaths(&mut model, &WorkspaceId::from("ws1"));
        assert_eq!(first_subpath(&model).as_deref(), Some("ws1/data"));
    }

    #[test]
    fn test_prefix_normalizes_leading_separator() {
        let mut with_slash = model_with_mount("data", Some("/nested/dir"));
        prefix_volume_mount_subpaths(&mut with_slash, &WorkspaceId::from("ws1"));
        assert_eq!(first_subpath(&with_slash).as_deref(), Some("ws1/data/nested/dir"));

        let mut without_slash = model_with_mount("data", Some("nested/dir"));
        prefix_volume_mount_subpaths(&mut without_slash, &WorkspaceId::from("ws1"));
        assert_eq!(first_subpath(&without_slash).as_deref(), Some("ws1/data/nested/dir"));
    }

    #[test]
    fn test_logs_volume_is_split_per_machine() {
        let mut model = model_with_mount(LOGS_VOLUME_NAME, None);
        prefix_volume_mount_subpaths(&mut model, &WorkspaceId::from("ws1"));
        assert_eq!(first_subpath(&model).as_deref(), Some("ws1/logs/pod1/main"));
    }

    #[test]
    fn test_unlabeled_claim_uses_own_name() {
        let mut model = model_with_mount("data", None);
        model.claims.get_mut("pvc-1").unwrap().metadata.labels = None;
        prefix_volume_mount_subpaths(&mut model, &WorkspaceId::from("ws1"));
        assert_eq!(first_subpath(&model).as_deref(), Some("ws1/pvc-1"));
        assert_eq!(
            crate::domain::claim::label(&model.claims["pvc-1"], VOLUME_NAME_LABEL),
            Some("pvc-1")
        );
    }

    #[test]
    fn test_non_claim_mounts_untouched() {
        let mut model = model_with_mount("data", None);
        let pod = model.pods.get_mut("pod1").unwrap();
        pod.spec.containers[0]
            .volume_mounts
            .as_mut()
            .unwrap()
            .push(volume_mount("config", "/etc/config", None));
        prefix_volume_mount_subpaths(&mut model, &WorkspaceId::from("ws1"));
        let mounts = model.pods["pod1"].spec.containers[0].volume_mounts.clone().unwrap();
        assert_eq!(mounts[1].sub_path, None);
    }

    #[test]
    fn test_distinct_workspaces_get_distinct_subpaths() {
        let ws1 = volume_subpath(&WorkspaceId::from("ws1"), "data");
        let ws2 = volume_subpath(&WorkspaceId::from("ws2"), "data");
        let other_volume = volume_subpath(&WorkspaceId::from("ws1"), "maven");
        assert_ne!(ws1, ws2);
        assert_ne!(ws1, other_volume);
    }
}
