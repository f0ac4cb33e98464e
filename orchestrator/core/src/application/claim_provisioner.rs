// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Claim Provisioner
//!
//! Turns the logical volumes declared by machines into concrete claims, pod
//! volumes and mounts, and merges user-declared claims into the model by
//! logical name.
//!
//! Both operations only rewrite the in-memory model and never fail: the
//! caller is responsible for handing in a well-formed model.

use crate::domain::claim::{
    claim_name, claim_volume, ensure_logical_name, generate_claim_name, group_by_logical_name,
    put_label, volume_mount, ClaimTemplate, VOLUME_NAME_LABEL, WORKSPACE_ID_LABEL,
};
use crate::domain::model::{PodData, VolumeRequestModel, LOGS_VOLUME_NAME};
use crate::domain::pod_volumes::rename_claim_reference;
use crate::domain::workspace::WorkspaceId;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ClaimProvisioner {
    template: ClaimTemplate,
}

impl ClaimProvisioner {
    pub fn new(template: ClaimTemplate) -> Self {
        Self { template }
    }

    /// Resolve every declared machine volume to a claim, a pod volume and a mount.
    ///
    /// Mounts are added with no subpath; prefixing fills it in afterwards.
    pub fn convert(&self, model: &mut VolumeRequestModel, workspace_id: &WorkspaceId) {
        let mut by_logical_name = group_by_logical_name(&mut model.claims);

        let machines: Vec<(String, Vec<(String, String)>)> = model
            .machines
            .iter()
            .map(|(machine, config)| {
                let volumes = config
                    .volumes
                    .iter()
                    .map(|(name, request)| (name.clone(), request.path.clone()))
                    .collect();
                (machine.clone(), volumes)
            })
            .collect();

        for (machine, volumes) in machines {
            let Some((pod_name, container_name)) = machine.split_once('/') else {
                warn!(machine = %machine, "Skipping machine with malformed name");
                continue;
            };

            for (logical_name, mount_path) in volumes {
                let claim = match by_logical_name.get(&logical_name) {
                    Some(existing) => existing.clone(),
                    None => {
                        let name = self.new_labeled_claim(model, workspace_id, &logical_name);
                        by_logical_name.insert(logical_name.clone(), name.clone());
                        name
                    }
                };

                let Some(pod) = model.pods.get_mut(pod_name) else {
                    warn!(machine = %machine, "No pod found for machine; volume not mounted");
                    continue;
                };
                let volume_name = ensure_pod_volume(pod, &logical_name, &claim);

                let Some(container) = pod
                    .all_containers_mut()
                    .find(|container| container.name == container_name)
                else {
                    warn!(machine = %machine, "No container found for machine; volume not mounted");
                    continue;
                };

                let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
                let already_mounted = mounts
                    .iter()
                    .any(|mount| mount.name == volume_name && mount.mount_path == mount_path);
                if !already_mounted {
                    mounts.push(volume_mount(&volume_name, &mount_path, None));
                }
                debug!(
                    machine = %machine,
                    volume = %logical_name,
                    claim = %claim,
                    path = %mount_path,
                    "Mounted declared volume"
                );
            }
        }
    }

    /// Merge user-declared claims into the model by logical name.
    ///
    /// A claim whose logical name is already backed in the model is dropped
    /// and its pod references are repointed to the existing claim; any other
    /// claim gets a freshly generated physical name. Repeating the merge
    /// with the same input leaves the model unchanged.
    pub fn provision(
        &self,
        model: &mut VolumeRequestModel,
        user_claims: impl IntoIterator<Item = PersistentVolumeClaim>,
    ) {
        let mut by_logical_name: HashMap<String, String> = group_by_logical_name(&mut model.claims);

        for mut claim in user_claims {
            let declared_name = claim_name(&claim).to_string();
            let logical_name = ensure_logical_name(&mut claim);

            if let Some(existing) = by_logical_name.get(&logical_name) {
                debug!(
                    claim = %declared_name,
                    existing = %existing,
                    volume = %logical_name,
                    "Merging declared claim into existing claim"
                );
                rename_claim_reference(model.pods.values_mut(), &declared_name, existing);
                continue;
            }

            let generated = generate_claim_name(&model.claims);
            claim.metadata.name = Some(generated.clone());
            rename_claim_reference(model.pods.values_mut(), &declared_name, &generated);
            debug!(
                claim = %declared_name,
                generated = %generated,
                volume = %logical_name,
                "Renamed declared claim"
            );
            by_logical_name.insert(logical_name, generated.clone());
            model.claims.insert(generated, claim);
        }
    }

    fn new_labeled_claim(
        &self,
        model: &mut VolumeRequestModel,
        workspace_id: &WorkspaceId,
        logical_name: &str,
    ) -> String {
        let name = generate_claim_name(&model.claims);
        let mut claim = self.template.new_claim(&name);
        put_label(&mut claim, WORKSPACE_ID_LABEL, workspace_id.as_str());
        put_label(&mut claim, VOLUME_NAME_LABEL, logical_name);
        model.claims.insert(name.clone(), claim);
        name
    }
}

/// Name of the pod volume referencing `claim`, adding the volume if missing
fn ensure_pod_volume(pod: &mut PodData, logical_name: &str, claim: &str) -> String {
    let wanted = if logical_name == LOGS_VOLUME_NAME {
        format!("{}-{}", LOGS_VOLUME_NAME, pod.name)
    } else {
        claim.to_string()
    };

    if let Some(existing) = pod.claim_backed_volumes().into_iter().find_map(|(volume, claim_ref)| {
        (claim_ref == claim).then_some(volume)
    }) {
        return existing;
    }

    pod.volumes_mut().push(claim_volume(&wanted, claim));
    wanted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::claim::label;
    use crate::domain::model::MachineConfig;
    use k8s_openapi::api::core::v1::{Container, PodSpec};

    fn provisioner() -> ClaimProvisioner {
        ClaimProvisioner::new(ClaimTemplate {
            access_mode: "ReadWriteOnce".to_string(),
            quantity: "1Gi".to_string(),
            storage_class: None,
        })
    }

    fn container(name: &str) -> Container {
        Container {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn model() -> VolumeRequestModel {
        let mut model = VolumeRequestModel::new();
        model.add_pod(PodData::new(
            "pod1",
            PodSpec {
                containers: vec![container("main"), container("sidecar")],
                ..Default::default()
            },
        ));
        model
            .machines
            .insert("pod1/main".to_string(), MachineConfig::default().with_volume("data", "/data").with_volume("logs", "/logs"));
        model
            .machines
            .insert("pod1/sidecar".to_string(), MachineConfig::default().with_volume("data", "/srv/data").with_volume("logs", "/var/log"));
        model
    }

    #[test]
    fn test_convert_creates_one_claim_per_logical_volume() {
        let mut model = model();
        provisioner().convert(&mut model, &WorkspaceId::from("ws1"));

        assert_eq!(model.claims.len(), 2);
        for claim in model.claims.values() {
            assert_eq!(label(claim, WORKSPACE_ID_LABEL), Some("ws1"));
            assert!(claim_name(claim).starts_with("pvc-"));
        }

        let pod = &model.pods["pod1"];
        // one pod volume per claim, shared by both containers
        assert_eq!(pod.volumes().len(), 2);
        assert!(pod.volumes().iter().any(|v| v.name == "logs-pod1"));

        let main_mounts = pod.spec.containers[0].volume_mounts.as_ref().unwrap();
        assert_eq!(main_mounts.len(), 2);
        assert!(main_mounts.iter().all(|m| m.sub_path.is_none()));
        let sidecar_mounts = pod.spec.containers[1].volume_mounts.as_ref().unwrap();
        assert!(sidecar_mounts.iter().any(|m| m.name == "logs-pod1" && m.mount_path == "/var/log"));
    }

    #[test]
    fn test_convert_reuses_claim_with_matching_logical_name() {
        let mut model = model();
        let mut existing = provisioner().template.new_claim("pvc-abc123");
        put_label(&mut existing, VOLUME_NAME_LABEL, "data");
        model.add_claim(existing);

        provisioner().convert(&mut model, &WorkspaceId::from("ws2"));

        assert_eq!(model.claims.len(), 2);
        let volumes = model.pods["pod1"].claim_backed_volumes();
        assert_eq!(volumes.get("pvc-abc123").map(String::as_str), Some("pvc-abc123"));
    }

    #[test]
    fn test_convert_is_stable_on_repeat() {
        let mut model = model();
        let provisioner = provisioner();
        provisioner.convert(&mut model, &WorkspaceId::from("ws1"));
        let first = model.clone();
        provisioner.convert(&mut model, &WorkspaceId::from("ws1"));
        assert_eq!(first, model);
    }

    #[test]
    fn test_provision_merges_duplicate_logical_name() {
        let provisioner = provisioner();
        let mut model = VolumeRequestModel::new();
        let mut existing = provisioner.template.new_claim("pvc-abc123");
        put_label(&mut existing, VOLUME_NAME_LABEL, "data");
        model.add_claim(existing);
        model.add_pod(PodData::new(
            "pod1",
            PodSpec {
                volumes: Some(vec![claim_volume("user", "data")]),
                ..Default::default()
            },
        ));

        let declared = provisioner.template.new_claim("data");
        provisioner.provision(&mut model, vec![declared.clone()]);
        provisioner.provision(&mut model, vec![declared]);

        assert_eq!(model.claims.len(), 1);
        let volumes = model.pods["pod1"].claim_backed_volumes();
        assert_eq!(volumes.get("user").map(String::as_str), Some("pvc-abc123"));
    }

    #[test]
    fn test_provision_renames_new_claims() {
        let provisioner = provisioner();
        let mut model = VolumeRequestModel::new();
        model.add_pod(PodData::new(
            "pod1",
            PodSpec {
                volumes: Some(vec![claim_volume("m2", "maven-cache")]),
                ..Default::default()
            },
        ));

        provisioner.provision(&mut model, vec![provisioner.template.new_claim("maven-cache")]);

        assert_eq!(model.claims.len(), 1);
        let (name, claim) = model.claims.iter().next().unwrap();
        assert!(name.starts_with("pvc-"));
        assert_eq!(label(claim, VOLUME_NAME_LABEL), Some("maven-cache"));
        let volumes = model.pods["pod1"].claim_backed_volumes();
        assert_eq!(volumes.get("m2"), Some(name));
    }
}
