// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Mechanical rewrites of pod volumes and the mounts that use them.

use crate::domain::claim::claim_volume;
use crate::domain::model::PodData;
use k8s_openapi::api::core::v1::EmptyDirVolumeSource;
use std::collections::BTreeSet;

/// Replace every claim-backed volume with one volume backed by `shared_claim`.
///
/// Mounts that used a removed volume are repointed to the shared volume;
/// their subpaths are kept as they are.
pub fn collapse_to_shared<'a>(pods: impl IntoIterator<Item = &'a mut PodData>, shared_claim: &str) {
    for pod in pods {
        let removed: BTreeSet<String> = pod.claim_backed_volumes().into_keys().collect();
        if removed.is_empty() {
            continue;
        }

        let volumes = pod.volumes_mut();
        volumes.retain(|volume| !removed.contains(&volume.name));
        volumes.push(claim_volume(shared_claim, shared_claim));

        for container in pod.all_containers_mut() {
            for mount in container.volume_mounts.iter_mut().flatten() {
                if removed.contains(&mount.name) {
                    mount.name = shared_claim.to_string();
                }
            }
        }
    }
}

/// Point volumes referencing `current_claim` at `new_claim`
pub fn rename_claim_reference<'a>(
    pods: impl IntoIterator<Item = &'a mut PodData>,
    current_claim: &str,
    new_claim: &str,
) {
    for pod in pods {
        for volume in pod.volumes_mut() {
            if let Some(source) = volume.persistent_volume_claim.as_mut() {
                if source.claim_name == current_claim {
                    source.claim_name = new_claim.to_string();
                }
            }
        }
    }
}

/// Swap every claim-backed volume for a pod-lifetime `emptyDir`
pub fn replace_claims_with_empty_dir<'a>(pods: impl IntoIterator<Item = &'a mut PodData>) {
    for pod in pods {
        for volume in pod.volumes_mut() {
            if volume.persistent_volume_claim.take().is_some() {
                volume.empty_dir = Some(EmptyDirVolumeSource::default());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::claim::volume_mount;
    use k8s_openapi::api::core::v1::{Container, PodSpec, Volume};

    fn pod() -> PodData {
        PodData::new(
            "pod1",
            PodSpec {
                containers: vec![Container {
                    name: "main".to_string(),
                    volume_mounts: Some(vec![
                        volume_mount("pvc-a", "/projects", Some("ws1/projects")),
                        volume_mount("pvc-b", "/root/.m2", Some("ws1/maven")),
                        volume_mount("tmp", "/tmp", None),
                    ]),
                    ..Default::default()
                }],
                init_containers: Some(vec![Container {
                    name: "init".to_string(),
                    volume_mounts: Some(vec![volume_mount("pvc-a", "/projects", Some("ws1/projects"))]),
                    ..Default::default()
                }]),
                volumes: Some(vec![
                    claim_volume("pvc-a", "pvc-a"),
                    claim_volume("pvc-b", "pvc-b"),
                    Volume {
                        name: "tmp".to_string(),
                        empty_dir: Some(EmptyDirVolumeSource::default()),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_collapse_to_shared() {
        let mut pods = vec![pod()];
        collapse_to_shared(pods.iter_mut(), "che-workspace-pvc");

        let pod = &pods[0];
        let claim_volumes = pod.claim_backed_volumes();
        assert_eq!(claim_volumes.len(), 1);
        assert_eq!(
            claim_volumes.get("che-workspace-pvc").map(String::as_str),
            Some("che-workspace-pvc")
        );
        assert!(pod.volumes().iter().any(|v| v.name == "tmp"));

        let mounts = pod.spec.containers[0].volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].name, "che-workspace-pvc");
        assert_eq!(mounts[0].sub_path.as_deref(), Some("ws1/projects"));
        assert_eq!(mounts[1].name, "che-workspace-pvc");
        assert_eq!(mounts[1].sub_path.as_deref(), Some("ws1/maven"));
        assert_eq!(mounts[2].name, "tmp");

        let init_mounts = pod.spec.init_containers.as_ref().unwrap()[0].volume_mounts.as_ref().unwrap();
        assert_eq!(init_mounts[0].name, "che-workspace-pvc");
    }

    #[test]
    fn test_collapse_skips_pods_without_claims() {
        let mut plain = PodData::new("plain", PodSpec::default());
        collapse_to_shared(std::iter::once(&mut plain), "shared");
        assert!(plain.volumes().is_empty());
    }

    #[test]
    fn test_rename_claim_reference() {
        let mut pods = vec![pod()];
        rename_claim_reference(pods.iter_mut(), "pvc-b", "pvc-existing");
        let volumes = pods[0].claim_backed_volumes();
        assert_eq!(volumes.get("pvc-b").map(String::as_str), Some("pvc-existing"));
        assert_eq!(volumes.get("pvc-a").map(String::as_str), Some("pvc-a"));
    }

    #[test]
    fn test_replace_claims_with_empty_dir() {
        let mut pods = vec![pod()];
        replace_claims_with_empty_dir(pods.iter_mut());
        assert!(pods[0].claim_backed_volumes().is_empty());
        assert!(pods[0].volumes().iter().all(|v| v.empty_dir.is_some()));
    }
}
