// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Claim construction and the labels that give claims their meaning.

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, Volume,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Label holding the id of the workspace owning a claim
pub const WORKSPACE_ID_LABEL: &str = "che.workspace_id";
/// Label holding the tenant-visible logical volume name backed by a claim
pub const VOLUME_NAME_LABEL: &str = "che.workspace.volume_name";

const GENERATED_CLAIM_PREFIX: &str = "pvc-";
const GENERATED_SUFFIX_LEN: usize = 8;

/// Parameters shared by every claim the engine creates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimTemplate {
    pub access_mode: String,
    pub quantity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

impl ClaimTemplate {
    /// Build an unlabeled claim named `name`
    pub fn new_claim(&self, name: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec![self.access_mode.clone()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(self.quantity.clone()),
                    )])),
                    ..Default::default()
                }),
                storage_class_name: self.storage_class.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

pub fn claim_name(claim: &PersistentVolumeClaim) -> &str {
    claim.metadata.name.as_deref().unwrap_or_default()
}

pub fn label<'a>(claim: &'a PersistentVolumeClaim, key: &str) -> Option<&'a str> {
    claim
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .map(String::as_str)
}

pub fn put_label(claim: &mut PersistentVolumeClaim, key: &str, value: &str) {
    claim
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
}

/// Logical volume name of a claim, labeling the claim with its own name if it had none
pub fn ensure_logical_name(claim: &mut PersistentVolumeClaim) -> String {
    if let Some(name) = label(claim, VOLUME_NAME_LABEL) {
        return name.to_string();
    }
    let own_name = claim_name(claim).to_string();
    put_label(claim, VOLUME_NAME_LABEL, &own_name);
    own_name
}

/// Claim name keyed by logical volume name, self-labeling unlabeled claims
pub fn group_by_logical_name(
    claims: &mut BTreeMap<String, PersistentVolumeClaim>,
) -> HashMap<String, String> {
    claims
        .iter_mut()
        .map(|(name, claim)| (ensure_logical_name(claim), name.clone()))
        .collect()
}

/// Random claim name not present in `taken`
pub fn generate_claim_name<V>(taken: &BTreeMap<String, V>) -> String {
    loop {
        let suffix = Uuid::new_v4().simple().to_string();
        let candidate = format!(
            "{}{}",
            GENERATED_CLAIM_PREFIX,
            &suffix[..GENERATED_SUFFIX_LEN]
        );
        if !taken.contains_key(&candidate) {
            return candidate;
        }
    }
}

/// Pod volume backed by a claim
pub fn claim_volume(volume_name: &str, claim_name: &str) -> Volume {
    Volume {
        name: volume_name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim_name.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn volume_mount(volume_name: &str, mount_path: &str, sub_path: Option<&str>) -> VolumeMount {
    VolumeMount {
        name: volume_name.to_string(),
        mount_path: mount_path.to_string(),
        sub_path: sub_path.map(str::to_string),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> ClaimTemplate {
        ClaimTemplate {
            access_mode: "ReadWriteOnce".to_string(),
            quantity: "10Gi".to_string(),
            storage_class: Some("standard".to_string()),
        }
    }

    #[test]
    fn test_new_claim_carries_template() {
        let claim = template().new_claim("che-workspace-pvc");
        let spec = claim.spec.as_ref().unwrap();
        assert_eq!(claim_name(&claim), "che-workspace-pvc");
        assert_eq!(spec.access_modes.as_deref(), Some(&["ReadWriteOnce".to_string()][..]));
        assert_eq!(spec.storage_class_name.as_deref(), Some("standard"));
        let requests = spec.resources.as_ref().unwrap().requests.as_ref().unwrap();
        assert_eq!(requests["storage"], Quantity("10Gi".to_string()));
    }

    #[test]
    fn test_ensure_logical_name_self_labels() {
        let mut claim = template().new_claim("user-data");
        assert_eq!(ensure_logical_name(&mut claim), "user-data");
        assert_eq!(label(&claim, VOLUME_NAME_LABEL), Some("user-data"));

        put_label(&mut claim, VOLUME_NAME_LABEL, "projects");
        assert_eq!(ensure_logical_name(&mut claim), "projects");
    }

    #[test]
    fn test_generate_claim_name_format() {
        let taken: BTreeMap<String, ()> = BTreeMap::new();
        let name = generate_claim_name(&taken);
        assert!(name.starts_with("pvc-"));
        assert_eq!(name.len(), 12);
        assert!(name[4..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_group_by_logical_name() {
        let mut claims = BTreeMap::new();
        let mut labeled = template().new_claim("pvc-abc123");
        put_label(&mut labeled, VOLUME_NAME_LABEL, "data");
        claims.insert("pvc-abc123".to_string(), labeled);
        claims.insert("maven".to_string(), template().new_claim("maven"));

        let grouped = group_by_logical_name(&mut claims);
        assert_eq!(grouped.get("data").map(String::as_str), Some("pvc-abc123"));
        assert_eq!(grouped.get("maven").map(String::as_str), Some("maven"));
        assert_eq!(label(&claims["maven"], VOLUME_NAME_LABEL), Some("maven"));
    }
}
