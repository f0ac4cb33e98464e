// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Volume Request Model
//!
//! The declarative desired state of one workspace start: pods with their
//! volumes and mounts, the claims backing them, the logical volumes each
//! machine asked for, and the workspace attributes.
//!
//! A model is owned by exactly one provisioning call and is rewritten in
//! place by the strategies before anything reaches the cluster.

use crate::domain::workspace::is_ephemeral;
use k8s_openapi::api::core::v1::{Container, PersistentVolumeClaim, PodSpec, Volume};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Logical volume name whose mounts are further split per machine
pub const LOGS_VOLUME_NAME: &str = "logs";

/// Machine identity of a container: `{podName}/{containerName}`
pub fn machine_name(pod_name: &str, container_name: &str) -> String {
    format!("{}/{}", pod_name, container_name)
}

/// A logical volume requested by a machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRequest {
    /// Mount path inside the container
    pub path: String,
}

impl VolumeRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Declared volumes of one machine, keyed by logical volume name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineConfig {
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeRequest>,
}

impl MachineConfig {
    pub fn with_volume(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.volumes.insert(name.into(), VolumeRequest::new(path));
        self
    }
}

/// A pod (or pod template) of the workspace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodData {
    pub name: String,
    pub spec: PodSpec,
}

impl PodData {
    pub fn new(name: impl Into<String>, spec: PodSpec) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }

    /// Pod volumes, creating the list if the spec had none
    pub fn volumes_mut(&mut self) -> &mut Vec<Volume> {
        self.spec.volumes.get_or_insert_with(Vec::new)
    }

    pub fn volumes(&self) -> &[Volume] {
        self.spec.volumes.as_deref().unwrap_or(&[])
    }

    /// Containers followed by init containers
    pub fn all_containers(&self) -> impl Iterator<Item = &Container> {
        self.spec
            .containers
            .iter()
            .chain(self.spec.init_containers.iter().flatten())
    }

    /// Containers followed by init containers, mutably
    pub fn all_containers_mut(&mut self) -> impl Iterator<Item = &mut Container> {
        self.spec
            .containers
            .iter_mut()
            .chain(self.spec.init_containers.iter_mut().flatten())
    }

    /// Map of pod volume name to the claim it references, for claim-backed volumes only
    pub fn claim_backed_volumes(&self) -> BTreeMap<String, String> {
        self.volumes()
            .iter()
            .filter_map(|volume| {
                volume
                    .persistent_volume_claim
                    .as_ref()
                    .map(|source| (volume.name.clone(), source.claim_name.clone()))
            })
            .collect()
    }
}

/// Desired state of one workspace start
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRequestModel {
    /// Claim name -> claim definition
    #[serde(default)]
    pub claims: BTreeMap<String, PersistentVolumeClaim>,

    /// Pod name -> pod
    #[serde(default)]
    pub pods: BTreeMap<String, PodData>,

    /// Machine name (`{pod}/{container}`) -> declared logical volumes
    #[serde(default)]
    pub machines: BTreeMap<String, MachineConfig>,

    /// Workspace attributes (holds `persistVolumes`)
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Subpaths recorded during provisioning for directory pre-creation
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub subpaths_to_create: BTreeSet<String>,
}

impl VolumeRequestModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ephemeral(&self) -> bool {
        is_ephemeral(&self.attributes)
    }

    pub fn add_pod(&mut self, pod: PodData) {
        self.pods.insert(pod.name.clone(), pod);
    }

    pub fn add_claim(&mut self, claim: PersistentVolumeClaim) {
        let name = claim.metadata.name.clone().unwrap_or_default();
        self.claims.insert(name, claim);
    }

    /// Every subpath of a claim-backed mount across all pods
    pub fn claim_backed_subpaths(&self) -> BTreeSet<String> {
        let mut subpaths = BTreeSet::new();
        for pod in self.pods.values() {
            let claim_volumes = pod.claim_backed_volumes();
            for container in pod.all_containers() {
                for mount in container.volume_mounts.iter().flatten() {
                    if !claim_volumes.contains_key(&mount.name) {
                        continue;
                    }
                    if let Some(sub_path) = mount.sub_path.as_deref().filter(|p| !p.is_empty()) {
                        subpaths.insert(sub_path.to_string());
                    }
                }
            }
        }
        subpaths
    }

    /// Load a model from YAML (JSON is valid YAML)
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}
