// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cluster Client Trait - Anti-Corruption Layer for the cluster API
//!
//! Isolates the volume strategies from the concrete cluster client so the
//! provisioning algorithms can be exercised against an in-memory cluster and
//! the real API alike. Only the calls the storage lifecycle needs are
//! exposed: claims, job pods, their logs, and the two blocking waits.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use std::time::Duration;
use thiserror::Error;

/// Pod phase reported once a job pod completed successfully
pub const POD_PHASE_SUCCEEDED: &str = "Succeeded";
/// Pod phase reported once a job pod failed
pub const POD_PHASE_FAILED: &str = "Failed";
/// Claim phase reported once a claim is bound to a volume
pub const CLAIM_PHASE_BOUND: &str = "Bound";

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch a claim by name, `None` if it does not exist
    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, ClusterError>;

    /// List claims carrying `key=value`
    async fn list_claims_by_label(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<Vec<PersistentVolumeClaim>, ClusterError>;

    /// Create a claim
    ///
    /// # Returns
    /// * `Ok(PersistentVolumeClaim)` - The claim as accepted by the cluster
    /// * `Err(ClusterError::AlreadyExists)` if a claim with that name exists
    /// * `Err(ClusterError::Api)` if the cluster rejected it otherwise
    async fn create_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, ClusterError>;

    /// Delete every claim carrying `key=value`
    async fn delete_claims_by_label(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ClusterError>;

    /// Block until the claim reports the `Bound` phase
    ///
    /// Returns `ClusterError::Timeout` when `timeout` elapses first.
    async fn wait_claim_bound(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<(), ClusterError>;

    /// Submit a pod
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ClusterError>;

    /// Block until the pod reaches a terminal phase (`Succeeded` or `Failed`)
    ///
    /// Returns `ClusterError::Timeout` when `timeout` elapses first.
    async fn wait_pod_finished(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<Pod, ClusterError>;

    /// Fetch the logs of the pod's single container
    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String, ClusterError>;

    /// Delete a pod; deleting a pod that is already gone succeeds
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Cluster API rejected the request: {0}")]
    Api(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    #[error("Cluster unreachable: {0}")]
    Unreachable(String),
}

/// Phase string of a pod, if the cluster reported one
pub fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|status| status.phase.as_deref())
}

/// Whether a pod phase is terminal
pub fn is_terminal_phase(phase: Option<&str>) -> bool {
    matches!(phase, Some(POD_PHASE_SUCCEEDED) | Some(POD_PHASE_FAILED))
}

/// Whether a claim is bound
pub fn is_claim_bound(claim: &PersistentVolumeClaim) -> bool {
    claim
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        == Some(CLAIM_PHASE_BOUND)
}
