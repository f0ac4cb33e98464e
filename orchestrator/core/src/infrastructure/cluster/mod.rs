// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod kubernetes;

pub use kubernetes::KubeClusterClient;
pub use memory::{InMemoryCluster, JobScript};

use crate::domain::cluster::{ClusterClient, ClusterError};
use std::sync::Arc;

/// Cluster client selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterBackend {
    /// The cluster reachable through the in-cluster service account or kubeconfig
    Kubernetes,
    /// A process-local cluster with no side effects
    InMemory,
}

/// Factory function to create a cluster client from backend selection
pub async fn create_cluster_client(
    backend: ClusterBackend,
) -> Result<Arc<dyn ClusterClient>, ClusterError> {
    let client: Arc<dyn ClusterClient> = match backend {
        ClusterBackend::Kubernetes => Arc::new(KubeClusterClient::try_default().await?),
        ClusterBackend::InMemory => Arc::new(InMemoryCluster::new()),
    };
    Ok(client)
}

pub mod memory {
    use crate::domain::cluster::{
        is_claim_bound, is_terminal_phase, pod_phase, ClusterClient, ClusterError, CLAIM_PHASE_BOUND,
        POD_PHASE_FAILED, POD_PHASE_SUCCEEDED,
    };
    use crate::domain::claim::{claim_name, label};
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::{
        PersistentVolumeClaim, PersistentVolumeClaimStatus, Pod, PodStatus,
    };
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashMap};
    use std::time::Duration;
    use tokio::time::Instant;

    const POLL_INTERVAL: Duration = Duration::from_millis(10);

    /// How job pods submitted to the in-memory cluster behave
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum JobScript {
        /// Pods finish with `Succeeded`
        Succeed,
        /// Pods finish with `Failed` and the given output
        Fail { logs: String },
        /// Pods run for `delay`, then finish with `Succeeded` and the given output
        SucceedAfter { delay: Duration, logs: String },
        /// Pods stay `Running` forever
        Hang,
    }

    type Key = (String, String);

    fn key(namespace: &str, name: &str) -> Key {
        (namespace.to_string(), name.to_string())
    }

    struct State {
        claims: BTreeMap<Key, PersistentVolumeClaim>,
        pods: BTreeMap<Key, Pod>,
        logs: HashMap<Key, String>,
        finish_at: HashMap<Key, Instant>,
        created_claims: Vec<String>,
        deleted_claims: Vec<String>,
        created_pods: Vec<String>,
        deleted_pods: Vec<String>,
        auto_bind: bool,
        job_script: JobScript,
        fail_pod_creation: bool,
    }

    /// In-memory cluster for tests and offline runs
    ///
    /// Claims bind on creation unless auto-binding is turned off, and job
    /// pods reach the phase chosen by the current `JobScript` as soon as
    /// they are submitted.
    pub struct InMemoryCluster {
        state: Mutex<State>,
    }

    impl Default for InMemoryCluster {
        fn default() -> Self {
            Self::new()
        }
    }

    impl InMemoryCluster {
        pub fn new() -> Self {
            Self {
                state: Mutex::new(State {
                    claims: BTreeMap::new(),
                    pods: BTreeMap::new(),
                    logs: HashMap::new(),
                    finish_at: HashMap::new(),
                    created_claims: Vec::new(),
                    deleted_claims: Vec::new(),
                    created_pods: Vec::new(),
                    deleted_pods: Vec::new(),
                    auto_bind: true,
                    job_script: JobScript::Succeed,
                    fail_pod_creation: false,
                }),
            }
        }

        pub fn set_auto_bind(&self, enabled: bool) {
            self.state.lock().auto_bind = enabled;
        }

        pub fn set_job_script(&self, script: JobScript) {
            self.state.lock().job_script = script;
        }

        /// Make every `create_pod` call fail with an API error
        pub fn fail_pod_creation(&self, enabled: bool) {
            self.state.lock().fail_pod_creation = enabled;
        }

        /// Store a claim as if an earlier run had created it; not recorded as created
        pub fn insert_claim(&self, namespace: &str, mut claim: PersistentVolumeClaim) {
            let mut state = self.state.lock();
            if state.auto_bind {
                bind(&mut claim);
            }
            state.claims.insert(key(namespace, claim_name(&claim)), claim);
        }

        /// Bind a pending claim
        pub fn bind_claim(&self, namespace: &str, name: &str) {
            if let Some(claim) = self.state.lock().claims.get_mut(&key(namespace, name)) {
                bind(claim);
            }
        }

        pub fn claim(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
            self.state.lock().claims.get(&key(namespace, name)).cloned()
        }

        /// Names of the claims currently present in `namespace`
        pub fn claim_names(&self, namespace: &str) -> Vec<String> {
            self.state
                .lock()
                .claims
                .keys()
                .filter(|(ns, _)| ns == namespace)
                .map(|(_, name)| name.clone())
                .collect()
        }

        pub fn pod_count(&self, namespace: &str) -> usize {
            self.state
                .lock()
                .pods
                .keys()
                .filter(|(ns, _)| ns == namespace)
                .count()
        }

        pub fn created_claims(&self) -> Vec<String> {
            self.state.lock().created_claims.clone()
        }

        pub fn deleted_claims(&self) -> Vec<String> {
            self.state.lock().deleted_claims.clone()
        }

        pub fn created_pods(&self) -> Vec<String> {
            self.state.lock().created_pods.clone()
        }

        /// Every pod deletion requested, including pods that never existed
        pub fn deleted_pods(&self) -> Vec<String> {
            self.state.lock().deleted_pods.clone()
        }
    }

    fn bind(claim: &mut PersistentVolumeClaim) {
        claim.status = Some(PersistentVolumeClaimStatus {
            phase: Some(CLAIM_PHASE_BOUND.to_string()),
            ..Default::default()
        });
    }

    #[async_trait]
    impl ClusterClient for InMemoryCluster {
        async fn get_claim(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<PersistentVolumeClaim>, ClusterError> {
            Ok(self.claim(namespace, name))
        }

        async fn list_claims_by_label(
            &self,
            namespace: &str,
            key: &str,
            value: &str,
        ) -> Result<Vec<PersistentVolumeClaim>, ClusterError> {
            Ok(self
                .state
                .lock()
                .claims
                .iter()
                .filter(|((ns, _), claim)| ns == namespace && label(claim, key) == Some(value))
                .map(|(_, claim)| claim.clone())
                .collect())
        }

        async fn create_claim(
            &self,
            namespace: &str,
            claim: &PersistentVolumeClaim,
        ) -> Result<PersistentVolumeClaim, ClusterError> {
            let mut state = self.state.lock();
            let name = claim_name(claim).to_string();
            let claim_key = key(namespace, &name);
            if state.claims.contains_key(&claim_key) {
                return Err(ClusterError::AlreadyExists(format!(
                    "persistentvolumeclaims \"{}\"",
                    name
                )));
            }

            let mut created = claim.clone();
            if state.auto_bind {
                bind(&mut created);
            } else {
                created.status = Some(PersistentVolumeClaimStatus {
                    phase: Some("Pending".to_string()),
                    ..Default::default()
                });
            }
            state.claims.insert(claim_key, created.clone());
            state.created_claims.push(name);
            Ok(created)
        }

        async fn delete_claims_by_label(
            &self,
            namespace: &str,
            key: &str,
            value: &str,
        ) -> Result<(), ClusterError> {
            let mut state = self.state.lock();
            let doomed: Vec<Key> = state
                .claims
                .iter()
                .filter(|((ns, _), claim)| ns == namespace && label(claim, key) == Some(value))
                .map(|(claim_key, _)| claim_key.clone())
                .collect();
            for claim_key in doomed {
                state.claims.remove(&claim_key);
                state.deleted_claims.push(claim_key.1);
            }
            Ok(())
        }

        async fn wait_claim_bound(
            &self,
            namespace: &str,
            name: &str,
            timeout: Duration,
        ) -> Result<(), ClusterError> {
            let deadline = Instant::now() + timeout;
            loop {
                match self.claim(namespace, name) {
                    Some(claim) if is_claim_bound(&claim) => return Ok(()),
                    Some(_) => {}
                    None => {
                        return Err(ClusterError::NotFound(format!("claim {}/{}", namespace, name)))
                    }
                }
                if Instant::now() >= deadline {
                    return Err(ClusterError::Timeout {
                        what: format!("claim {}/{} to be bound", namespace, name),
                        after: timeout,
                    });
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }

        async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ClusterError> {
            let mut state = self.state.lock();
            let name = pod.metadata.name.clone().unwrap_or_default();
            if state.fail_pod_creation {
                return Err(ClusterError::Api(format!("pods \"{}\" is forbidden", name)));
            }
            let pod_key = key(namespace, &name);
            if state.pods.contains_key(&pod_key) {
                return Err(ClusterError::Api(format!("pods \"{}\" already exists", name)));
            }

            let (phase, logs) = match state.job_script.clone() {
                JobScript::Succeed => (POD_PHASE_SUCCEEDED, String::new()),
                JobScript::Fail { logs } => (POD_PHASE_FAILED, logs),
                JobScript::Hang => ("Running", String::new()),
                JobScript::SucceedAfter { delay, logs } if delay.is_zero() => {
                    (POD_PHASE_SUCCEEDED, logs)
                }
                JobScript::SucceedAfter { delay, logs } => {
                    state.finish_at.insert(pod_key.clone(), Instant::now() + delay);
                    ("Running", logs)
                }
            };
            let mut created = pod.clone();
            created.status = Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            });

            state.pods.insert(pod_key.clone(), created.clone());
            state.logs.insert(pod_key, logs);
            state.created_pods.push(name);
            Ok(created)
        }

        async fn wait_pod_finished(
            &self,
            namespace: &str,
            name: &str,
            timeout: Duration,
        ) -> Result<Pod, ClusterError> {
            let pod_key = key(namespace, name);
            let deadline = Instant::now() + timeout;
            loop {
                {
                    let mut state = self.state.lock();
                    let due = state
                        .finish_at
                        .get(&pod_key)
                        .is_some_and(|finish_at| *finish_at <= Instant::now());
                    if due {
                        state.finish_at.remove(&pod_key);
                        if let Some(pod) = state.pods.get_mut(&pod_key) {
                            pod.status = Some(PodStatus {
                                phase: Some(POD_PHASE_SUCCEEDED.to_string()),
                                ..Default::default()
                            });
                        }
                    }
                    match state.pods.get(&pod_key) {
                        Some(pod) if is_terminal_phase(pod_phase(pod)) => return Ok(pod.clone()),
                        Some(_) => {}
                        None => {
                            return Err(ClusterError::NotFound(format!("pod {}/{}", namespace, name)))
                        }
                    }
                }
                if Instant::now() >= deadline {
                    return Err(ClusterError::Timeout {
                        what: format!("pod {}/{} to finish", namespace, name),
                        after: timeout,
                    });
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }

        async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String, ClusterError> {
            self.state
                .lock()
                .logs
                .get(&key(namespace, name))
                .cloned()
                .ok_or_else(|| ClusterError::NotFound(format!("pod {}/{}", namespace, name)))
        }

        async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
            let mut state = self.state.lock();
            let pod_key = key(namespace, name);
            state.pods.remove(&pod_key);
            state.logs.remove(&pod_key);
            state.finish_at.remove(&pod_key);
            state.deleted_pods.push(name.to_string());
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::domain::claim::{put_label, ClaimTemplate, WORKSPACE_ID_LABEL};

        fn claim(name: &str, workspace: &str) -> PersistentVolumeClaim {
            let mut claim = ClaimTemplate {
                access_mode: "ReadWriteOnce".to_string(),
                quantity: "1Gi".to_string(),
                storage_class: None,
            }
            .new_claim(name);
            put_label(&mut claim, WORKSPACE_ID_LABEL, workspace);
            claim
        }

        #[tokio::test]
        async fn test_create_claim_rejects_duplicates() {
            let cluster = InMemoryCluster::new();
            cluster.create_claim("che", &claim("a", "ws1")).await.unwrap();
            assert!(matches!(
                cluster.create_claim("che", &claim("a", "ws1")).await,
                Err(ClusterError::AlreadyExists(_))
            ));
            // same name in another namespace is fine
            cluster.create_claim("other", &claim("a", "ws1")).await.unwrap();
        }

        #[tokio::test]
        async fn test_label_queries_are_namespaced() {
            let cluster = InMemoryCluster::new();
            cluster.insert_claim("che", claim("a", "ws1"));
            cluster.insert_claim("che", claim("b", "ws2"));
            cluster.insert_claim("other", claim("c", "ws1"));

            let found = cluster.list_claims_by_label("che", WORKSPACE_ID_LABEL, "ws1").await.unwrap();
            assert_eq!(found.len(), 1);

            cluster.delete_claims_by_label("che", WORKSPACE_ID_LABEL, "ws1").await.unwrap();
            assert_eq!(cluster.claim_names("che"), vec!["b".to_string()]);
            assert_eq!(cluster.claim_names("other"), vec!["c".to_string()]);
        }

        #[tokio::test]
        async fn test_wait_claim_bound_times_out() {
            let cluster = InMemoryCluster::new();
            cluster.set_auto_bind(false);
            cluster.create_claim("che", &claim("a", "ws1")).await.unwrap();

            let result = cluster
                .wait_claim_bound("che", "a", Duration::from_millis(30))
                .await;
            assert!(matches!(result, Err(ClusterError::Timeout { .. })));

            cluster.bind_claim("che", "a");
            cluster
                .wait_claim_bound("che", "a", Duration::from_millis(30))
                .await
                .unwrap();
        }
    }
}
