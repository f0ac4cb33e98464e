// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Kubernetes Cluster Client
//!
//! `ClusterClient` backed by kube-rs. Blocking waits use
//! `kube::runtime::wait::await_condition` bounded by `tokio::time::timeout`.

use crate::domain::cluster::{is_claim_bound, is_terminal_phase, pod_phase, ClusterClient, ClusterError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::runtime::wait::await_condition;
use kube::Client;
use std::time::Duration;
use tracing::{debug, info};

pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the in-cluster service account or the local kubeconfig
    pub async fn try_default() -> Result<Self, ClusterError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClusterError::Unreachable(e.to_string()))?;
        Ok(Self::new(client))
    }

    fn claims(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_kube_error(what: &str, e: kube::Error) -> ClusterError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => ClusterError::NotFound(what.to_string()),
        kube::Error::Api(ae) if ae.code == 409 => ClusterError::AlreadyExists(what.to_string()),
        kube::Error::Api(ae) => ClusterError::Api(format!("{}: {} ({})", what, ae.message, ae.code)),
        other => ClusterError::Unreachable(format!("{}: {}", what, other)),
    }
}

fn label_selector(key: &str, value: &str) -> ListParams {
    ListParams::default().labels(&format!("{}={}", key, value))
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, ClusterError> {
        self.claims(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(&format!("claim {}/{}", namespace, name), e))
    }

    async fn list_claims_by_label(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<Vec<PersistentVolumeClaim>, ClusterError> {
        let list = self
            .claims(namespace)
            .list(&label_selector(key, value))
            .await
            .map_err(|e| map_kube_error(&format!("claims {}={} in {}", key, value, namespace), e))?;
        Ok(list.items)
    }

    async fn create_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, ClusterError> {
        let name = claim.metadata.name.clone().unwrap_or_default();
        let created = self
            .claims(namespace)
            .create(&PostParams::default(), claim)
            .await
            .map_err(|e| map_kube_error(&format!("claim {}/{}", namespace, name), e))?;
        info!(namespace = %namespace, claim = %name, "Created persistent volume claim");
        Ok(created)
    }

    async fn delete_claims_by_label(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ClusterError> {
        match self
            .claims(namespace)
            .delete_collection(&DeleteParams::default(), &label_selector(key, value))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(map_kube_error(&format!("claims {}={} in {}", key, value, namespace), e)),
        }
    }

    async fn wait_claim_bound(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<(), ClusterError> {
        let what = format!("claim {}/{} to be bound", namespace, name);
        let condition = |claim: Option<&PersistentVolumeClaim>| claim.is_some_and(is_claim_bound);

        match tokio::time::timeout(timeout, await_condition(self.claims(namespace), name, condition)).await {
            Ok(Ok(_)) => {
                debug!(namespace = %namespace, claim = %name, "Claim bound");
                Ok(())
            }
            Ok(Err(e)) => Err(ClusterError::Api(format!("watching {}: {}", what, e))),
            Err(_) => Err(ClusterError::Timeout { what, after: timeout }),
        }
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ClusterError> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.pods(namespace)
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| map_kube_error(&format!("pod {}/{}", namespace, name), e))
    }

    async fn wait_pod_finished(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<Pod, ClusterError> {
        let what = format!("pod {}/{} to finish", namespace, name);
        let condition = |pod: Option<&Pod>| pod.is_some_and(|pod| is_terminal_phase(pod_phase(pod)));

        match tokio::time::timeout(timeout, await_condition(self.pods(namespace), name, condition)).await {
            Ok(Ok(Some(pod))) => Ok(pod),
            Ok(Ok(None)) => Err(ClusterError::NotFound(format!("pod {}/{}", namespace, name))),
            Ok(Err(e)) => Err(ClusterError::Api(format!("watching {}: {}", what, e))),
            Err(_) => Err(ClusterError::Timeout { what, after: timeout }),
        }
    }

    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String, ClusterError> {
        self.pods(namespace)
            .logs(name, &LogParams::default())
            .await
            .map_err(|e| map_kube_error(&format!("logs of pod {}/{}", namespace, name), e))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        match self.pods(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                debug!(namespace = %namespace, pod = %name, "Deleted pod");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(namespace = %namespace, pod = %name, "Pod already deleted");
                Ok(())
            }
            Err(e) => Err(map_kube_error(&format!("pod {}/{}", namespace, name), e)),
        }
    }
}
