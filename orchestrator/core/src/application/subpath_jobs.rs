// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Subpath Job Runner
//!
//! Runs `mkdir` and `rm` against directories inside a claim by submitting a
//! short-lived pod that mounts the claim and executes one command.
//!
//! Every job moves through `Pending -> Running -> {Succeeded, Failed}` and
//! its pod is deleted on every exit path.
//!
//! - `create_dirs` is awaited by the caller and sits on the workspace start path.
//! - `remove_dirs` is queued on a bounded worker pool and returns a handle
//!   immediately; teardown never waits on it.

use crate::domain::claim::{claim_volume, volume_mount};
use crate::domain::cluster::{pod_phase, ClusterClient, ClusterError, POD_PHASE_SUCCEEDED};
use crate::domain::config::JobSettings;
use crate::domain::error::InfrastructureError;
use crate::domain::events::StorageEvent;
use crate::domain::workspace::RuntimeIdentity;
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Where the target claim is mounted inside a job container
pub const JOB_MOUNT_PATH: &str = "/tmp/job_mount";

/// Extra time granted to cancelled removals before shutdown gives up on them
const FORCED_STOP_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubpathCommand {
    Mkdir,
    Remove,
}

impl SubpathCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SubpathCommand::Mkdir => "mkdir",
            SubpathCommand::Remove => "rm",
        }
    }

    fn args(&self) -> &'static [&'static str] {
        match self {
            SubpathCommand::Mkdir => &["mkdir", "-m", "777", "-p"],
            SubpathCommand::Remove => &["rm", "-rf"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: String,
    pub phase: JobPhase,
    /// Captured container output, when it was fetched
    pub logs: Option<String>,
}

/// Path of `subpath` as seen from inside the job container
pub fn job_path(subpath: &str) -> String {
    format!("{}/{}", JOB_MOUNT_PATH, subpath.trim_start_matches('/'))
}

/// Builds job pods and drives them to completion
struct JobExecutor {
    cluster: Arc<dyn ClusterClient>,
    settings: JobSettings,
}

impl JobExecutor {
    fn build_pod(&self, job: &str, claim: &str, command: SubpathCommand, paths: &[String]) -> Pod {
        let mut args: Vec<String> = command.args().iter().map(|arg| arg.to_string()).collect();
        args.extend(paths.iter().map(|path| job_path(path)));

        let memory = BTreeMap::from([(
            "memory".to_string(),
            Quantity(self.settings.memory_limit.clone()),
        )]);

        Pod {
            metadata: ObjectMeta {
                name: Some(job.to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                containers: vec![Container {
                    name: job.to_string(),
                    image: Some(self.settings.image.clone()),
                    image_pull_policy: Some(self.settings.image_pull_policy.clone()),
                    command: Some(args),
                    volume_mounts: Some(vec![volume_mount(claim, JOB_MOUNT_PATH, None)]),
                    resources: Some(ResourceRequirements {
                        limits: Some(memory.clone()),
                        requests: Some(memory),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                volumes: Some(vec![claim_volume(claim, claim)]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn execute(
        &self,
        identity: &RuntimeIdentity,
        claim: &str,
        command: SubpathCommand,
        paths: &[String],
        capture_logs: bool,
    ) -> Result<JobReport, InfrastructureError> {
        let job = format!("{}-{}", command.name(), identity.workspace_id);
        let namespace = identity.namespace.as_str();
        let pod = self.build_pod(&job, claim, command, paths);
        debug!(job = %job, claim = %claim, phase = ?JobPhase::Pending, "Submitting subpath job");

        let result = self.run(namespace, &job, &pod, capture_logs).await;

        if let Err(e) = self.cluster.delete_pod(namespace, &job).await {
            warn!(job = %job, error = %e, "Failed to delete subpath job pod");
        }

        let outcome = match &result {
            Ok(_) => "succeeded",
            Err(e) if e.is_timeout() => "timeout",
            Err(_) => "failed",
        };
        metrics::counter!(
            "workspace_volumes_jobs_total",
            "command" => command.name(),
            "outcome" => outcome
        )
        .increment(1);

        result
    }

    async fn run(
        &self,
        namespace: &str,
        job: &str,
        pod: &Pod,
        capture_logs: bool,
    ) -> Result<JobReport, InfrastructureError> {
        self.cluster.create_pod(namespace, pod).await?;
        debug!(job = %job, phase = ?JobPhase::Running, "Subpath job submitted");

        let finished = self
            .cluster
            .wait_pod_finished(namespace, job, self.settings.timeout)
            .await
            .map_err(|e| match e {
                ClusterError::Timeout { after, .. } => InfrastructureError::JobTimeout {
                    job: job.to_string(),
                    timeout: after,
                },
                other => InfrastructureError::Cluster(other),
            })?;

        if pod_phase(&finished) == Some(POD_PHASE_SUCCEEDED) {
            let logs = if capture_logs {
                let logs = self.logs(namespace, job).await;
                if let Some(output) = &logs {
                    info!(job = %job, output = %output, "Subpath job output");
                }
                logs
            } else {
                None
            };
            return Ok(JobReport {
                job: job.to_string(),
                phase: JobPhase::Succeeded,
                logs,
            });
        }

        let logs = self.logs(namespace, job).await;
        error!(
            job = %job,
            phase = ?JobPhase::Failed,
            output = logs.as_deref().unwrap_or("<unavailable>"),
            "Subpath job failed"
        );
        Err(InfrastructureError::JobFailed {
            job: job.to_string(),
            reason: logs.unwrap_or_else(|| "job pod failed".to_string()),
        })
    }

    async fn logs(&self, namespace: &str, job: &str) -> Option<String> {
        match self.cluster.pod_logs(namespace, job).await {
            Ok(logs) => Some(logs),
            Err(e) => {
                warn!(job = %job, error = %e, "Failed to fetch subpath job logs");
                None
            }
        }
    }
}

/// Handle to a queued directory removal
pub struct RemovalHandle {
    job: String,
    handle: JoinHandle<Result<JobReport, InfrastructureError>>,
}

impl RemovalHandle {
    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the removal if it has not finished yet
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Wait for the removal to finish
    pub async fn wait(self) -> Result<JobReport, InfrastructureError> {
        match self.handle.await {
            Ok(result) => result,
            Err(_) => Err(InfrastructureError::Cancelled(self.job)),
        }
    }
}

impl std::fmt::Debug for RemovalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemovalHandle")
            .field("job", &self.job)
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

pub struct SubpathJobRunner {
    executor: Arc<JobExecutor>,
    event_bus: EventBus,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    shutdown_grace: Duration,
}

impl SubpathJobRunner {
    pub fn new(cluster: Arc<dyn ClusterClient>, settings: JobSettings, event_bus: EventBus) -> Self {
        let workers = settings.workers.max(1);
        let shutdown_grace = settings.shutdown_grace;
        Self {
            executor: Arc::new(JobExecutor { cluster, settings }),
            event_bus,
            permits: Arc::new(Semaphore::new(workers)),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            shutdown_grace,
        }
    }

    /// Create `paths` inside `claim`, waiting for the job to finish
    pub async fn create_dirs(
        &self,
        identity: &RuntimeIdentity,
        claim: &str,
        paths: &[String],
        capture_logs: bool,
    ) -> Result<JobReport, InfrastructureError> {
        let report = self
            .executor
            .execute(identity, claim, SubpathCommand::Mkdir, paths, capture_logs)
            .await?;

        info!(
            workspace_id = %identity.workspace_id,
            claim = %claim,
            count = paths.len(),
            "Created workspace subpaths"
        );
        self.event_bus.publish_storage_event(StorageEvent::SubpathsCreated {
            workspace_id: identity.workspace_id.clone(),
            claim: claim.to_string(),
            subpaths: paths.to_vec(),
            created_at: Utc::now(),
        });
        Ok(report)
    }

    /// Queue removal of `paths` inside `claim` and return immediately.
    ///
    /// Failures are logged and published as `StorageEvent::SubpathJobFailed`.
    pub fn remove_dirs(
        &self,
        identity: &RuntimeIdentity,
        claim: &str,
        paths: Vec<String>,
    ) -> Result<RemovalHandle, InfrastructureError> {
        if self.tracker.is_closed() {
            return Err(InfrastructureError::ShuttingDown);
        }

        let job = format!("{}-{}", SubpathCommand::Remove.name(), identity.workspace_id);
        let executor = self.executor.clone();
        let permits = self.permits.clone();
        let cancel = self.cancel.clone();
        let event_bus = self.event_bus.clone();
        let identity = identity.clone();
        let claim = claim.to_string();
        let task_job = job.clone();

        let handle = self.tracker.spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(InfrastructureError::Cancelled(task_job.clone())),
                result = async {
                    match permits.acquire_owned().await {
                        Ok(_permit) => {
                            executor
                                .execute(&identity, &claim, SubpathCommand::Remove, &paths, false)
                                .await
                        }
                        Err(_) => Err(InfrastructureError::ShuttingDown),
                    }
                } => result,
            };

            match &result {
                Ok(_) => info!(
                    workspace_id = %identity.workspace_id,
                    claim = %claim,
                    "Removed workspace subpaths"
                ),
                Err(e) => {
                    error!(
                        workspace_id = %identity.workspace_id,
                        claim = %claim,
                        job = %task_job,
                        error = %e,
                        "Failed to remove workspace subpaths"
                    );
                    metrics::counter!("workspace_volumes_cleanup_failures_total").increment(1);
                    event_bus.publish_storage_event(StorageEvent::SubpathJobFailed {
                        workspace_id: identity.workspace_id.clone(),
                        claim: claim.clone(),
                        job: task_job.clone(),
                        error: e.to_string(),
                        failed_at: Utc::now(),
                    });
                }
            }
            result
        });

        Ok(RemovalHandle { job, handle })
    }

    /// Number of queued or running removals
    pub fn pending_removals(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for `handle` to finish, then drain the pool.
    ///
    /// The removal gets the full job timeout rather than the shutdown grace
    /// period, so its pod is always deleted before this returns.
    pub async fn complete_removal(
        &self,
        handle: RemovalHandle,
    ) -> Result<JobReport, InfrastructureError> {
        let result = handle.wait().await;
        self.shutdown().await;
        result
    }

    /// Stop accepting removals and drain the pool.
    ///
    /// Removals still running after the grace period are cancelled and may
    /// leave their job pods behind.
    pub async fn shutdown(&self) {
        self.tracker.close();
        info!(pending = self.tracker.len(), "Draining subpath job pool");

        if tokio::time::timeout(self.shutdown_grace, self.tracker.wait())
            .await
            .is_ok()
        {
            info!("Subpath job pool drained");
            return;
        }

        warn!(
            pending = self.tracker.len(),
            grace = ?self.shutdown_grace,
            "Subpath job pool did not drain in time, cancelling remaining removals"
        );
        self.cancel.cancel();

        if tokio::time::timeout(FORCED_STOP_WAIT, self.tracker.wait())
            .await
            .is_err()
        {
            error!(
                pending = self.tracker.len(),
                "Subpath job pool did not terminate after cancellation"
            );
        }
    }
}
