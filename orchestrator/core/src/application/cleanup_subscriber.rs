// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cleanup Subscriber Application Service
//!
//! Consumes workspace removals from the event bus's removal queue and
//! releases the storage of each removed workspace through the configured
//! strategy. The queue is unbounded, so bursts of other events never evict
//! a pending removal.
//!
//! A failed cleanup is logged and published as `StorageEvent::CleanupFailed`;
//! the subscriber keeps consuming.

use crate::application::strategy::{CleanupOutcome, WorkspaceVolumesStrategy};
use crate::domain::config::StorageConfigSpec;
use crate::domain::events::StorageEvent;
use crate::domain::workspace::Workspace;
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub struct CleanupSubscriber {
    strategy: Arc<dyn WorkspaceVolumesStrategy>,
    event_bus: EventBus,
}

impl CleanupSubscriber {
    pub fn new(strategy: Arc<dyn WorkspaceVolumesStrategy>, event_bus: EventBus) -> Self {
        Self {
            strategy,
            event_bus,
        }
    }

    /// Start the subscriber when storage lifecycle management is enabled
    pub fn spawn_if_enabled(
        spec: &StorageConfigSpec,
        strategy: Arc<dyn WorkspaceVolumesStrategy>,
        event_bus: EventBus,
    ) -> Option<JoinHandle<()>> {
        if !spec.enabled {
            info!("Storage lifecycle management disabled, removed workspaces keep their storage");
            return None;
        }
        Some(Arc::new(Self::new(strategy, event_bus)).start())
    }

    /// Subscribe and start the background cleanup task.
    ///
    /// The subscription is taken before this returns, so removals published
    /// afterwards are never missed. The subscriber keeps a bus handle to
    /// publish failures, so the task runs until the returned handle is aborted.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!("Starting workspace storage cleanup subscriber");
        let mut removals = self.event_bus.subscribe_removals();

        tokio::spawn(async move {
            let mut cleaned = 0u64;
            let mut failed = 0u64;

            while let Some(workspace) = removals.recv().await {
                if self.handle_removed(&workspace).await {
                    cleaned += 1;
                } else {
                    failed += 1;
                }
            }

            info!(
                "Cleanup subscriber shut down (cleaned {} workspaces, {} failures)",
                cleaned, failed
            );
        })
    }

    async fn handle_removed(&self, workspace: &Workspace) -> bool {
        debug!(workspace_id = %workspace.id, "Workspace removed, releasing storage");
        match self.strategy.cleanup(workspace).await {
            Ok(CleanupOutcome::RemovalScheduled(handle)) => {
                debug!(workspace_id = %workspace.id, job = %handle.job(), "Subpath removal queued");
                true
            }
            Ok(_) => true,
            Err(e) => {
                error!(
                    workspace_id = %workspace.id,
                    namespace = %workspace.namespace,
                    error = %e,
                    "Failed to clean up workspace storage"
                );
                metrics::counter!("workspace_volumes_cleanup_failures_total").increment(1);
                self.event_bus.publish_storage_event(StorageEvent::CleanupFailed {
                    workspace_id: workspace.id.clone(),
                    namespace: workspace.namespace.clone(),
                    error: e.to_string(),
                    failed_at: Utc::now(),
                });
                false
            }
        }
    }
}
