// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::workspace::{Workspace, WorkspaceId};

/// Workspace lifecycle notifications consumed by the storage engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkspaceEvent {
    WorkspaceRemoved {
        workspace: Workspace,
        removed_at: DateTime<Utc>,
    },
}

/// Storage lifecycle events
///
/// Failures of best-effort work (directory removal, cleanup) are published
/// here rather than escalated to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StorageEvent {
    ClaimCreated {
        workspace_id: WorkspaceId,
        namespace: String,
        claim: String,
        created_at: DateTime<Utc>,
    },
    ClaimsDeleted {
        workspace_id: WorkspaceId,
        namespace: String,
        deleted_at: DateTime<Utc>,
    },
    SubpathsCreated {
        workspace_id: WorkspaceId,
        claim: String,
        subpaths: Vec<String>,
        created_at: DateTime<Utc>,
    },
    SubpathJobFailed {
        workspace_id: WorkspaceId,
        claim: String,
        job: String,
        error: String,
        failed_at: DateTime<Utc>,
    },
    CleanupFailed {
        workspace_id: WorkspaceId,
        namespace: String,
        error: String,
        failed_at: DateTime<Utc>,
    },
}

impl StorageEvent {
    pub fn workspace_id(&self) -> &WorkspaceId {
        match self {
            StorageEvent::ClaimCreated { workspace_id, .. }
            | StorageEvent::ClaimsDeleted { workspace_id, .. }
            | StorageEvent::SubpathsCreated { workspace_id, .. }
            | StorageEvent::SubpathJobFailed { workspace_id, .. }
            | StorageEvent::CleanupFailed { workspace_id, .. } => workspace_id,
        }
    }
}
