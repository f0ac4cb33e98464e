// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::error::InfrastructureError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Workspace attribute that switches a workspace to transient storage.
pub const PERSIST_VOLUMES_ATTRIBUTE: &str = "persistVolumes";

/// Unique identifier of a workspace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(pub String);

impl WorkspaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reject ids that are not a single path segment.
    ///
    /// The id names a directory on shared claims, so an empty id, `.`, `..`
    /// or an id containing `/` would address another workspace's data.
    pub fn validate(&self) -> Result<(), InfrastructureError> {
        if matches!(self.0.as_str(), "" | "." | "..") || self.0.contains('/') {
            return Err(InfrastructureError::InvalidState(format!(
                "Invalid workspace id '{}'",
                self.0
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkspaceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Where the resources of one workspace start live.
///
/// Supplied by the caller on every call; never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeIdentity {
    pub workspace_id: WorkspaceId,
    pub namespace: String,
}

impl RuntimeIdentity {
    pub fn new(workspace_id: impl Into<WorkspaceId>, namespace: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            namespace: namespace.into(),
        }
    }
}

impl From<String> for WorkspaceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A workspace as seen by the storage cleanup path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub namespace: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Workspace {
    pub fn new(id: impl Into<WorkspaceId>, namespace: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            namespace: namespace.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn is_ephemeral(&self) -> bool {
        is_ephemeral(&self.attributes)
    }

    pub fn identity(&self) -> RuntimeIdentity {
        RuntimeIdentity::new(self.id.clone(), self.namespace.clone())
    }
}

/// Ephemeral workspaces opt out of persistence with `persistVolumes=false`.
pub fn is_ephemeral(attributes: &BTreeMap<String, String>) -> bool {
    attributes
        .get(PERSIST_VOLUMES_ATTRIBUTE)
        .map(|value| value.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_is_not_ephemeral_by_default() {
        let workspace = Workspace::new("ws1", "che");
        assert!(!workspace.is_ephemeral());
    }

    #[test]
    fn test_workspace_ephemeral_attribute() {
        let workspace = Workspace::new("ws1", "che").with_attribute(PERSIST_VOLUMES_ATTRIBUTE, "false");
        assert!(workspace.is_ephemeral());

        let persistent = Workspace::new("ws1", "che").with_attribute(PERSIST_VOLUMES_ATTRIBUTE, "true");
        assert!(!persistent.is_ephemeral());
    }

    #[test]
    fn test_workspace_id_must_be_one_path_segment() {
        for id in ["", ".", "..", "a/b", "/ws1", "ws1/.."] {
            assert!(
                matches!(WorkspaceId::from(id).validate(), Err(InfrastructureError::InvalidState(_))),
                "accepted {:?}",
                id
            );
        }
        for id in ["ws1", "workspace.abc", "..ws"] {
            assert!(WorkspaceId::from(id).validate().is_ok(), "rejected {:?}", id);
        }
    }

    #[test]
    fn test_identity_from_workspace() {
        let identity = Workspace::new("ws7", "team-a").identity();
        assert_eq!(identity.workspace_id.as_str(), "ws7");
        assert_eq!(identity.namespace, "team-a");
    }
}
