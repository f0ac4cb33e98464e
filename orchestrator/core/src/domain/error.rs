// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::cluster::ClusterError;
use std::time::Duration;
use thiserror::Error;

/// The single failure kind surfaced by `provision`, `prepare` and `cleanup`.
///
/// Callers treat any variant as a failed workspace start or stop.
#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("Cluster request failed: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Invalid storage state: {0}")]
    InvalidState(String),

    #[error("Claim '{claim}' was not bound within {timeout:?}")]
    ClaimBindTimeout { claim: String, timeout: Duration },

    #[error("Job '{job}' did not finish within {timeout:?}")]
    JobTimeout { job: String, timeout: Duration },

    #[error("Job '{job}' failed: {reason}")]
    JobFailed { job: String, reason: String },

    #[error("Subpath job pool is shutting down")]
    ShuttingDown,

    #[error("Job '{0}' was cancelled")]
    Cancelled(String),
}

impl InfrastructureError {
    /// Timeouts of any blocking wait, as opposed to rejected requests.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ClaimBindTimeout { .. }
                | Self::JobTimeout { .. }
                | Self::Cluster(ClusterError::Timeout { .. })
        )
    }
}
