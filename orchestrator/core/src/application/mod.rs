// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod claim_provisioner;
pub mod cleanup_subscriber;
pub mod ephemeral;
pub mod strategy;
pub mod subpath_jobs;

pub use claim_provisioner::ClaimProvisioner;
pub use cleanup_subscriber::CleanupSubscriber;
pub use ephemeral::EphemeralAdapter;
pub use strategy::{
    CleanupOutcome, PrepareOptions, VolumeStrategy, WorkspaceVolumesStrategy,
};
pub use subpath_jobs::{JobPhase, JobReport, RemovalHandle, SubpathJobRunner};
