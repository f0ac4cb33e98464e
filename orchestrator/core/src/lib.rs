// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workspace Volumes
//!
//! Provisions and tears down the persistent storage of cloud-IDE workspaces
//! on a Kubernetes cluster.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Volume strategies (common, per-workspace, unique), claim
//!   provisioning, subpath isolation, and helper jobs

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
