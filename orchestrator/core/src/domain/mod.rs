// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Workspace storage model, claim and subpath rules, and the cluster port.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure rewrites of the volume request model; no I/O

pub mod claim;
pub mod cluster;
pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod pod_volumes;
pub mod subpath;
pub mod workspace;
