// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod cluster;
pub mod event_bus;

pub use cluster::{create_cluster_client, ClusterBackend, InMemoryCluster, KubeClusterClient};
pub use event_bus::{DomainEvent, EventBus};
