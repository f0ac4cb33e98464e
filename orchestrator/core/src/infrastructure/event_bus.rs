// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Domain Events
//
// In-memory event streaming over tokio broadcast channels. Carries the
// workspace removal notifications consumed by the cleanup subscriber and the
// storage events that report best-effort failures.
//
// Broadcast receivers that fall behind lose the oldest events. Workspace
// removals are additionally queued, unbounded, to every removal receiver so
// storage cleanup never misses one.
//
// Events are not persisted; a process restart loses anything in flight.

use crate::domain::events::{StorageEvent, WorkspaceEvent};
use crate::domain::workspace::{Workspace, WorkspaceId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Unified domain event type for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Workspace(WorkspaceEvent),
    Storage(StorageEvent),
}

/// Event bus for publishing and subscribing to domain events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
    removal_queues: Arc<Mutex<Vec<mpsc::UnboundedSender<Workspace>>>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
            removal_queues: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish a workspace lifecycle event
    pub fn publish_workspace_event(&self, event: WorkspaceEvent) {
        let WorkspaceEvent::WorkspaceRemoved { workspace, .. } = &event;
        // Dropped receivers are pruned here
        self.removal_queues
            .lock()
            .retain(|queue| queue.send(workspace.clone()).is_ok());
        self.publish(DomainEvent::Workspace(event));
    }

    /// Publish a storage event
    pub fn publish_storage_event(&self, event: StorageEvent) {
        self.publish(DomainEvent::Storage(event));
    }

    fn publish(&self, event: DomainEvent) {
        debug!("Publishing event: {:?}", event);

        // send() only fails when nobody is listening
        let receiver_count = self.sender.send(event).unwrap_or(0);

        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all domain events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the storage events of one workspace
    pub fn subscribe_storage(&self, workspace_id: WorkspaceId) -> StorageEventReceiver {
        StorageEventReceiver {
            receiver: self.sender.subscribe(),
            workspace_id,
        }
    }

    /// Queue every workspace removal published from now on; none are dropped
    pub fn subscribe_removals(&self) -> RemovalReceiver {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.removal_queues.lock().push(sender);
        RemovalReceiver { receiver }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Number of removal queues that still have a receiver
    pub fn removal_subscriber_count(&self) -> usize {
        let mut queues = self.removal_queues.lock();
        queues.retain(|queue| !queue.is_closed());
        queues.len()
    }
}

/// Lossless queue of removed workspaces
pub struct RemovalReceiver {
    receiver: mpsc::UnboundedReceiver<Workspace>,
}

impl RemovalReceiver {
    /// Next removed workspace, `None` once every bus handle is dropped
    pub async fn recv(&mut self) -> Option<Workspace> {
        self.receiver.recv().await
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all domain events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for the storage events of a single workspace (filtered)
pub struct StorageEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    workspace_id: WorkspaceId,
}

impl StorageEventReceiver {
    pub async fn recv(&mut self) -> Result<StorageEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if let DomainEvent::Storage(storage_event) = event {
                if storage_event.workspace_id() == &self.workspace_id {
                    return Ok(storage_event);
                }
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
