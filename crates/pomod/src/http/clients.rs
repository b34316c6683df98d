//! SSE client registry and broadcaster.
//!
//! Every `/api/timer/stream` subscriber gets a bounded channel registered
//! under a monotonically increasing id. Broadcasting snapshots the senders
//! under the read lock and sends outside of it, so subscribing or leaving
//! never waits on a broadcast in progress.
//!
//! Slow subscribers are disconnected: a full channel removes the entry,
//! which drops the sender and ends that client's stream. A closed channel
//! (client already gone) is removed the same way.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use pomo_core::{TimerEvent, TimerSnapshot};
use pomo_protocol::EVENT_RESTART;

use crate::hooks::HookHandler;

/// Per-subscriber channel capacity
pub const CLIENT_BUFFER: usize = 64;

pub type ClientId = u64;

/// One named message on a subscriber's stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    pub event: &'static str,
    pub data: String,
}

impl StreamMessage {
    /// A snapshot payload under the given event name.
    pub fn snapshot(event: &'static str, snapshot: &TimerSnapshot) -> Self {
        let data = match serde_json::to_string(snapshot) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize snapshot");
                "{}".to_string()
            }
        };
        Self { event, data }
    }

    /// Announces that the daemon is going away for a reload.
    pub fn restart() -> Self {
        Self {
            event: EVENT_RESTART,
            data: "{}".to_string(),
        }
    }
}

/// Concurrent map of live stream subscribers.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<ClientId, mpsc::Sender<StreamMessage>>>>,
    next_id: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber.
    ///
    /// After [`close_all`](Self::close_all) the returned receiver is already
    /// closed, so late subscribers end immediately.
    pub async fn subscribe(&self) -> (ClientId, mpsc::Receiver<StreamMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);

        let mut clients = self.clients.write().await;
        if self.closed.load(Ordering::Acquire) {
            debug!(client_id = id, "Registry closed, rejecting subscriber");
        } else {
            clients.insert(id, tx);
            debug!(client_id = id, total = clients.len(), "Added stream subscriber");
        }
        (id, rx)
    }

    /// Removes a subscriber; returns whether it was still registered.
    pub async fn remove(&self, id: ClientId) -> bool {
        let removed = self.clients.write().await.remove(&id).is_some();
        if removed {
            debug!(client_id = id, "Removed stream subscriber");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Sends `message` to every subscriber without waiting on any of them.
    ///
    /// Returns how many subscribers accepted it.
    pub async fn broadcast(&self, message: StreamMessage) -> usize {
        let targets: Vec<(ClientId, mpsc::Sender<StreamMessage>)> = self
            .clients
            .read()
            .await
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut failed_clients = Vec::new();

        for (id, tx) in targets {
            match tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(client_id = id, "Stream subscriber too slow, disconnecting");
                    failed_clients.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(client_id = id, "Stream subscriber already gone");
                    failed_clients.push(id);
                }
            }
        }

        if !failed_clients.is_empty() {
            let mut clients = self.clients.write().await;
            for id in failed_clients {
                clients.remove(&id);
            }
        }

        delivered
    }

    /// Drops every sender, ending all streams, and refuses new subscribers.
    pub async fn close_all(&self) {
        let mut clients = self.clients.write().await;
        self.closed.store(true, Ordering::Release);
        let count = clients.len();
        clients.clear();
        debug!(count, "Closed all stream subscribers");
    }
}

/// Removes a subscriber from the registry when its stream is dropped.
pub struct ClientGuard {
    registry: ClientRegistry,
    id: ClientId,
}

impl ClientGuard {
    pub fn new(registry: ClientRegistry, id: ClientId) -> Self {
        Self { registry, id }
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        let registry = self.registry.clone();
        let id = self.id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                registry.remove(id).await;
            });
        }
    }
}

/// Hook subscriber pushing engine events to every stream client.
pub struct SseBroadcaster {
    clients: ClientRegistry,
}

impl SseBroadcaster {
    pub fn new(clients: ClientRegistry) -> Self {
        Self { clients }
    }
}

#[async_trait]
impl HookHandler for SseBroadcaster {
    async fn handle(&self, event: TimerEvent) {
        let message = StreamMessage::snapshot(event.name(), event.snapshot());
        let delivered = self.clients.broadcast(message).await;
        debug!(event = event.name(), delivered, "Broadcast timer event");
    }
}
