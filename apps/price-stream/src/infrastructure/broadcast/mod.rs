//! Broadcast Fanout
//!
//! Delivers serialized events to every open downstream connection.
//!
//! # Architecture
//!
//! Each viewer connection owns an unbounded outbound queue drained by its
//! own writer task. The `Fanout` holds the sending half of every queue:
//! - Events are serialized once and shared as `Arc<str>`
//! - A failed send means the writer is gone, and the client is removed
//! - Nothing is buffered for clients that are no longer connected
//!
//! There is no backpressure: a slow viewer grows its own queue only.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::domain::events::ServerEvent;
use crate::domain::subscription::ClientId;
use crate::infrastructure::metrics;

// =============================================================================
// Types
// =============================================================================

/// Serialized text frame shared across clients.
pub type Frame = Arc<str>;

/// Sending half of a client's outbound queue.
pub type ClientSender = mpsc::UnboundedSender<Frame>;

/// Receiving half of a client's outbound queue.
pub type ClientReceiver = mpsc::UnboundedReceiver<Frame>;

/// Create an outbound queue for a new client.
#[must_use]
pub fn client_channel() -> (ClientSender, ClientReceiver) {
    mpsc::unbounded_channel()
}

/// Result of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients the frame was queued for.
    pub delivered: usize,
    /// Clients removed because their queue was closed.
    pub removed: usize,
}

// =============================================================================
// Fanout
// =============================================================================

/// Set of open downstream connections.
#[derive(Debug, Default)]
pub struct Fanout {
    clients: HashMap<ClientId, ClientSender>,
}

impl Fanout {
    /// Create an empty fanout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client. Returns false if the id was already present.
    pub fn add(&mut self, client: ClientId, sender: ClientSender) -> bool {
        self.clients.insert(client, sender).is_none()
    }

    /// Remove a client. Returns false if it was not present.
    pub fn remove(&mut self, client: ClientId) -> bool {
        self.clients.remove(&client).is_some()
    }

    /// Number of open clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no clients are open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Send an event to every open client.
    ///
    /// Clients whose queue is closed are dropped from the set.
    pub fn broadcast(&mut self, event: &ServerEvent) -> BroadcastReport {
        if self.clients.is_empty() {
            return BroadcastReport::default();
        }

        let Some(frame) = serialize(event) else {
            return BroadcastReport::default();
        };

        let before = self.clients.len();
        self.clients.retain(|client, sender| {
            if sender.send(Arc::clone(&frame)).is_ok() {
                true
            } else {
                tracing::debug!(client, "Dropping closed client");
                false
            }
        });

        let delivered = self.clients.len();
        let report = BroadcastReport {
            delivered,
            removed: before - delivered,
        };

        metrics::record_broadcast(event.kind(), report.delivered as u64);
        if report.removed > 0 {
            metrics::record_send_failures(report.removed as u64);
        }
        report
    }

    /// Send an event to a single client.
    ///
    /// Returns false, and removes the client, if its queue is closed.
    pub fn send_to(&mut self, client: ClientId, event: &ServerEvent) -> bool {
        let Some(sender) = self.clients.get(&client) else {
            return false;
        };
        let Some(frame) = serialize(event) else {
            return false;
        };

        if sender.send(frame).is_ok() {
            true
        } else {
            self.clients.remove(&client);
            metrics::record_send_failures(1);
            false
        }
    }
}

fn serialize(event: &ServerEvent) -> Option<Frame> {
    match event.to_json() {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            tracing::error!(error = %e, kind = event.kind(), "Failed to serialize event");
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
