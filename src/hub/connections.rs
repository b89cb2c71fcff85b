//! Connection registry
//!
//! Owns the set of live client connections, their metadata, and liveness
//! state. The transport handle for each connection is an unbounded sender
//! drained by that connection's writer task, so messages queued here reach
//! the client in the order they were queued.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
// tokio's Instant follows the runtime clock, so staleness is measured on
// mocked time under a paused test clock and on system time in production
use tokio::time::Instant;

use crate::error::HubError;
use crate::hub::protocol::{ServerEnvelope, ServerMessage};

pub type ConnectionId = String;

/// Per-connection lifecycle state. No transitions are legal once `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// One live client connection
pub struct ClientConnection {
    pub id: ConnectionId,
    /// Transport handle: queued envelopes are drained by the writer task
    outbound: mpsc::UnboundedSender<ServerEnvelope>,
    pub state: ConnectionState,
    pub last_activity: Instant,
    pub capabilities: Vec<String>,
    /// Collaboration room this connection has joined, if any
    pub room: Option<String>,
}

/// Outcome of one delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Transport no longer open; the stale sweep will reap the connection
    SkippedClosed,
    /// Send failed (receiver gone); connection marked for teardown
    Failed,
}

/// Cumulative delivery counters, surfaced through hub stats
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub skipped_closed: u64,
    pub failed: u64,
}

/// Registry of live connections
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ClientConnection>,
    pub delivery: DeliveryStats,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection in the `Connecting` state
    pub fn register(
        &mut self,
        outbound: mpsc::UnboundedSender<ServerEnvelope>,
        capabilities: Vec<String>,
    ) -> ConnectionId {
        let id = format!(
            "conn_{}",
            uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
        );
        self.connections.insert(
            id.clone(),
            ClientConnection {
                id: id.clone(),
                outbound,
                state: ConnectionState::Connecting,
                last_activity: Instant::now(),
                capabilities,
                room: None,
            },
        );
        id
    }

    /// Remove a connection record. Unknown ids are no-ops, since disconnects
    /// can race with sweep-driven cleanup.
    pub fn unregister(&mut self, id: &ConnectionId) -> Option<ClientConnection> {
        match self.connections.remove(id) {
            Some(mut conn) => {
                conn.state = ConnectionState::Closed;
                Some(conn)
            }
            None => {
                tracing::debug!("unregister: connection {} not found", id);
                None
            }
        }
    }

    /// Update last-activity for a connection
    pub fn touch(&mut self, id: &ConnectionId) {
        if let Some(conn) = self.connections.get_mut(id) {
            conn.last_activity = Instant::now();
        }
    }

    /// Connections with no activity for at least `threshold`
    pub fn list_stale(&self, threshold: Duration) -> Vec<ConnectionId> {
        let now = Instant::now();
        self.connections
            .values()
            .filter(|c| now.duration_since(c.last_activity) >= threshold)
            .map(|c| c.id.clone())
            .collect()
    }

    /// Advance a connection's lifecycle state. Transitions out of `Closed`
    /// are ignored.
    pub fn set_state(&mut self, id: &ConnectionId, state: ConnectionState) {
        if let Some(conn) = self.connections.get_mut(id) {
            if conn.state == ConnectionState::Closed {
                tracing::warn!("ignoring state change on closed connection {}", id);
                return;
            }
            conn.state = state;
        }
    }

    /// Queue a message for one connection, recording the delivery outcome
    pub fn send_to(&mut self, id: &ConnectionId, message: ServerMessage) -> DeliveryOutcome {
        let outcome = match self.connections.get_mut(id) {
            Some(conn) if conn.state == ConnectionState::Open => {
                let envelope = ServerEnvelope::new(message, Some(id.clone()));
                if conn.outbound.send(envelope).is_ok() {
                    DeliveryOutcome::Delivered
                } else {
                    // Writer task gone; stop further delivery attempts
                    let err = HubError::Transport {
                        connection_id: id.clone(),
                        message: "outbound queue closed".to_string(),
                    };
                    tracing::warn!("{}", err);
                    conn.state = ConnectionState::Closing;
                    DeliveryOutcome::Failed
                }
            }
            Some(_) => DeliveryOutcome::SkippedClosed,
            None => DeliveryOutcome::SkippedClosed,
        };

        match outcome {
            DeliveryOutcome::Delivered => self.delivery.delivered += 1,
            DeliveryOutcome::SkippedClosed => self.delivery.skipped_closed += 1,
            DeliveryOutcome::Failed => self.delivery.failed += 1,
        }
        outcome
    }

    /// Members of a collaboration room, optionally excluding one connection
    pub fn room_members(
        &self,
        room_id: &str,
        exclude: Option<&ConnectionId>,
    ) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.room.as_deref() == Some(room_id))
            .filter(|c| exclude != Some(&c.id))
            .map(|c| c.id.clone())
            .collect()
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&ClientConnection> {
        self.connections.get(id)
    }

    pub fn get_mut(&mut self, id: &ConnectionId) -> Option<&mut ClientConnection> {
        self.connections.get_mut(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
