//! Broadcast engine
//!
//! Fans one logical event out to every subscriber of a file, or to the
//! members of a collaboration room. Delivery is best-effort: connections
//! whose transport is no longer open are skipped and logged, never retried;
//! the stale sweep reaps them later. Ordering within a single recipient's
//! stream is preserved because every message goes through that connection's
//! outbound queue.

use serde::Serialize;

use crate::hub::connections::{ConnectionId, ConnectionRegistry, DeliveryOutcome};
use crate::hub::protocol::ServerMessage;
use crate::hub::subscriptions::SubscriptionRegistry;

/// Per-call fan-out summary (cumulative counters live on the registry)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanoutSummary {
    pub delivered: usize,
    pub skipped_closed: usize,
    pub failed: usize,
}

impl FanoutSummary {
    fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::SkippedClosed => self.skipped_closed += 1,
            DeliveryOutcome::Failed => self.failed += 1,
        }
    }
}

/// Send a message to every connection subscribed to a file
pub fn notify_subscribers(
    connections: &mut ConnectionRegistry,
    subscriptions: &SubscriptionRegistry,
    file_id: &str,
    message: &ServerMessage,
) -> FanoutSummary {
    let mut summary = FanoutSummary::default();
    for connection_id in subscriptions.subscribers_of(file_id) {
        let outcome = connections.send_to(&connection_id, message.clone());
        if outcome != DeliveryOutcome::Delivered {
            tracing::debug!(
                "fan-out for {} skipped connection {} ({:?})",
                file_id,
                connection_id,
                outcome
            );
        }
        summary.record(outcome);
    }
    summary
}

/// Send a message to every member of a room, excluding the originator
pub fn broadcast_to_room(
    connections: &mut ConnectionRegistry,
    room_id: &str,
    message: &ServerMessage,
    exclude: Option<&ConnectionId>,
) -> FanoutSummary {
    let mut summary = FanoutSummary::default();
    for connection_id in connections.room_members(room_id, exclude) {
        let outcome = connections.send_to(&connection_id, message.clone());
        summary.record(outcome);
    }
    summary
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::connections::ConnectionState;
    use tokio::sync::mpsc;

    #[test]
    fn test_notify_reaches_only_subscribers() {
        let mut connections = ConnectionRegistry::new();
        let mut subscriptions = SubscriptionRegistry::new();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = connections.register(tx_a, vec![]);
        let b = connections.register(tx_b, vec![]);
        connections.set_state(&a, ConnectionState::Open);
        connections.set_state(&b, ConnectionState::Open);

        subscriptions.subscribe(&a, "f.ts", "typescript", Default::default());

        let summary = notify_subscribers(
            &mut connections,
            &subscriptions,
            "f.ts",
            &ServerMessage::AnalysisUpdate {
                file_id: "f.ts".to_string(),
                result: serde_json::json!({}),
            },
        );

        assert_eq!(summary.delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_closed_transport_is_soft_failure() {
        let mut connections = ConnectionRegistry::new();
        let mut subscriptions = SubscriptionRegistry::new();

        let (tx, rx) = mpsc::unbounded_channel();
        let a = connections.register(tx, vec![]);
        connections.set_state(&a, ConnectionState::Open);
        subscriptions.subscribe(&a, "f.ts", "typescript", Default::default());
        drop(rx);

        let summary = notify_subscribers(
            &mut connections,
            &subscriptions,
            "f.ts",
            &ServerMessage::Pong,
        );
        assert_eq!(summary.failed, 1);
        assert_eq!(connections.delivery.failed, 1);

        // Next attempt skips the closing connection instead of retrying
        let summary = notify_subscribers(
            &mut connections,
            &subscriptions,
            "f.ts",
            &ServerMessage::Pong,
        );
        assert_eq!(summary.skipped_closed, 1);
    }

    #[test]
    fn test_room_broadcast_excludes_originator() {
        let mut connections = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = connections.register(tx_a, vec![]);
        let b = connections.register(tx_b, vec![]);
        connections.set_state(&a, ConnectionState::Open);
        connections.set_state(&b, ConnectionState::Open);
        connections.get_mut(&a).unwrap().room = Some("r1".to_string());
        connections.get_mut(&b).unwrap().room = Some("r1".to_string());

        let summary = broadcast_to_room(
            &mut connections,
            "r1",
            &ServerMessage::CollaborationUserJoined {
                room_id: "r1".to_string(),
                connection_id: a.clone(),
            },
            Some(&a),
        );

        assert_eq!(summary.delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }
}
