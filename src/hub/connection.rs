//! WebSocket transport
//!
//! Bridges one WebSocket client to the hub: inbound text frames are handed
//! to the coordinator, outbound envelopes arrive on this connection's queue
//! and are written to the socket in queue order.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use crate::hub::coordinator::HubHandle;

// Keepalive ping cadence. Peers must answer pings with pongs (RFC 6455), so
// a listen-only client still produces inbound activity for the stale sweep.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Handle a single WebSocket connection
pub async fn handle_connection(stream: TcpStream, hub: HubHandle) {
    let addr = stream.peer_addr().ok();
    tracing::info!("New connection from {:?}", addr);

    // Accept WebSocket handshake
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::error!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // Per-connection outbound queue, drained by the writer below. The hub
    // queues envelopes here; this transport owns the socket.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let connection_id = match hub.attach(out_tx, Vec::new()).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!("Hub rejected connection from {:?}: {}", addr, e);
            return;
        }
    };

    let writer = tokio::spawn(async move {
        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.tick().await; // first tick is immediate
        loop {
            tokio::select! {
                envelope = out_rx.recv() => {
                    // Queue closed: the hub dropped this connection
                    let Some(envelope) = envelope else { break };
                    match serde_json::to_string(&envelope) {
                        Ok(json) => {
                            if ws_tx.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!("Failed to serialize outbound envelope: {}", e);
                        }
                    }
                }
                _ = keepalive.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if hub.inbound(connection_id.clone(), text).is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                tracing::info!("Client {} requested close", connection_id);
                break;
            }
            Ok(Message::Pong(_)) => {
                // Answer to our keepalive; the transport is healthy
                if hub.activity(connection_id.clone()).is_err() {
                    break;
                }
            }
            Ok(Message::Ping(_)) => {
                // tungstenite replies with Pong automatically
                if hub.activity(connection_id.clone()).is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("WebSocket error on {}: {}", connection_id, e);
                break;
            }
        }
    }

    // Cleanup on disconnect
    let _ = hub.disconnect(connection_id.clone());
    writer.abort();
    tracing::info!("Connection {} closed from {:?}", connection_id, addr);
}
