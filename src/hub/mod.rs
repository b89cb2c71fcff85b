//! CodeRelay Hub
//!
//! A standalone daemon that coordinates real-time collaborative code
//! analysis: clients subscribe to per-file analysis updates over WebSocket,
//! push live edits, and receive fanned-out results.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CODERELAY HUB (coderelay-daemon)                     │
//! │                  Single daemon, multi-client, multi-file                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  WebSocket transports ──► per-connection outbound queue + reader task   │
//! │                                    │                                    │
//! │                                    ▼                                    │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   Hub coordinator (actor task)                   │   │
//! │  │                                                                  │   │
//! │  │   ConnectionRegistry     lifecycle, liveness, delivery counters  │   │
//! │  │   SubscriptionRegistry   (connection, file) interest, deduped    │   │
//! │  │   DebounceScheduler      coalesced per-file analysis timers      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │             │                                        │                  │
//! │             ▼                                        ▼                  │
//! │     ResultCache (sharded,                  AnalysisCollaborator         │
//! │     TTL + tag invalidation)                (spawned async calls)        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol
//!
//! All messages are JSON over WebSocket:
//!
//! ```json
//! // Client -> Server
//! {"id": "1", "type": "subscribe-analysis", "payload": {"fileId": "src/a.ts", "language": "typescript"}}
//! {"id": "2", "type": "analyze-code", "payload": {"code": "...", "language": "typescript", "fileId": "src/a.ts"}}
//! {"id": "3", "type": "incremental-update", "payload": {"fileId": "src/a.ts", "language": "typescript", "changes": {}}}
//!
//! // Server -> Client
//! {"id": "...", "type": "welcome", "payload": {"connectionId": "conn_ab12", ...}}
//! {"id": "...", "type": "analysis-result", "payload": {"fileId": "src/a.ts", "cached": false, "result": {...}}}
//! {"id": "...", "type": "analysis-update", "payload": {"fileId": "src/a.ts", "result": {...}}}
//! ```

pub mod broadcast;
pub mod connection;
pub mod connections;
pub mod coordinator;
pub mod debounce;
pub mod protocol;
pub mod subscriptions;

pub use connection::handle_connection;
pub use connections::{ConnectionId, ConnectionRegistry, ConnectionState, DeliveryStats};
pub use coordinator::{Hub, HubHandle, HubStats};
pub use debounce::DebounceScheduler;
pub use protocol::{ClientEnvelope, ClientMessage, ServerEnvelope, ServerMessage};
pub use subscriptions::{SubscriptionOptions, SubscriptionRegistry};
