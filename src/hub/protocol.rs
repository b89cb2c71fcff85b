//! Wire protocol message types
//!
//! All messages are JSON over WebSocket, wrapped in a thin envelope:
//!
//! ```json
//! // Client -> Server
//! {"id": "m1", "type": "subscribe-analysis", "timestamp": 1724380800000,
//!  "payload": {"fileId": "f.ts", "language": "typescript"}}
//!
//! // Server -> Client
//! {"id": "...", "type": "analysis-update", "timestamp": ...,
//!  "connectionId": "conn_1a2b3c4d",
//!  "payload": {"fileId": "f.ts", "result": {...}}}
//! ```

use serde::{Deserialize, Serialize};

use crate::collaborator::{AnalysisOptions, PatternOptions, Position, SearchOptions};
use crate::hub::subscriptions::SubscriptionOptions;

/// Envelope for client-to-server messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEnvelope {
    pub id: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(flatten)]
    pub message: ClientMessage,
}

/// Client-to-server message bodies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Liveness check
    Ping,
    /// Subscribe to live analysis updates for a file
    SubscribeAnalysis(SubscribeAnalysis),
    /// Remove a subscription by id
    #[serde(rename_all = "camelCase")]
    UnsubscribeAnalysis { subscription_id: String },
    /// Analyze a full code snapshot
    AnalyzeCode(AnalyzeCode),
    /// Push a live edit; coalesced through the debounce scheduler
    IncrementalUpdate(IncrementalUpdate),
    /// Free-text symbol search
    #[serde(rename_all = "camelCase")]
    SearchSymbols {
        query: String,
        #[serde(default)]
        options: SearchOptions,
    },
    /// Structural pattern matching
    #[serde(rename_all = "camelCase")]
    MatchPatterns {
        pattern: String,
        scope: String,
        #[serde(default)]
        options: PatternOptions,
    },
    /// Find references to the symbol at a position
    GetReferences(GetReferences),
    /// Join a collaboration room
    #[serde(rename_all = "camelCase")]
    CollaborationJoin { room_id: String },
    /// Leave the current collaboration room
    CollaborationLeave,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeAnalysis {
    pub file_id: String,
    pub language: String,
    #[serde(default)]
    pub options: SubscriptionOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeCode {
    pub code: String,
    pub language: String,
    pub file_id: String,
    #[serde(default)]
    pub options: AnalysisOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalUpdate {
    pub file_id: String,
    pub language: String,
    /// Engine-specific change payload; the hub only coalesces it
    pub changes: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetReferences {
    pub code: String,
    pub language: String,
    pub file_id: String,
    pub position: Position,
}

/// Envelope for server-to-client messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEnvelope {
    pub id: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(flatten)]
    pub message: ServerMessage,
}

impl ServerEnvelope {
    /// Wrap a message in a fresh envelope addressed to a connection
    pub fn new(message: ServerMessage, connection_id: Option<String>) -> Self {
        Self {
            id: new_message_id(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            connection_id,
            message,
        }
    }
}

/// Server-to-client message bodies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Capability/welcome message sent immediately after the handshake
    Welcome(Welcome),
    /// Liveness reply
    Pong,
    /// Subscription acknowledged (also sent when a re-subscribe updates one)
    #[serde(rename_all = "camelCase")]
    SubscriptionCreated {
        subscription_id: String,
        file_id: String,
        /// Effective options after any dedupe/update
        options: SubscriptionOptions,
    },
    /// Subscription removed
    #[serde(rename_all = "camelCase")]
    SubscriptionRemoved { subscription_id: String },
    /// Direct reply to an `analyze-code` request
    #[serde(rename_all = "camelCase")]
    AnalysisResult {
        file_id: String,
        cached: bool,
        result: serde_json::Value,
    },
    /// Pushed to subscribers after a fresh analysis
    #[serde(rename_all = "camelCase")]
    AnalysisUpdate {
        file_id: String,
        result: serde_json::Value,
    },
    /// Pushed to subscribers after a debounced incremental run
    #[serde(rename_all = "camelCase")]
    IncrementalUpdate {
        file_id: String,
        result: serde_json::Value,
    },
    /// Reply to `search-symbols`
    #[serde(rename_all = "camelCase")]
    SearchResults {
        query: String,
        cached: bool,
        results: serde_json::Value,
    },
    /// Reply to `match-patterns`
    #[serde(rename_all = "camelCase")]
    PatternMatches {
        pattern: String,
        cached: bool,
        matches: serde_json::Value,
    },
    /// Reply to `get-references`
    #[serde(rename_all = "camelCase")]
    ReferencesResult {
        file_id: String,
        result: serde_json::Value,
    },
    /// Reply to `collaboration-join`
    #[serde(rename_all = "camelCase")]
    CollaborationJoined {
        room_id: String,
        /// Other members already in the room
        members: Vec<String>,
    },
    /// Presence: another member joined the room
    #[serde(rename_all = "camelCase")]
    CollaborationUserJoined {
        room_id: String,
        connection_id: String,
    },
    /// Presence: a member left the room explicitly
    #[serde(rename_all = "camelCase")]
    CollaborationUserLeft {
        room_id: String,
        connection_id: String,
    },
    /// Presence: a member's connection dropped
    #[serde(rename_all = "camelCase")]
    CollaborationUserDisconnected {
        room_id: String,
        connection_id: String,
    },
    /// Error reply; the connection stays open
    #[serde(rename_all = "camelCase")]
    Error {
        code: String,
        message: String,
        /// Id of the request that failed, when known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

/// Welcome payload advertising what the server speaks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub connection_id: String,
    pub server_version: String,
    pub capabilities: Vec<String>,
}

/// Message types the hub consumes, advertised in the welcome payload
pub const SUPPORTED_MESSAGES: &[&str] = &[
    "ping",
    "subscribe-analysis",
    "unsubscribe-analysis",
    "analyze-code",
    "incremental-update",
    "search-symbols",
    "match-patterns",
    "get-references",
    "collaboration-join",
    "collaboration-leave",
];

/// Generate a short unique message id
pub fn new_message_id() -> String {
    format!(
        "msg_{}",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_envelope_parse() {
        let json = r#"{
            "id": "m1",
            "type": "subscribe-analysis",
            "timestamp": 1724380800000,
            "payload": {"fileId": "f.ts", "language": "typescript"}
        }"#;
        let env: ClientEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(env.id, "m1");
        match env.message {
            ClientMessage::SubscribeAnalysis(sub) => {
                assert_eq!(sub.file_id, "f.ts");
                assert_eq!(sub.language, "typescript");
                assert!(sub.options.include_relationships);
            }
            _ => panic!("Expected subscribe-analysis"),
        }
    }

    #[test]
    fn test_ping_without_payload() {
        let json = r#"{"id": "m2", "type": "ping"}"#;
        let env: ClientEnvelope = serde_json::from_str(json).unwrap();
        assert!(matches!(env.message, ClientMessage::Ping));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let json = r#"{"id": "m3", "type": "frobnicate", "payload": {}}"#;
        assert!(serde_json::from_str::<ClientEnvelope>(json).is_err());
    }

    #[test]
    fn test_server_envelope_tags() {
        let env = ServerEnvelope::new(
            ServerMessage::AnalysisUpdate {
                file_id: "f.ts".to_string(),
                result: serde_json::json!({}),
            },
            Some("conn_1".to_string()),
        );
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "analysis-update");
        assert_eq!(json["payload"]["fileId"], "f.ts");
        assert_eq!(json["connectionId"], "conn_1");
    }

    #[test]
    fn test_presence_message_tags() {
        let msg = ServerMessage::CollaborationUserDisconnected {
            room_id: "r1".to_string(),
            connection_id: "conn_9".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "collaboration-user-disconnected");
    }
}
