//! Error types for the coderelay hub

use thiserror::Error;

/// Main error type for hub operations
///
/// The taxonomy follows the propagation policy of the hub: protocol errors
/// are reported to the offending sender only, collaborator errors to the
/// requester (and subscribers for debounced runs), transport errors mark a
/// single connection for reaping. None of these are fatal to the hub.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("collaborator failure during {operation}: {message}")]
    Collaborator { operation: String, message: String },

    #[error("transport send failed for connection {connection_id}: {message}")]
    Transport {
        connection_id: String,
        message: String,
    },

    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("hub is shutting down")]
    Closed,
}

impl HubError {
    /// Wire-level error code sent in `error` replies
    pub fn code(&self) -> &'static str {
        match self {
            Self::Protocol { .. } => "protocol_error",
            Self::Collaborator { .. } => "collaborator_error",
            Self::Transport { .. } => "transport_error",
            Self::SubscriptionNotFound(_) => "subscription_not_found",
            Self::Closed => "hub_closed",
        }
    }

    /// Shorthand for a collaborator failure
    pub fn collaborator(operation: &str, message: impl Into<String>) -> Self {
        Self::Collaborator {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Shorthand for a protocol violation
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

/// Result type alias for hub operations
pub type Result<T> = std::result::Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes() {
        assert_eq!(HubError::protocol("bad frame").code(), "protocol_error");
        assert_eq!(
            HubError::collaborator("analyze-code", "boom").code(),
            "collaborator_error"
        );
        assert_eq!(
            HubError::Transport {
                connection_id: "conn_1".to_string(),
                message: "outbound queue closed".to_string(),
            }
            .code(),
            "transport_error"
        );
        assert_eq!(
            HubError::SubscriptionNotFound("sub_1".to_string()).code(),
            "subscription_not_found"
        );
        assert_eq!(HubError::Closed.code(), "hub_closed");
    }
}
