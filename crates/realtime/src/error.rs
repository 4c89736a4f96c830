//! Error types for the connection manager and its transports.

use tokio_tungstenite::tungstenite;

use wattlink_protocol::ProtocolError;

use crate::config::ConfigError;
use crate::state::ConnectionState;

/// Errors reported by a transport while opening or using a link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The server rejected the credential. Never retried.
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("connection refused: {0}")]
    Refused(String),

    #[error("outbound queue full")]
    Backpressure,

    /// The connector panicked while opening a link. Treated as transient.
    #[error("connector panicked: {0}")]
    ConnectorPanicked(String),

    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Returns `true` for credential failures, which must not be retried.
    pub fn is_auth(&self) -> bool {
        matches!(self, TransportError::Auth(_))
    }
}

/// Errors surfaced by [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("connection failed: {0}")]
    Transport(String),

    #[error("gave up after {attempts} reconnection attempt(s)")]
    RetriesExhausted { attempts: u32 },

    #[error("connection attempt cancelled by disconnect")]
    Cancelled,

    #[error("not connected (state: {state})")]
    NotConnected { state: ConnectionState },

    #[error("event name {0:?} is reserved")]
    ReservedEvent(String),

    #[error("event name is empty")]
    EmptyEventName,

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("emit failed: {0}")]
    Emit(#[from] TransportError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl RealtimeError {
    /// Returns `true` if the failure was a rejected credential.
    pub fn is_auth(&self) -> bool {
        matches!(self, RealtimeError::Authentication(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_display() {
        assert_eq!(TransportError::HandshakeTimeout.to_string(), "handshake timed out");
        assert_eq!(TransportError::Closed.to_string(), "connection closed");
        assert_eq!(
            TransportError::Auth("jwt expired".into()).to_string(),
            "authentication rejected: jwt expired"
        );
    }

    #[test]
    fn only_auth_is_auth() {
        assert!(TransportError::Auth("x".into()).is_auth());
        assert!(!TransportError::Refused("busy".into()).is_auth());
        assert!(RealtimeError::Authentication("x".into()).is_auth());
        assert!(!RealtimeError::Cancelled.is_auth());
    }

    #[test]
    fn realtime_error_display() {
        let err = RealtimeError::NotConnected {
            state: ConnectionState::Reconnecting,
        };
        assert_eq!(err.to_string(), "not connected (state: reconnecting)");

        let err = RealtimeError::RetriesExhausted { attempts: 5 };
        assert!(err.to_string().contains('5'));
    }
}
