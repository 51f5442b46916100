//! Connection-level error type.
//!
//! Every failure reaching the application is normalized into
//! [`ConnectionError`]; transport-specific error types never escape the
//! transport layer.

use hublink_protocol::ProtocolError;

use crate::types::ConnectionState;

/// Errors surfaced by a hub connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The negotiate exchange failed: HTTP failure, non-success status,
    /// malformed payload, server-reported error, or redirect depth exceeded.
    #[error("negotiation failed: {0}")]
    Negotiate(String),

    /// The selected transport failed to connect.
    #[error("transport connect failed: {0}")]
    TransportConnect(String),

    /// No handshake response arrived within the handshake timeout.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The server rejected the handshake.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The server completed an invocation with an error. Delivered only to
    /// the pending invocation that failed.
    #[error("invocation failed on the server: {0}")]
    Invocation(String),

    /// The connection was stopped locally while the operation was pending.
    #[error("connection stopped")]
    ConnectionStopped,

    /// The transport failed, the server timed out, or reconnection was
    /// exhausted.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The operation is not valid in the connection's current state.
    #[error("connection is {actual}, operation requires {expected}")]
    InvalidState {
        expected: ConnectionState,
        actual: ConnectionState,
    },
}

impl ConnectionError {
    /// `true` for errors that terminate the whole connection rather than a
    /// single invocation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionStopped | Self::ConnectionLost(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            ConnectionError::HandshakeTimeout.to_string(),
            "handshake timed out"
        );
        assert_eq!(
            ConnectionError::ConnectionStopped.to_string(),
            "connection stopped"
        );
        let err = ConnectionError::InvalidState {
            expected: ConnectionState::Disconnected,
            actual: ConnectionState::Connected,
        };
        assert!(err.to_string().contains("Connected"));
    }

    #[test]
    fn terminal_classification() {
        assert!(ConnectionError::ConnectionStopped.is_terminal());
        assert!(ConnectionError::ConnectionLost("x".into()).is_terminal());
        assert!(!ConnectionError::Invocation("x".into()).is_terminal());
    }
}
