//! Protocol-level error type.

/// Errors from encoding or decoding hub protocol frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack encode error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),

    #[error("unknown message type {0}")]
    UnknownMessageType(u64),

    #[error("malformed {kind} message: {reason}")]
    Malformed {
        kind: &'static str,
        reason: String,
    },

    #[error("invalid handshake response: {0}")]
    InvalidHandshake(String),

    #[error("missing argument at index {0}")]
    MissingArgument(usize),

    #[error("argument {index} has unexpected type: {source}")]
    ArgumentType {
        index: usize,
        source: serde_json::Error,
    },
}

impl ProtocolError {
    pub(crate) fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            kind,
            reason: reason.into(),
        }
    }
}
