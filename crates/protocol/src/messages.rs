//! Hub message variants.
//!
//! Every frame exchanged after the handshake is one of these seven message
//! kinds. Arguments, stream items, and results are carried as schema-less
//! [`serde_json::Value`]s; typed decoding happens at the API boundary
//! (see [`crate::arguments`]).

use serde_json::Value;

/// Numeric discriminator for [`HubMessage::Invocation`].
pub const INVOCATION: u8 = 1;
/// Numeric discriminator for [`HubMessage::StreamItem`].
pub const STREAM_ITEM: u8 = 2;
/// Numeric discriminator for [`HubMessage::Completion`].
pub const COMPLETION: u8 = 3;
/// Numeric discriminator for [`HubMessage::StreamInvocation`].
pub const STREAM_INVOCATION: u8 = 4;
/// Numeric discriminator for [`HubMessage::CancelInvocation`].
pub const CANCEL_INVOCATION: u8 = 5;
/// Numeric discriminator for [`HubMessage::Ping`].
pub const PING: u8 = 6;
/// Numeric discriminator for [`HubMessage::Close`].
pub const CLOSE: u8 = 7;

/// A hub protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// A remote method call. Fire-and-forget when `invocation_id` is absent;
    /// otherwise the peer answers with a [`HubMessage::Completion`] carrying
    /// the same id. `stream_ids` references client-to-server upload streams.
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
        stream_ids: Vec<String>,
    },

    /// One item of a streaming result or of an upload stream.
    StreamItem {
        invocation_id: String,
        item: Value,
    },

    /// Terminal response to an invocation, stream invocation, or upload
    /// stream. At most one of `result`/`error` is present; both absent
    /// means void success.
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },

    /// A remote method call whose result is a server-to-client stream.
    StreamInvocation {
        invocation_id: String,
        target: String,
        arguments: Vec<Value>,
        stream_ids: Vec<String>,
    },

    /// Client asks the server to stop a stream.
    CancelInvocation { invocation_id: String },

    /// Keep-alive. No payload, no response required.
    Ping,

    /// Server-initiated termination notice.
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
}

impl HubMessage {
    /// Returns the wire discriminator for this message.
    pub fn message_type(&self) -> u8 {
        match self {
            Self::Invocation { .. } => INVOCATION,
            Self::StreamItem { .. } => STREAM_ITEM,
            Self::Completion { .. } => COMPLETION,
            Self::StreamInvocation { .. } => STREAM_INVOCATION,
            Self::CancelInvocation { .. } => CANCEL_INVOCATION,
            Self::Ping => PING,
            Self::Close { .. } => CLOSE,
        }
    }

    /// Short kind name, used in parse error reporting.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Invocation { .. } => "Invocation",
            Self::StreamItem { .. } => "StreamItem",
            Self::Completion { .. } => "Completion",
            Self::StreamInvocation { .. } => "StreamInvocation",
            Self::CancelInvocation { .. } => "CancelInvocation",
            Self::Ping => "Ping",
            Self::Close { .. } => "Close",
        }
    }

    /// The invocation id this message correlates to, if any.
    pub fn invocation_id(&self) -> Option<&str> {
        match self {
            Self::Invocation { invocation_id, .. } => invocation_id.as_deref(),
            Self::StreamItem { invocation_id, .. }
            | Self::Completion { invocation_id, .. }
            | Self::StreamInvocation { invocation_id, .. }
            | Self::CancelInvocation { invocation_id } => Some(invocation_id),
            Self::Ping | Self::Close { .. } => None,
        }
    }

    /// Builds a fire-and-forget invocation.
    pub fn send(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self::Invocation {
            invocation_id: None,
            target: target.into(),
            arguments,
            stream_ids: Vec::new(),
        }
    }

    /// Builds a void-success completion for the given id.
    pub fn completion_ok(invocation_id: impl Into<String>) -> Self {
        Self::Completion {
            invocation_id: invocation_id.into(),
            result: None,
            error: None,
        }
    }

    /// Builds an error completion for the given id.
    pub fn completion_error(
        invocation_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self::Completion {
            invocation_id: invocation_id.into(),
            result: None,
            error: Some(error.into()),
        }
    }
}
