//! Wire protocol for hublink hub connections.
//!
//! Defines the seven hub message kinds, the connection handshake, and two
//! interchangeable encodings: JSON records delimited by the ASCII record
//! separator, and length-prefixed MessagePack records.

pub mod arguments;
pub mod error;
pub mod handshake;
pub mod json;
pub mod messagepack;
pub mod messages;

pub use error::ProtocolError;
pub use handshake::{HandshakeRequest, HandshakeResponse};
pub use json::JsonProtocol;
pub use messagepack::MessagePackProtocol;
pub use messages::HubMessage;

/// The encoding a transport must carry for a given protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFormat {
    Text,
    Binary,
}

impl TransferFormat {
    /// The name used in negotiation payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Binary => "Binary",
        }
    }
}

/// A hub message encoding.
///
/// `parse_frames` is fed raw transport frames and maintains its partial
/// record state in the caller-owned `buffer`, so one protocol instance can
/// be shared between the read and write paths. Each complete record yields
/// its own `Result`; a malformed record never poisons the records behind it.
pub trait HubProtocol: Send + Sync {
    /// Protocol name as used in the handshake and in negotiation.
    fn name(&self) -> &'static str;

    /// Protocol version sent in the handshake.
    fn version(&self) -> u32 {
        1
    }

    /// The transfer format this encoding requires from the transport.
    fn transfer_format(&self) -> TransferFormat;

    /// Encodes one message, including its framing.
    fn write_message(&self, message: &HubMessage) -> Result<Vec<u8>, ProtocolError>;

    /// Appends a transport frame to `buffer` and drains every complete
    /// record from it.
    fn parse_frames(
        &self,
        buffer: &mut Vec<u8>,
        data: &[u8],
    ) -> Vec<Result<HubMessage, ProtocolError>>;
}

/// Looks up a protocol implementation by its negotiated name.
pub fn protocol_by_name(name: &str) -> Option<Box<dyn HubProtocol>> {
    match name {
        JsonProtocol::NAME => Some(Box::new(JsonProtocol)),
        MessagePackProtocol::NAME => Some(Box::new(MessagePackProtocol)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_lookup() {
        assert_eq!(protocol_by_name("json").unwrap().name(), "json");
        assert_eq!(
            protocol_by_name("messagepack").unwrap().transfer_format(),
            TransferFormat::Binary
        );
        assert!(protocol_by_name("cbor").is_none());
    }

    #[test]
    fn transfer_format_names() {
        assert_eq!(TransferFormat::Text.as_str(), "Text");
        assert_eq!(TransferFormat::Binary.as_str(), "Binary");
    }
}
