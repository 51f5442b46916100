//! Connection handshake.
//!
//! The handshake is exchanged once, immediately after transport connect and
//! before any hub message. Both sides of it are JSON terminated by the
//! record separator regardless of the negotiated message protocol, and the
//! response must be fully consumed before hub message parsing begins.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::json::RECORD_SEPARATOR;

/// Client request selecting the message protocol and its version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

impl HandshakeRequest {
    pub fn new(protocol: impl Into<String>, version: u32) -> Self {
        Self {
            protocol: protocol.into(),
            version,
        }
    }
}

/// Server response; an empty object means the handshake was accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Encodes a handshake request as a record-separator-terminated JSON record.
pub fn write_handshake_request(request: &HandshakeRequest) -> Result<Vec<u8>, ProtocolError> {
    let mut out = serde_json::to_vec(request)?;
    out.push(RECORD_SEPARATOR);
    Ok(out)
}

/// Feeds one transport frame into the handshake buffer.
///
/// Returns `Ok(None)` while the response record is still incomplete. Once
/// the record separator arrives, returns the parsed response together with
/// any bytes that followed it in the same frame (already-queued hub
/// messages). A record that cannot be parsed is fatal.
pub fn parse_handshake_response(
    buffer: &mut Vec<u8>,
    data: &[u8],
) -> Result<Option<(HandshakeResponse, Vec<u8>)>, ProtocolError> {
    buffer.extend_from_slice(data);
    let Some(pos) = buffer.iter().position(|&b| b == RECORD_SEPARATOR) else {
        return Ok(None);
    };
    let rest = buffer.split_off(pos + 1);
    buffer.pop();
    let response: HandshakeResponse = serde_json::from_slice(buffer)
        .map_err(|e| ProtocolError::InvalidHandshake(e.to_string()))?;
    buffer.clear();
    Ok(Some((response, rest)))
}
