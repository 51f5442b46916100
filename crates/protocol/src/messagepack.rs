//! MessagePack hub protocol.
//!
//! Each message is a MessagePack array prefixed with its byte length as a
//! 7-bit variable-length integer (little-endian groups, high bit set on all
//! but the last byte). Array layouts:
//!
//! - Invocation:       `[1, invocationId|nil, target, [arguments], [streamIds]]`
//! - StreamItem:       `[2, invocationId, item]`
//! - Completion:       `[3, invocationId, result|nil, error|nil]`
//! - StreamInvocation: `[4, invocationId, target, [arguments], [streamIds]]`
//! - CancelInvocation: `[5, invocationId]`
//! - Ping:             `[6]`
//! - Close:            `[7, error|nil, allowReconnect]`

use serde_json::Value;

use crate::error::ProtocolError;
use crate::messages::{self, HubMessage};
use crate::{HubProtocol, TransferFormat};

/// Maximum number of bytes in a length prefix (caps records at 2^35-1 bytes).
const MAX_PREFIX_LEN: usize = 5;

/// The MessagePack hub protocol (`"messagepack"`, binary transfer format).
#[derive(Debug, Default, Clone, Copy)]
pub struct MessagePackProtocol;

impl MessagePackProtocol {
    pub const NAME: &'static str = "messagepack";
}

impl HubProtocol for MessagePackProtocol {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn transfer_format(&self) -> TransferFormat {
        TransferFormat::Binary
    }

    fn write_message(&self, message: &HubMessage) -> Result<Vec<u8>, ProtocolError> {
        let body = encode_body(message)?;
        let mut out = Vec::with_capacity(body.len() + MAX_PREFIX_LEN);
        write_varint(body.len() as u64, &mut out);
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn parse_frames(
        &self,
        buffer: &mut Vec<u8>,
        data: &[u8],
    ) -> Vec<Result<HubMessage, ProtocolError>> {
        buffer.extend_from_slice(data);
        let mut parsed = Vec::new();
        loop {
            let Some((len, prefix_len)) = read_varint(buffer) else {
                // Incomplete or over-long prefix. An over-long prefix can
                // never complete, so fail the record rather than stall.
                if buffer.len() >= MAX_PREFIX_LEN {
                    buffer.clear();
                    parsed.push(Err(ProtocolError::malformed(
                        "frame",
                        "length prefix exceeds 5 bytes",
                    )));
                }
                break;
            };
            let total = prefix_len + len as usize;
            if buffer.len() < total {
                break;
            }
            let record: Vec<u8> = buffer.drain(..total).skip(prefix_len).collect();
            parsed.push(decode_body(&record));
        }
        parsed
    }
}

fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Reads a length prefix from the head of `buf`. Returns `(value, bytes
/// consumed)`, or `None` if the prefix is incomplete.
fn read_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in buf.iter().take(MAX_PREFIX_LEN).enumerate() {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

fn encode_body(message: &HubMessage) -> Result<Vec<u8>, ProtocolError> {
    let elements: Vec<Value> = match message {
        HubMessage::Invocation {
            invocation_id,
            target,
            arguments,
            stream_ids,
        } => vec![
            messages::INVOCATION.into(),
            opt_string(invocation_id),
            target.clone().into(),
            Value::Array(arguments.clone()),
            string_array(stream_ids),
        ],
        HubMessage::StreamItem {
            invocation_id,
            item,
        } => vec![
            messages::STREAM_ITEM.into(),
            invocation_id.clone().into(),
            item.clone(),
        ],
        HubMessage::Completion {
            invocation_id,
            result,
            error,
        } => vec![
            messages::COMPLETION.into(),
            invocation_id.clone().into(),
            result.clone().unwrap_or(Value::Null),
            opt_string(error),
        ],
        HubMessage::StreamInvocation {
            invocation_id,
            target,
            arguments,
            stream_ids,
        } => vec![
            messages::STREAM_INVOCATION.into(),
            invocation_id.clone().into(),
            target.clone().into(),
            Value::Array(arguments.clone()),
            string_array(stream_ids),
        ],
        HubMessage::CancelInvocation { invocation_id } => vec![
            messages::CANCEL_INVOCATION.into(),
            invocation_id.clone().into(),
        ],
        HubMessage::Ping => vec![messages::PING.into()],
        HubMessage::Close {
            error,
            allow_reconnect,
        } => vec![
            messages::CLOSE.into(),
            opt_string(error),
            (*allow_reconnect).into(),
        ],
    };
    let mut buf = Vec::new();
    rmp_serde::encode::write(&mut buf, &elements)?;
    Ok(buf)
}

fn decode_body(record: &[u8]) -> Result<HubMessage, ProtocolError> {
    let elements: Vec<Value> = rmp_serde::from_slice(record)?;
    let message_type = elements
        .first()
        .and_then(Value::as_u64)
        .ok_or_else(|| ProtocolError::malformed("frame", "missing message type"))?;

    match message_type {
        t if t == u64::from(messages::INVOCATION) => {
            expect_len(&elements, 5, "Invocation")?;
            Ok(HubMessage::Invocation {
                invocation_id: take_opt_string(&elements[1], "Invocation")?,
                target: take_string(&elements[2], "Invocation")?,
                arguments: take_array(&elements[3], "Invocation")?,
                stream_ids: take_string_array(&elements[4], "Invocation")?,
            })
        }
        t if t == u64::from(messages::STREAM_ITEM) => {
            expect_len(&elements, 3, "StreamItem")?;
            Ok(HubMessage::StreamItem {
                invocation_id: take_string(&elements[1], "StreamItem")?,
                item: elements[2].clone(),
            })
        }
        t if t == u64::from(messages::COMPLETION) => {
            expect_len(&elements, 4, "Completion")?;
            let result = match &elements[2] {
                Value::Null => None,
                other => Some(other.clone()),
            };
            Ok(HubMessage::Completion {
                invocation_id: take_string(&elements[1], "Completion")?,
                result,
                error: take_opt_string(&elements[3], "Completion")?,
            })
        }
        t if t == u64::from(messages::STREAM_INVOCATION) => {
            expect_len(&elements, 5, "StreamInvocation")?;
            Ok(HubMessage::StreamInvocation {
                invocation_id: take_string(&elements[1], "StreamInvocation")?,
                target: take_string(&elements[2], "StreamInvocation")?,
                arguments: take_array(&elements[3], "StreamInvocation")?,
                stream_ids: take_string_array(&elements[4], "StreamInvocation")?,
            })
        }
        t if t == u64::from(messages::CANCEL_INVOCATION) => {
            expect_len(&elements, 2, "CancelInvocation")?;
            Ok(HubMessage::CancelInvocation {
                invocation_id: take_string(&elements[1], "CancelInvocation")?,
            })
        }
        t if t == u64::from(messages::PING) => Ok(HubMessage::Ping),
        t if t == u64::from(messages::CLOSE) => {
            expect_len(&elements, 3, "Close")?;
            Ok(HubMessage::Close {
                error: take_opt_string(&elements[1], "Close")?,
                allow_reconnect: elements[2].as_bool().unwrap_or(false),
            })
        }
        other => Err(ProtocolError::UnknownMessageType(other)),
    }
}

fn opt_string(value: &Option<String>) -> Value {
    value.clone().map_or(Value::Null, Value::String)
}

fn string_array(values: &[String]) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}

fn expect_len(
    elements: &[Value],
    expected: usize,
    kind: &'static str,
) -> Result<(), ProtocolError> {
    if elements.len() < expected {
        return Err(ProtocolError::malformed(
            kind,
            format!("expected {expected} elements, found {}", elements.len()),
        ));
    }
    Ok(())
}

fn take_string(value: &Value, kind: &'static str) -> Result<String, ProtocolError> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| ProtocolError::malformed(kind, "expected a string element"))
}

fn take_opt_string(value: &Value, kind: &'static str) -> Result<Option<String>, ProtocolError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        _ => Err(ProtocolError::malformed(
            kind,
            "expected a string or nil element",
        )),
    }
}

fn take_array(value: &Value, kind: &'static str) -> Result<Vec<Value>, ProtocolError> {
    value
        .as_array()
        .cloned()
        .ok_or_else(|| ProtocolError::malformed(kind, "expected an array element"))
}

fn take_string_array(value: &Value, kind: &'static str) -> Result<Vec<String>, ProtocolError> {
    take_array(value, kind)?
        .into_iter()
        .map(|v| match v {
            Value::String(s) => Ok(s),
            _ => Err(ProtocolError::malformed(kind, "expected string stream ids")),
        })
        .collect()
}
