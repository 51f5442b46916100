//! JSON hub protocol.
//!
//! Each message is a UTF-8 JSON object with a numeric `"type"` discriminator,
//! terminated by the ASCII record separator (0x1E). Several messages may
//! share one transport frame; a partial record at a frame boundary is
//! buffered and completed by the next frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::messages::{self, HubMessage};
use crate::{HubProtocol, TransferFormat};

/// The ASCII record separator terminating every text-encoded record.
pub const RECORD_SEPARATOR: u8 = 0x1e;

/// Flat wire representation shared by all message kinds. Fields not used by
/// a given `type` are absent on the wire.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(rename = "type")]
    message_type: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    stream_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    item: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allow_reconnect: Option<bool>,
}

impl WireMessage {
    fn into_message(self) -> Result<HubMessage, ProtocolError> {
        match self.message_type {
            messages::INVOCATION => Ok(HubMessage::Invocation {
                invocation_id: self.invocation_id,
                target: self
                    .target
                    .ok_or_else(|| ProtocolError::malformed("Invocation", "missing target"))?,
                arguments: self.arguments.unwrap_or_default(),
                stream_ids: self.stream_ids,
            }),
            messages::STREAM_ITEM => Ok(HubMessage::StreamItem {
                invocation_id: self.invocation_id.ok_or_else(|| {
                    ProtocolError::malformed("StreamItem", "missing invocationId")
                })?,
                item: self
                    .item
                    .ok_or_else(|| ProtocolError::malformed("StreamItem", "missing item"))?,
            }),
            messages::COMPLETION => {
                if self.result.is_some() && self.error.is_some() {
                    return Err(ProtocolError::malformed(
                        "Completion",
                        "both result and error present",
                    ));
                }
                Ok(HubMessage::Completion {
                    invocation_id: self.invocation_id.ok_or_else(|| {
                        ProtocolError::malformed("Completion", "missing invocationId")
                    })?,
                    result: self.result,
                    error: self.error,
                })
            }
            messages::STREAM_INVOCATION => Ok(HubMessage::StreamInvocation {
                invocation_id: self.invocation_id.ok_or_else(|| {
                    ProtocolError::malformed("StreamInvocation", "missing invocationId")
                })?,
                target: self.target.ok_or_else(|| {
                    ProtocolError::malformed("StreamInvocation", "missing target")
                })?,
                arguments: self.arguments.unwrap_or_default(),
                stream_ids: self.stream_ids,
            }),
            messages::CANCEL_INVOCATION => Ok(HubMessage::CancelInvocation {
                invocation_id: self.invocation_id.ok_or_else(|| {
                    ProtocolError::malformed("CancelInvocation", "missing invocationId")
                })?,
            }),
            messages::PING => Ok(HubMessage::Ping),
            messages::CLOSE => Ok(HubMessage::Close {
                error: self.error,
                allow_reconnect: self.allow_reconnect.unwrap_or(false),
            }),
            other => Err(ProtocolError::UnknownMessageType(u64::from(other))),
        }
    }

    fn from_message(message: &HubMessage) -> Self {
        let mut wire = WireMessage {
            message_type: message.message_type(),
            ..WireMessage::default()
        };
        match message {
            HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
                stream_ids,
            } => {
                wire.invocation_id = invocation_id.clone();
                wire.target = Some(target.clone());
                wire.arguments = Some(arguments.clone());
                wire.stream_ids = stream_ids.clone();
            }
            HubMessage::StreamItem {
                invocation_id,
                item,
            } => {
                wire.invocation_id = Some(invocation_id.clone());
                wire.item = Some(item.clone());
            }
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => {
                wire.invocation_id = Some(invocation_id.clone());
                wire.result = result.clone();
                wire.error = error.clone();
            }
            HubMessage::StreamInvocation {
                invocation_id,
                target,
                arguments,
                stream_ids,
            } => {
                wire.invocation_id = Some(invocation_id.clone());
                wire.target = Some(target.clone());
                wire.arguments = Some(arguments.clone());
                wire.stream_ids = stream_ids.clone();
            }
            HubMessage::CancelInvocation { invocation_id } => {
                wire.invocation_id = Some(invocation_id.clone());
            }
            HubMessage::Ping => {}
            HubMessage::Close {
                error,
                allow_reconnect,
            } => {
                wire.error = error.clone();
                if *allow_reconnect {
                    wire.allow_reconnect = Some(true);
                }
            }
        }
        wire
    }
}

/// The JSON hub protocol (`"json"`, text transfer format).
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonProtocol;

impl JsonProtocol {
    pub const NAME: &'static str = "json";
}

impl HubProtocol for JsonProtocol {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn transfer_format(&self) -> TransferFormat {
        TransferFormat::Text
    }

    fn write_message(&self, message: &HubMessage) -> Result<Vec<u8>, ProtocolError> {
        let mut out = serde_json::to_vec(&WireMessage::from_message(message))?;
        out.push(RECORD_SEPARATOR);
        Ok(out)
    }

    fn parse_frames(
        &self,
        buffer: &mut Vec<u8>,
        data: &[u8],
    ) -> Vec<Result<HubMessage, ProtocolError>> {
        buffer.extend_from_slice(data);
        let mut parsed = Vec::new();
        while let Some(pos) = buffer.iter().position(|&b| b == RECORD_SEPARATOR) {
            let record: Vec<u8> = buffer.drain(..=pos).take(pos).collect();
            parsed.push(parse_record(&record));
        }
        parsed
    }
}

fn parse_record(record: &[u8]) -> Result<HubMessage, ProtocolError> {
    let wire: WireMessage = serde_json::from_slice(record)?;
    wire.into_message()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(message: &HubMessage) -> Vec<u8> {
        JsonProtocol.write_message(message).unwrap()
    }

    fn parse_all(frames: &[&[u8]]) -> Vec<Result<HubMessage, ProtocolError>> {
        let mut buffer = Vec::new();
        let mut out = Vec::new();
        for frame in frames {
            out.extend(JsonProtocol.parse_frames(&mut buffer, frame));
        }
        out
    }

    #[test]
    fn invocation_wire_layout() {
        let message = HubMessage::Invocation {
            invocation_id: Some("1".into()),
            target: "Add".into(),
            arguments: vec![json!(2), json!(3)],
            stream_ids: vec![],
        };
        let bytes = encode(&message);
        assert_eq!(*bytes.last().unwrap(), RECORD_SEPARATOR);
        let text = std::str::from_utf8(&bytes[..bytes.len() - 1]).unwrap();
        let value: Value = serde_json::from_str(text).unwrap();
        assert_eq!(
            value,
            json!({"type": 1, "invocationId": "1", "target": "Add", "arguments": [2, 3]})
        );
    }

    #[test]
    fn ping_is_type_only() {
        let bytes = encode(&HubMessage::Ping);
        assert_eq!(&bytes, b"{\"type\":6}\x1e");
    }

    #[test]
    fn completion_omits_absent_result_and_error() {
        let bytes = encode(&HubMessage::completion_ok("9"));
        let text = std::str::from_utf8(&bytes[..bytes.len() - 1]).unwrap();
        assert!(!text.contains("result"));
        assert!(!text.contains("error"));
    }

    #[test]
    fn completion_with_result_resolves() {
        let parsed = parse_all(&[b"{\"type\":3,\"invocationId\":\"1\",\"result\":5}\x1e"]);
        assert_eq!(parsed.len(), 1);
        match parsed[0].as_ref().unwrap() {
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => {
                assert_eq!(invocation_id, "1");
                assert_eq!(result, &Some(json!(5)));
                assert!(error.is_none());
            }
            other => panic!("expected Completion, got {other:?}"),
        }
    }

    #[test]
    fn completion_with_both_result_and_error_is_malformed() {
        let parsed = parse_all(&[
            b"{\"type\":3,\"invocationId\":\"1\",\"result\":5,\"error\":\"no\"}\x1e",
        ]);
        assert!(matches!(
            parsed[0],
            Err(ProtocolError::Malformed { kind: "Completion", .. })
        ));
    }

    #[test]
    fn round_trip_all_variants() {
        let variants = vec![
            HubMessage::send("Notify", vec![json!("hi")]),
            HubMessage::Invocation {
                invocation_id: Some("4".into()),
                target: "Upload".into(),
                arguments: vec![],
                stream_ids: vec!["5".into(), "6".into()],
            },
            HubMessage::StreamItem {
                invocation_id: "2".into(),
                item: json!({"x": [1, 2]}),
            },
            HubMessage::completion_ok("3"),
            HubMessage::completion_error("3", "remote failure"),
            HubMessage::Completion {
                invocation_id: "3".into(),
                result: Some(json!([null, "a"])),
                error: None,
            },
            HubMessage::StreamInvocation {
                invocation_id: "7".into(),
                target: "Counter".into(),
                arguments: vec![json!(10)],
                stream_ids: vec![],
            },
            HubMessage::CancelInvocation {
                invocation_id: "7".into(),
            },
            HubMessage::Ping,
            HubMessage::Close {
                error: None,
                allow_reconnect: false,
            },
            HubMessage::Close {
                error: Some("shutting down".into()),
                allow_reconnect: true,
            },
        ];
        for message in variants {
            let bytes = encode(&message);
            let parsed = parse_all(&[&bytes]);
            assert_eq!(parsed.len(), 1, "{message:?}");
            assert_eq!(parsed[0].as_ref().unwrap(), &message);
        }
    }

    #[test]
    fn multiple_messages_in_one_frame() {
        let mut frame = encode(&HubMessage::Ping);
        frame.extend(encode(&HubMessage::completion_ok("1")));
        let parsed = parse_all(&[&frame]);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].as_ref().unwrap(), &HubMessage::Ping);
    }

    #[test]
    fn partial_record_buffered_across_frames() {
        let bytes = encode(&HubMessage::send("Echo", vec![json!("split")]));
        let (head, tail) = bytes.split_at(7);
        let mut buffer = Vec::new();
        assert!(JsonProtocol.parse_frames(&mut buffer, head).is_empty());
        let parsed = JsonProtocol.parse_frames(&mut buffer, tail);
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].is_ok());
        assert!(buffer.is_empty());
    }

    #[test]
    fn malformed_record_does_not_poison_following_records() {
        let mut frame = b"this is not json\x1e".to_vec();
        frame.extend(encode(&HubMessage::Ping));
        let parsed = parse_all(&[&frame]);
        assert_eq!(parsed.len(), 2);
        assert!(parsed[0].is_err());
        assert_eq!(parsed[1].as_ref().unwrap(), &HubMessage::Ping);
    }

    #[test]
    fn unknown_message_type_is_an_error() {
        let parsed = parse_all(&[b"{\"type\":99}\x1e"]);
        assert!(matches!(
            parsed[0],
            Err(ProtocolError::UnknownMessageType(99))
        ));
    }
}
