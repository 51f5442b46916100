fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use hublink_protocol::handshake::{
        HandshakeRequest, parse_handshake_response, write_handshake_request,
    };
    use hublink_protocol::{
        HubMessage, HubProtocol, JsonProtocol, MessagePackProtocol, protocol_by_name,
    };
    use serde_json::json;

    /// Parses one frame and expects exactly one well-formed record.
    fn parse_one(protocol: &dyn HubProtocol, frame: &[u8]) -> HubMessage {
        let mut buffer = Vec::new();
        let mut parsed = protocol.parse_frames(&mut buffer, frame);
        assert_eq!(parsed.len(), 1, "expected one record in {frame:?}");
        assert!(buffer.is_empty(), "left-over bytes after {frame:?}");
        parsed.remove(0).expect("record failed to parse")
    }

    fn round_trip(protocol: &dyn HubProtocol, message: &HubMessage) {
        let frame = protocol.write_message(message).unwrap();
        assert_eq!(
            &parse_one(protocol, &frame),
            message,
            "{} round trip failed for {message:?}",
            protocol.name()
        );
    }

    /// Message values covering every variant, with optional fields both
    /// absent and present.
    fn all_variants() -> Vec<HubMessage> {
        vec![
            HubMessage::Invocation {
                invocation_id: None,
                target: "Broadcast".into(),
                arguments: vec![json!("hello"), json!(7)],
                stream_ids: vec![],
            },
            HubMessage::Invocation {
                invocation_id: Some("1".into()),
                target: "Add".into(),
                arguments: vec![json!(2), json!(3)],
                stream_ids: vec![],
            },
            HubMessage::Invocation {
                invocation_id: Some("2".into()),
                target: "UploadWords".into(),
                arguments: vec![],
                stream_ids: vec!["3".into(), "4".into()],
            },
            HubMessage::StreamItem {
                invocation_id: "5".into(),
                item: json!({"nested": [1, 2, {"deep": true}]}),
            },
            HubMessage::Completion {
                invocation_id: "6".into(),
                result: None,
                error: None,
            },
            HubMessage::Completion {
                invocation_id: "6".into(),
                result: Some(json!(5)),
                error: None,
            },
            HubMessage::Completion {
                invocation_id: "6".into(),
                result: None,
                error: Some("remote failure".into()),
            },
            HubMessage::StreamInvocation {
                invocation_id: "7".into(),
                target: "Counter".into(),
                arguments: vec![json!(10), json!(500)],
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
        ]
    }

    // --- Golden frames (reference layouts) ---

    #[test]
    fn golden_handshake_request() {
        let bytes = write_handshake_request(&HandshakeRequest::new("json", 1)).unwrap();
        assert_eq!(&bytes, b"{\"protocol\":\"json\",\"version\":1}\x1e");
    }

    #[test]
    fn golden_handshake_success_response() {
        let mut buffer = Vec::new();
        let (response, rest) = parse_handshake_response(&mut buffer, b"{}\x1e")
            .unwrap()
            .expect("complete response");
        assert!(response.error.is_none());
        assert!(rest.is_empty());
    }

    #[test]
    fn golden_invocation_frame() {
        let frame = JsonProtocol
            .write_message(&HubMessage::Invocation {
                invocation_id: Some("1".into()),
                target: "Add".into(),
                arguments: vec![json!(2), json!(3)],
                stream_ids: vec![],
            })
            .unwrap();
        assert_eq!(
            frame,
            b"{\"type\":1,\"invocationId\":\"1\",\"target\":\"Add\",\"arguments\":[2,3]}\x1e"
                .to_vec()
        );
    }

    #[test]
    fn golden_completion_frame_resolves_to_five() {
        let message =
            parse_one(&JsonProtocol, b"{\"type\":3,\"invocationId\":\"1\",\"result\":5}\x1e");
        assert_eq!(
            message,
            HubMessage::Completion {
                invocation_id: "1".into(),
                result: Some(json!(5)),
                error: None,
            }
        );
    }

    #[test]
    fn golden_ping_frames() {
        assert_eq!(
            JsonProtocol.write_message(&HubMessage::Ping).unwrap(),
            b"{\"type\":6}\x1e".to_vec()
        );
        assert_eq!(
            MessagePackProtocol.write_message(&HubMessage::Ping).unwrap(),
            vec![0x02, 0x91, 0x06]
        );
    }

    #[test]
    fn golden_close_frame() {
        let message = parse_one(
            &JsonProtocol,
            b"{\"type\":7,\"error\":\"maintenance\",\"allowReconnect\":true}\x1e",
        );
        assert_eq!(
            message,
            HubMessage::Close {
                error: Some("maintenance".into()),
                allow_reconnect: true,
            }
        );
    }

    // --- Round trips across both encodings ---

    #[test]
    fn json_round_trips_every_variant() {
        for message in all_variants() {
            round_trip(&JsonProtocol, &message);
        }
    }

    #[test]
    fn messagepack_round_trips_every_variant() {
        for message in all_variants() {
            round_trip(&MessagePackProtocol, &message);
        }
    }

    // --- Framing boundaries ---

    #[test]
    fn json_messages_split_and_share_frames() {
        let ping = JsonProtocol.write_message(&HubMessage::Ping).unwrap();
        let completion = JsonProtocol
            .write_message(&HubMessage::Completion {
                invocation_id: "1".into(),
                result: Some(json!("done")),
                error: None,
            })
            .unwrap();

        // Two records in one frame, the second split at an arbitrary byte.
        let mut first_frame = ping.clone();
        first_frame.extend_from_slice(&completion[..5]);
        let second_frame = &completion[5..];

        let mut buffer = Vec::new();
        let parsed = JsonProtocol.parse_frames(&mut buffer, &first_frame);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].as_ref().unwrap(), &HubMessage::Ping);

        let parsed = JsonProtocol.parse_frames(&mut buffer, second_frame);
        assert_eq!(parsed.len(), 1);
        assert!(matches!(
            parsed[0].as_ref().unwrap(),
            HubMessage::Completion { invocation_id, .. } if invocation_id == "1"
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn handshake_response_reassembles_across_frames() {
        let mut buffer = Vec::new();
        assert!(
            parse_handshake_response(&mut buffer, b"{\"error\":\"ba")
                .unwrap()
                .is_none()
        );
        let (response, rest) = parse_handshake_response(&mut buffer, b"d proto\"}\x1e")
            .unwrap()
            .expect("complete after second frame");
        assert_eq!(response.error.as_deref(), Some("bad proto"));
        assert!(rest.is_empty());
    }

    #[test]
    fn handshake_response_keeps_queued_messages_intact() {
        let mut trailing = b"{}\x1e".to_vec();
        trailing.extend(JsonProtocol.write_message(&HubMessage::Ping).unwrap());
        let mut buffer = Vec::new();
        let (response, rest) = parse_handshake_response(&mut buffer, &trailing)
            .unwrap()
            .expect("complete response");
        assert!(response.error.is_none());
        assert_eq!(parse_one(&JsonProtocol, &rest), HubMessage::Ping);
    }

    #[test]
    fn messagepack_length_prefix_brackets_each_record() {
        let frame = MessagePackProtocol
            .write_message(&HubMessage::CancelInvocation {
                invocation_id: "7".into(),
            })
            .unwrap();
        // Single-byte varint prefix equal to the body length.
        assert_eq!(frame[0] as usize, frame.len() - 1);
    }

    // --- Protocol registry ---

    #[test]
    fn protocols_resolve_by_negotiated_name() {
        assert_eq!(protocol_by_name("json").unwrap().name(), "json");
        assert_eq!(
            protocol_by_name("messagepack").unwrap().name(),
            "messagepack"
        );
        assert!(protocol_by_name("unknown").is_none());
    }
}
