use resq_chat::message::{DeliveryState, Draft, Message, MessageKind, LOCATION_CAPTION};
use resq_chat::protocol::{
    decode_server_frame, encode_client_frame, ChatEnvelope, ClientFrame, ProtocolError,
    ServerFrame, KIND_LOCATION, KIND_TEXT,
};

fn text_envelope(id: &str, sender: &str, created_at: u64, text: &str) -> ChatEnvelope {
    ChatEnvelope {
        id: id.to_string(),
        sender_id: sender.to_string(),
        sender_name: sender.to_string(),
        created_at,
        kind: KIND_TEXT.to_string(),
        text: text.to_string(),
        latitude: None,
        longitude: None,
        address: None,
        resource_url: None,
    }
}

#[test]
fn envelope_round_trips_a_location_message() {
    let draft = Draft::location(59.3293, 18.0686, None);
    let message = Message::compose(draft, "u-1", "Maria");
    let envelope = ChatEnvelope::from_message(&message);
    assert_eq!(envelope.kind, KIND_LOCATION);
    assert_eq!(envelope.latitude, Some(59.3293));
    assert_eq!(envelope.address.as_deref(), Some(LOCATION_CAPTION));

    let decoded = envelope.into_message().expect("decode location envelope");
    assert_eq!(decoded.text, LOCATION_CAPTION);
    assert_eq!(decoded.delivery, DeliveryState::Confirmed);
    assert!(matches!(decoded.kind, MessageKind::Location { .. }));
}

#[test]
fn envelope_serializes_camel_case_fields() {
    let draft = Draft::location(1.0, 2.0, Some("Main St 1".to_string()));
    let message = Message::compose(draft, "u-1", "Maria");
    let json = serde_json::to_value(ChatEnvelope::from_message(&message)).unwrap();
    assert!(json.get("senderId").is_some());
    assert!(json.get("senderName").is_some());
    assert!(json.get("createdAt").is_some());
    assert_eq!(json.get("address").and_then(|v| v.as_str()), Some("Main St 1"));
    // Fields of other kinds stay off the wire entirely.
    assert!(json.get("resourceUrl").is_none());
}

#[test]
fn unknown_kind_decodes_to_text_fallback() {
    let mut envelope = text_envelope("m1", "u-2", 10, "a sticker arrived");
    envelope.kind = "sticker".to_string();
    let message = envelope.into_message().expect("unknown kind must decode");
    assert_eq!(
        message.kind,
        MessageKind::Other {
            kind: "sticker".to_string()
        }
    );
    assert_eq!(message.text, "a sticker arrived");
}

#[test]
fn location_envelope_without_coordinates_is_malformed() {
    let mut envelope = text_envelope("m1", "u-2", 10, "Shared Location");
    envelope.kind = KIND_LOCATION.to_string();
    envelope.latitude = Some(1.0);
    // longitude missing
    assert!(matches!(
        envelope.into_message(),
        Err(ProtocolError::MissingField("longitude"))
    ));
}

#[test]
fn envelope_with_empty_id_is_malformed() {
    let envelope = text_envelope("", "u-2", 10, "hi");
    assert!(matches!(
        envelope.into_message(),
        Err(ProtocolError::EmptyId)
    ));
}

#[test]
fn join_frame_carries_the_event_tag() {
    let frame = encode_client_frame(&ClientFrame::Join {
        username: "Maria".to_string(),
    })
    .unwrap();
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value.get("event").and_then(|v| v.as_str()), Some("join"));
    assert_eq!(
        value.get("username").and_then(|v| v.as_str()),
        Some("Maria")
    );
}

#[test]
fn server_frames_decode_by_event() {
    let welcome =
        decode_server_frame(r#"{"event":"welcome","userId":"u-9","username":"Maria"}"#).unwrap();
    assert_eq!(
        welcome,
        Some(ServerFrame::Welcome {
            user_id: "u-9".to_string(),
            username: "Maria".to_string(),
        })
    );

    let message = decode_server_frame(
        r#"{"event":"message","payload":{"id":"m1","senderId":"u-2","senderName":"Ben","createdAt":5,"kind":"text","text":"hi"}}"#,
    )
    .unwrap();
    match message {
        Some(ServerFrame::Message(envelope)) => assert_eq!(envelope.id, "m1"),
        other => panic!("expected message frame, got {other:?}"),
    }

    let error = decode_server_frame(r#"{"event":"error","message":"room full"}"#).unwrap();
    assert_eq!(
        error,
        Some(ServerFrame::Error {
            message: "room full".to_string()
        })
    );
}

#[test]
fn unknown_events_are_ignored_not_errors() {
    let frame = decode_server_frame(r#"{"event":"typing","userId":"u-2"}"#).unwrap();
    assert_eq!(frame, None);
}

#[test]
fn frame_without_event_is_an_error() {
    assert!(matches!(
        decode_server_frame(r#"{"payload":{}}"#),
        Err(ProtocolError::MissingEvent)
    ));
    assert!(decode_server_frame("not json at all").is_err());
}
