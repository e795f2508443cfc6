use resq_chat::capture::{
    AttachmentCapture, CaptureError, DeviceBackend, Permission, PhotoSource, Position,
};
use resq_chat::controller::{ChatController, ComposeError, ConnectionStatus};
use resq_chat::message::{
    DeliveryState, MessageKind, ResourceRef, LOCATION_CAPTION, PHOTO_CAPTION, VOICE_CAPTION,
};
use resq_chat::protocol::{ChatEnvelope, KIND_TEXT};
use resq_chat::timeline::{ChatTimeline, NullTransport};
use resq_chat::transport::{DisconnectReason, TransportEvent};

/// Minimal device backend: everything granted, fixed results.
struct GrantAllDevice {
    address: Option<String>,
}

impl DeviceBackend for GrantAllDevice {
    async fn request_permission(&self, _permission: Permission) -> Result<bool, CaptureError> {
        Ok(true)
    }

    async fn capture_photo(&self, _source: PhotoSource) -> Result<ResourceRef, CaptureError> {
        Ok(ResourceRef::from_uri("file:///tmp/photo.jpg"))
    }

    async fn current_position(&self) -> Result<Position, CaptureError> {
        Ok(Position {
            latitude: 40.4168,
            longitude: -3.7038,
        })
    }

    async fn begin_recording(&self) -> Result<(), CaptureError> {
        Ok(())
    }

    async fn end_recording(&self) -> Result<ResourceRef, CaptureError> {
        Ok(ResourceRef::from_uri("file:///tmp/voice.m4a"))
    }

    async fn abort_recording(&self) -> Result<(), CaptureError> {
        Ok(())
    }

    async fn reverse_geocode(&self, _position: Position) -> Result<Option<String>, CaptureError> {
        Ok(self.address.clone())
    }
}

fn controller(
    transport: &NullTransport,
    address: Option<String>,
) -> ChatController<GrantAllDevice, &NullTransport> {
    ChatController::new(
        AttachmentCapture::new(GrantAllDevice { address }),
        ChatTimeline::new("u-local", "Maria"),
        transport,
    )
}

fn remote_envelope(id: &str, sender: &str, created_at: u64, text: &str) -> ChatEnvelope {
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

#[tokio::test]
async fn composition_is_disabled_while_not_connected() {
    let transport = NullTransport::disconnected();
    let mut controller = controller(&transport, None);

    assert!(!controller.can_compose());
    assert_eq!(
        controller.send_text("hello").await,
        Err(ComposeError::NotConnected)
    );
    assert_eq!(
        controller.share_location().await,
        Err(ComposeError::NotConnected)
    );
    assert!(controller.timeline().messages().is_empty());
}

#[tokio::test]
async fn lifecycle_events_drive_the_status_indicator() {
    let transport = NullTransport::disconnected();
    let mut controller = controller(&transport, None);
    let status = controller.status();
    assert_eq!(*status.borrow(), ConnectionStatus::Connecting);

    controller.handle_event(TransportEvent::Connected {
        user_id: "u-local".to_string(),
        username: "Maria".to_string(),
    });
    assert_eq!(*status.borrow(), ConnectionStatus::Connected);
    assert_eq!(status.borrow().as_str(), "Connected");

    controller.handle_event(TransportEvent::Disconnected {
        reason: DisconnectReason::LivenessTimeout,
        will_retry: true,
    });
    assert_eq!(*status.borrow(), ConnectionStatus::Connecting);

    controller.handle_event(TransportEvent::Disconnected {
        reason: DisconnectReason::RetriesExhausted,
        will_retry: false,
    });
    assert_eq!(*status.borrow(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn photo_capture_becomes_an_image_message() {
    let transport = NullTransport::connected();
    let mut controller = controller(&transport, None);

    let id = controller.send_photo(PhotoSource::Library).await.unwrap();
    let message = controller.timeline().get(&id).unwrap();
    assert_eq!(message.text, PHOTO_CAPTION);
    assert!(matches!(message.kind, MessageKind::Image { .. }));
    assert_eq!(message.delivery, DeliveryState::Pending);

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent[0].kind, "image");
    assert_eq!(sent[0].resource_url.as_deref(), Some("file:///tmp/photo.jpg"));
}

#[tokio::test]
async fn location_capture_becomes_a_location_message() {
    let transport = NullTransport::connected();
    let mut controller = controller(&transport, Some("Gran Via 1".to_string()));

    let id = controller.share_location().await.unwrap();
    let message = controller.timeline().get(&id).unwrap();
    assert_eq!(message.text, "Gran Via 1");
    assert!(matches!(
        message.kind,
        MessageKind::Location { latitude, .. } if latitude == 40.4168
    ));
}

#[tokio::test]
async fn location_without_address_uses_the_default_caption() {
    let transport = NullTransport::connected();
    let mut controller = controller(&transport, None);

    let id = controller.share_location().await.unwrap();
    assert_eq!(controller.timeline().get(&id).unwrap().text, LOCATION_CAPTION);
}

#[tokio::test]
async fn voice_message_round_trip() {
    let transport = NullTransport::connected();
    let mut controller = controller(&transport, None);

    controller.start_voice_message().await.unwrap();
    let id = controller.finish_voice_message().await.unwrap();

    let message = controller.timeline().get(&id).unwrap();
    assert_eq!(message.text, VOICE_CAPTION);
    assert!(matches!(message.kind, MessageKind::Audio { .. }));
}

#[tokio::test]
async fn recording_is_released_when_the_session_drops_mid_capture() {
    let transport = NullTransport::connected();
    let mut controller = controller(&transport, None);

    controller.start_voice_message().await.unwrap();
    transport.set_connected(false);

    // The send is refused, but the exclusive recording handle is released.
    assert_eq!(
        controller.finish_voice_message().await,
        Err(ComposeError::NotConnected)
    );
    transport.set_connected(true);
    controller.start_voice_message().await.unwrap();
    controller.cancel_voice_message().await.unwrap();
}

#[tokio::test]
async fn inbound_message_events_reach_the_timeline() {
    let transport = NullTransport::connected();
    let mut controller = controller(&transport, None);

    controller.handle_event(TransportEvent::Message(remote_envelope(
        "srv-1", "u-2", 10, "are you ok?",
    )));
    controller.handle_event(TransportEvent::Message(remote_envelope(
        "s-note", "system", 11, "u-2 joined",
    )));

    let messages = controller.timeline().messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "are you ok?");
    assert_eq!(messages[0].delivery, DeliveryState::Confirmed);
}
