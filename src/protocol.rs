//! Wire protocol: message envelopes and socket frames.
//!
//! The messaging server is a JSON-over-websocket service with camelCase
//! field names.  Every frame is a JSON object carrying an `event` tag:
//!
//! - client → server: `join` (once, after connect), `message`
//! - server → client: `welcome` (handshake resolution), `message`, `error`
//!
//! Decoding is forward-compatible: an unknown envelope `kind` becomes
//! [`MessageKind::Other`] and renders through its `text`, and an unknown
//! `event` is skipped, never an error for the pipeline.

use serde::{Deserialize, Serialize};

use crate::message::{DeliveryState, Message, MessageId, MessageKind, ResourceRef};

pub const KIND_TEXT: &str = "text";
pub const KIND_IMAGE: &str = "image";
pub const KIND_LOCATION: &str = "location";
pub const KIND_AUDIO: &str = "audio";

/// Wire-level representation of a [`Message`], both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEnvelope {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    pub kind: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub resource_url: Option<String>,
}

#[derive(Debug)]
pub enum ProtocolError {
    Json(serde_json::Error),
    MissingEvent,
    MissingField(&'static str),
    EmptyId,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Json(error) => write!(f, "json error: {error}"),
            ProtocolError::MissingEvent => write!(f, "frame has no event field"),
            ProtocolError::MissingField(field) => {
                write!(f, "envelope is missing required field {field}")
            }
            ProtocolError::EmptyId => write!(f, "envelope id or sender is empty"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<serde_json::Error> for ProtocolError {
    fn from(error: serde_json::Error) -> Self {
        ProtocolError::Json(error)
    }
}

impl ChatEnvelope {
    pub fn from_message(message: &Message) -> Self {
        let mut envelope = Self {
            id: message.id.0.clone(),
            sender_id: message.sender_id.clone(),
            sender_name: message.sender_name.clone(),
            created_at: message.created_at,
            kind: KIND_TEXT.to_string(),
            text: message.text.clone(),
            latitude: None,
            longitude: None,
            address: None,
            resource_url: None,
        };
        match &message.kind {
            MessageKind::Text => {}
            MessageKind::Image { resource } => {
                envelope.kind = KIND_IMAGE.to_string();
                envelope.resource_url = Some(resource.uri().to_string());
            }
            MessageKind::Location {
                latitude,
                longitude,
            } => {
                envelope.kind = KIND_LOCATION.to_string();
                envelope.latitude = Some(*latitude);
                envelope.longitude = Some(*longitude);
                envelope.address = Some(message.text.clone());
            }
            MessageKind::Audio { resource } => {
                envelope.kind = KIND_AUDIO.to_string();
                envelope.resource_url = Some(resource.uri().to_string());
            }
            MessageKind::Other { kind } => {
                envelope.kind = kind.clone();
            }
        }
        envelope
    }

    /// Validate and convert an inbound envelope into a confirmed message.
    ///
    /// Unknown kinds decode to [`MessageKind::Other`]; missing fields that a
    /// known kind requires are a [`ProtocolError`] and the envelope is
    /// dropped by the caller.
    pub fn into_message(self) -> Result<Message, ProtocolError> {
        if self.id.is_empty() || self.sender_id.is_empty() {
            return Err(ProtocolError::EmptyId);
        }
        let kind = match self.kind.as_str() {
            KIND_TEXT => MessageKind::Text,
            KIND_IMAGE => MessageKind::Image {
                resource: ResourceRef::from_uri(
                    self.resource_url
                        .ok_or(ProtocolError::MissingField("resourceUrl"))?,
                ),
            },
            KIND_LOCATION => MessageKind::Location {
                latitude: self
                    .latitude
                    .ok_or(ProtocolError::MissingField("latitude"))?,
                longitude: self
                    .longitude
                    .ok_or(ProtocolError::MissingField("longitude"))?,
            },
            KIND_AUDIO => MessageKind::Audio {
                resource: ResourceRef::from_uri(
                    self.resource_url
                        .ok_or(ProtocolError::MissingField("resourceUrl"))?,
                ),
            },
            other => MessageKind::Other {
                kind: other.to_string(),
            },
        };
        Ok(Message {
            id: MessageId(self.id),
            sender_id: self.sender_id,
            sender_name: self.sender_name,
            created_at: self.created_at,
            text: self.text,
            kind,
            delivery: DeliveryState::Confirmed,
        })
    }
}

/// Frames this client sends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Establish presence in the room after a successful handshake.
    Join { username: String },
    Message { payload: ChatEnvelope },
}

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Welcome { user_id: String, username: String },
    Message(ChatEnvelope),
    Error { message: String },
}

/// Decode a server frame from websocket text.
///
/// Returns `Ok(None)` for events this client does not know, so a newer
/// server never breaks an older client.
pub fn decode_server_frame(text: &str) -> Result<Option<ServerFrame>, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let event = value
        .get("event")
        .and_then(|e| e.as_str())
        .ok_or(ProtocolError::MissingEvent)?;
    match event {
        "welcome" => {
            let user_id = value
                .get("userId")
                .and_then(|v| v.as_str())
                .ok_or(ProtocolError::MissingField("userId"))?
                .to_string();
            let username = value
                .get("username")
                .and_then(|v| v.as_str())
                .ok_or(ProtocolError::MissingField("username"))?
                .to_string();
            Ok(Some(ServerFrame::Welcome { user_id, username }))
        }
        "message" => {
            let payload = value
                .get("payload")
                .cloned()
                .ok_or(ProtocolError::MissingField("payload"))?;
            let envelope: ChatEnvelope = serde_json::from_value(payload)?;
            Ok(Some(ServerFrame::Message(envelope)))
        }
        "error" => {
            let message = value
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("unspecified server error")
                .to_string();
            Ok(Some(ServerFrame::Error { message }))
        }
        _ => Ok(None),
    }
}

pub fn encode_client_frame(frame: &ClientFrame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}
