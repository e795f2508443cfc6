//! Chat message model: tagged message kinds, identity, and ordering.
//!
//! A [`Message`] is immutable once composed except for its
//! [`DeliveryState`], which the timeline advances as the server confirms or
//! rejects it.  `text` lives on the struct rather than inside the kind
//! variants so renderers always have a display string without branching on
//! the kind.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Upper bound on composed text length, in characters.
pub const MAX_TEXT_LEN: usize = 1000;

/// Default captions for attachment messages composed without one.
pub const LOCATION_CAPTION: &str = "Shared Location";
pub const PHOTO_CAPTION: &str = "Photo";
pub const VOICE_CAPTION: &str = "Voice message";

/// Reserved sender identity for session bookkeeping traffic; never shown
/// in the visible timeline.
pub const SYSTEM_SENDER_ID: &str = "system";

/// A message identifier.
///
/// Locally authored messages derive their id from the sender, the compose
/// timestamp, and a random salt, hashed and encoded as URL-safe base64
/// without padding.  Inbound messages carry the server's id verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a fresh client-side id for a locally authored message.
    pub fn generate(sender_id: &str, created_at: u64) -> Self {
        let mut salt = [0u8; 16];
        OsRng.fill_bytes(&mut salt);
        let mut hasher = Sha256::new();
        hasher.update(sender_id.as_bytes());
        hasher.update(created_at.to_le_bytes());
        hasher.update(salt);
        MessageId(URL_SAFE_NO_PAD.encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a message stands between local composition and server confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Confirmed,
    Failed,
}

/// Opaque handle to a binary resource (image or audio), resolvable to
/// bytes by a collaborator outside this core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceRef {
    /// On-device resource: a filesystem path or `file://` URI.
    Local(String),
    /// Server-hosted resource, fetchable over HTTP(S).
    Remote(String),
}

impl ResourceRef {
    /// Classify a wire URI: HTTP(S) URLs are remote, anything else local.
    pub fn from_uri(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        if uri.starts_with("http://") || uri.starts_with("https://") {
            ResourceRef::Remote(uri)
        } else {
            ResourceRef::Local(uri)
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            ResourceRef::Local(uri) | ResourceRef::Remote(uri) => uri,
        }
    }

    /// Whether the handle points at something fetchable right now.  A
    /// message with an unresolvable resource is not yet renderable.
    pub fn is_resolvable(&self) -> bool {
        match self {
            ResourceRef::Remote(_) => true,
            ResourceRef::Local(uri) => {
                let path = uri.strip_prefix("file://").unwrap_or(uri);
                Path::new(path).exists()
            }
        }
    }
}

/// The tagged payload of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Text,
    Image { resource: ResourceRef },
    Location { latitude: f64, longitude: f64 },
    Audio { resource: ResourceRef },
    /// Forward-compatible fallback: a kind this client does not know.
    /// Rendered through `text` like any other message.
    Other { kind: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    EmptyText,
    TextTooLong { len: usize },
}

impl std::fmt::Display for MessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageError::EmptyText => write!(f, "message text is empty"),
            MessageError::TextTooLong { len } => {
                write!(f, "message text is {len} chars (max {MAX_TEXT_LEN})")
            }
        }
    }
}

impl std::error::Error for MessageError {}

/// A locally composed message before the timeline assigns identity and
/// delivery state.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub text: String,
    pub kind: MessageKind,
}

impl Draft {
    /// A plain text message.  Leading/trailing whitespace is trimmed; the
    /// result must be 1..=[`MAX_TEXT_LEN`] characters.
    pub fn text(text: &str) -> Result<Self, MessageError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MessageError::EmptyText);
        }
        let len = text.chars().count();
        if len > MAX_TEXT_LEN {
            return Err(MessageError::TextTooLong { len });
        }
        Ok(Self {
            text: text.to_string(),
            kind: MessageKind::Text,
        })
    }

    pub fn image(resource: ResourceRef, caption: Option<String>) -> Self {
        Self {
            text: caption.unwrap_or_else(|| PHOTO_CAPTION.to_string()),
            kind: MessageKind::Image { resource },
        }
    }

    /// A shared location.  The address, when reverse geocoding resolved
    /// one, becomes the display string; otherwise the default caption.
    pub fn location(latitude: f64, longitude: f64, address: Option<String>) -> Self {
        Self {
            text: address.unwrap_or_else(|| LOCATION_CAPTION.to_string()),
            kind: MessageKind::Location {
                latitude,
                longitude,
            },
        }
    }

    pub fn audio(resource: ResourceRef, caption: Option<String>) -> Self {
        Self {
            text: caption.unwrap_or_else(|| VOICE_CAPTION.to_string()),
            kind: MessageKind::Audio { resource },
        }
    }
}

/// One chat message, local or remote.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: String,
    pub sender_name: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Display string; always present regardless of kind.
    pub text: String,
    pub kind: MessageKind,
    pub delivery: DeliveryState,
}

impl Message {
    /// Turn a draft into a pending local message with a fresh id and the
    /// current wall-clock timestamp.
    pub fn compose(draft: Draft, sender_id: &str, sender_name: &str) -> Self {
        let created_at = now_millis();
        Self {
            id: MessageId::generate(sender_id, created_at),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            created_at,
            text: draft.text,
            kind: draft.kind,
            delivery: DeliveryState::Pending,
        }
    }

    pub fn is_system(&self) -> bool {
        self.sender_id == SYSTEM_SENDER_ID
    }
}

/// Position at which a message with `created_at` inserts into a timeline
/// already sorted by `created_at`.  Ties land after existing entries, so
/// insertion order breaks them.
pub fn insertion_index(messages: &[Message], created_at: u64) -> usize {
    messages.partition_point(|m| m.created_at <= created_at)
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_text_trims_and_bounds() {
        assert_eq!(Draft::text("  hello  ").unwrap().text, "hello");
        assert_eq!(Draft::text("   "), Err(MessageError::EmptyText));
        let long = "x".repeat(MAX_TEXT_LEN + 1);
        assert!(matches!(
            Draft::text(&long),
            Err(MessageError::TextTooLong { .. })
        ));
    }

    #[test]
    fn generated_ids_are_unique_per_call() {
        let a = MessageId::generate("u1", 42);
        let b = MessageId::generate("u1", 42);
        assert_ne!(a, b);
    }

    #[test]
    fn location_draft_falls_back_to_default_caption() {
        let draft = Draft::location(59.33, 18.07, None);
        assert_eq!(draft.text, LOCATION_CAPTION);
        let draft = Draft::location(59.33, 18.07, Some("Main St 1".into()));
        assert_eq!(draft.text, "Main St 1");
    }

    #[test]
    fn resource_ref_classifies_uris() {
        assert!(matches!(
            ResourceRef::from_uri("https://cdn.example.com/a.jpg"),
            ResourceRef::Remote(_)
        ));
        assert!(matches!(
            ResourceRef::from_uri("file:///tmp/a.jpg"),
            ResourceRef::Local(_)
        ));
        assert!(ResourceRef::from_uri("https://cdn.example.com/a.jpg").is_resolvable());
    }
}
