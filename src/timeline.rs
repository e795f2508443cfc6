//! The ordered, deduplicated message timeline.
//!
//! `ChatTimeline` is the single source of truth for the message list a
//! chat screen renders.  Local sends are inserted optimistically as
//! `Pending` and reconciled in place when the server echoes them; inbound
//! messages from other parties are inserted in `createdAt` order.  A
//! locally authored message is never removed — it is always observably
//! Pending, Confirmed, or Failed.

use std::collections::HashSet;

use tokio::sync::broadcast;

use crate::config::EVENT_CHANNEL_CAPACITY;
use crate::logging;
use crate::message::{insertion_index, DeliveryState, Draft, Message, MessageId};
use crate::protocol::ChatEnvelope;
use crate::rlog;
use crate::transport::{EnvelopeTransport, SendError};

/// Timeline changes, broadcast to UI subscribers.
#[derive(Debug, Clone)]
pub enum TimelineEvent {
    Inserted(Message),
    Updated(Message),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    UnknownMessage(MessageId),
    /// Only `Failed` messages are retryable.
    NotFailed(MessageId),
}

impl std::fmt::Display for RetryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::UnknownMessage(id) => write!(f, "no message with id {id}"),
            RetryError::NotFailed(id) => write!(f, "message {id} is not in a failed state"),
        }
    }
}

impl std::error::Error for RetryError {}

pub struct ChatTimeline {
    user_id: String,
    username: String,
    messages: Vec<Message>,
    seen: HashSet<MessageId>,
    events_tx: broadcast::Sender<TimelineEvent>,
}

impl ChatTimeline {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            user_id: user_id.into(),
            username: username.into(),
            messages: Vec::new(),
            seen: HashSet::new(),
            events_tx,
        }
    }

    /// Snapshot of the visible timeline, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Subscribe to timeline changes.
    pub fn subscribe(&self) -> broadcast::Receiver<TimelineEvent> {
        self.events_tx.subscribe()
    }

    /// Compose and send a message: assign a client id, insert it as
    /// `Pending` immediately, then forward it to the transport.  A send
    /// failure marks the entry `Failed` in place; the user can retry or
    /// discard it explicitly.
    pub async fn send<T: EnvelopeTransport>(&mut self, draft: Draft, transport: &T) -> MessageId {
        let message = Message::compose(draft, &self.user_id, &self.username);
        let id = message.id.clone();
        let envelope = ChatEnvelope::from_message(&message);
        self.insert(message);
        if let Err(err) = transport.send(envelope).await {
            rlog!(
                "send failed for {}: {err}",
                logging::msg_id(id.as_str())
            );
            self.mark_failed(&id);
        }
        id
    }

    /// Re-submit a `Failed` message under its original id.  Safe to call
    /// repeatedly: a repeated server echo of the same id reconciles into
    /// the existing entry instead of duplicating it.
    pub async fn retry<T: EnvelopeTransport>(
        &mut self,
        id: &MessageId,
        transport: &T,
    ) -> Result<(), RetryError> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| &m.id == id)
            .ok_or_else(|| RetryError::UnknownMessage(id.clone()))?;
        if message.delivery != DeliveryState::Failed {
            return Err(RetryError::NotFailed(id.clone()));
        }
        message.delivery = DeliveryState::Pending;
        let envelope = ChatEnvelope::from_message(message);
        let updated = message.clone();
        let _ = self.events_tx.send(TimelineEvent::Updated(updated));
        if let Err(err) = transport.send(envelope).await {
            rlog!(
                "retry failed for {}: {err}",
                logging::msg_id(id.as_str())
            );
            self.mark_failed(id);
        }
        Ok(())
    }

    /// Fold one inbound envelope into the timeline.
    ///
    /// Assumes the server echoes client-generated ids verbatim: an echo of
    /// an id we already hold confirms that entry in place (adopting the
    /// server's canonical fields, position unchanged); an unknown id is a
    /// new message from another party, inserted in `createdAt` order.
    /// Bookkeeping traffic from the reserved system identity never enters
    /// the visible timeline, and a malformed envelope is dropped with a
    /// log line — it cannot crash the pipeline.
    pub fn on_incoming(&mut self, envelope: ChatEnvelope) {
        let message = match envelope.into_message() {
            Ok(message) => message,
            Err(err) => {
                rlog!("dropping malformed envelope: {err}");
                return;
            }
        };
        if message.is_system() {
            rlog!("session notice: {}", message.text);
            return;
        }
        if self.seen.contains(&message.id) {
            self.reconcile(message);
        } else {
            self.insert(message);
        }
    }

    /// Merge a server echo into the entry that already holds its id.
    fn reconcile(&mut self, incoming: Message) {
        let Some(existing) = self.messages.iter_mut().find(|m| m.id == incoming.id) else {
            return;
        };
        existing.delivery = DeliveryState::Confirmed;
        // Server-populated fields are canonical; position stays put.
        existing.created_at = incoming.created_at;
        existing.sender_name = incoming.sender_name;
        existing.text = incoming.text;
        let updated = existing.clone();
        let _ = self.events_tx.send(TimelineEvent::Updated(updated));
    }

    fn insert(&mut self, message: Message) {
        let at = insertion_index(&self.messages, message.created_at);
        self.seen.insert(message.id.clone());
        self.messages.insert(at, message.clone());
        let _ = self.events_tx.send(TimelineEvent::Inserted(message));
    }

    fn mark_failed(&mut self, id: &MessageId) {
        let Some(message) = self.messages.iter_mut().find(|m| &m.id == id) else {
            return;
        };
        message.delivery = DeliveryState::Failed;
        let updated = message.clone();
        let _ = self.events_tx.send(TimelineEvent::Updated(updated));
    }
}

/// A transport stand-in for tests and offline previews: records envelopes
/// instead of sending them, optionally failing every send.
#[derive(Debug, Default)]
pub struct NullTransport {
    connected: std::sync::atomic::AtomicBool,
    fail_sends: bool,
    pub sent: std::sync::Mutex<Vec<ChatEnvelope>>,
}

impl NullTransport {
    pub fn connected() -> Self {
        let transport = Self::default();
        transport.set_connected(true);
        transport
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    /// Connected, but every send fails at the link.
    pub fn failing() -> Self {
        let mut transport = Self::connected();
        transport.fail_sends = true;
        transport
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected
            .store(connected, std::sync::atomic::Ordering::SeqCst);
    }
}

impl EnvelopeTransport for NullTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn send(&self, envelope: ChatEnvelope) -> Result<(), SendError> {
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }
        if self.fail_sends {
            return Err(SendError::Link("simulated send failure".to_string()));
        }
        self.sent.lock().unwrap().push(envelope);
        Ok(())
    }
}
