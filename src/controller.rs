//! Composition root for one chat screen.
//!
//! `ChatController` wires the pieces together: it folds the transport's
//! event stream into the timeline and a connection-status indicator, and
//! maps user input and capture results into the right message kind before
//! handing them to the timeline.  Composition is refused while the session
//! is not connected.

use tokio::sync::{mpsc, watch};

use crate::capture::{AttachmentCapture, CaptureError, DeviceBackend, PhotoSource};
use crate::logging;
use crate::message::{Draft, MessageError, MessageId};
use crate::rlog;
use crate::timeline::{ChatTimeline, RetryError};
use crate::transport::{EnvelopeTransport, TransportEvent};

/// Connection status for the UI's indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "Connecting",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Disconnected => "Disconnected",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposeError {
    /// Composition is disabled while the session is not connected.
    NotConnected,
    Message(MessageError),
    Capture(CaptureError),
}

impl std::fmt::Display for ComposeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComposeError::NotConnected => write!(f, "session is not connected"),
            ComposeError::Message(error) => write!(f, "{error}"),
            ComposeError::Capture(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for ComposeError {}

impl From<MessageError> for ComposeError {
    fn from(error: MessageError) -> Self {
        ComposeError::Message(error)
    }
}

impl From<CaptureError> for ComposeError {
    fn from(error: CaptureError) -> Self {
        ComposeError::Capture(error)
    }
}

pub struct ChatController<D: DeviceBackend, T: EnvelopeTransport> {
    capture: AttachmentCapture<D>,
    timeline: ChatTimeline,
    transport: T,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl<D: DeviceBackend, T: EnvelopeTransport> ChatController<D, T> {
    pub fn new(capture: AttachmentCapture<D>, timeline: ChatTimeline, transport: T) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Connecting);
        Self {
            capture,
            timeline,
            transport,
            status_tx,
        }
    }

    pub fn timeline(&self) -> &ChatTimeline {
        &self.timeline
    }

    /// Watch the UI-facing connection status.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Whether message composition is currently allowed.
    pub fn can_compose(&self) -> bool {
        self.transport.is_connected()
    }

    fn ensure_connected(&self) -> Result<(), ComposeError> {
        if self.transport.is_connected() {
            Ok(())
        } else {
            Err(ComposeError::NotConnected)
        }
    }

    /// Send a plain text message.
    pub async fn send_text(&mut self, text: &str) -> Result<MessageId, ComposeError> {
        self.ensure_connected()?;
        let draft = Draft::text(text)?;
        Ok(self.timeline.send(draft, &self.transport).await)
    }

    /// Capture a photo from the given source and send it.
    pub async fn send_photo(&mut self, source: PhotoSource) -> Result<MessageId, ComposeError> {
        self.ensure_connected()?;
        let photo = self.capture.capture_photo(source).await?;
        let draft = Draft::image(photo.resource, None);
        Ok(self.timeline.send(draft, &self.transport).await)
    }

    /// Capture the current location and share it.  The reverse-geocoded
    /// address becomes the display string when one resolved.
    pub async fn share_location(&mut self) -> Result<MessageId, ComposeError> {
        self.ensure_connected()?;
        let location = self.capture.capture_location().await?;
        let draft = Draft::location(location.latitude, location.longitude, location.address);
        Ok(self.timeline.send(draft, &self.transport).await)
    }

    /// Begin recording a voice message.
    pub async fn start_voice_message(&mut self) -> Result<(), ComposeError> {
        self.ensure_connected()?;
        Ok(self.capture.start_audio_recording().await?)
    }

    /// Finish the active recording and send it.  The recording handle is
    /// released even when the session dropped mid-recording.
    pub async fn finish_voice_message(&mut self) -> Result<MessageId, ComposeError> {
        let audio = self.capture.stop_audio_recording().await?;
        self.ensure_connected()?;
        let draft = Draft::audio(audio.resource, None);
        Ok(self.timeline.send(draft, &self.transport).await)
    }

    /// Discard an in-progress recording without sending anything.
    pub async fn cancel_voice_message(&mut self) -> Result<(), ComposeError> {
        Ok(self.capture.cancel_recording().await?)
    }

    /// Retry a failed message under its original id.
    pub async fn retry(&mut self, id: &MessageId) -> Result<(), RetryError> {
        self.timeline.retry(id, &self.transport).await
    }

    /// Fold one transport event into timeline and status.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { user_id, .. } => {
                rlog!("chat ready for {}", logging::user_id(&user_id));
                let _ = self.status_tx.send(ConnectionStatus::Connected);
            }
            TransportEvent::Disconnected { reason, will_retry } => {
                rlog!("chat offline: {reason}");
                let status = if will_retry {
                    ConnectionStatus::Connecting
                } else {
                    ConnectionStatus::Disconnected
                };
                let _ = self.status_tx.send(status);
            }
            TransportEvent::Message(envelope) => self.timeline.on_incoming(envelope),
            TransportEvent::Error(message) => {
                rlog!("session error: {message}");
            }
        }
    }

    /// Drive the event loop until the transport's stream ends.  Events are
    /// processed one at a time, to completion, in arrival order.
    pub async fn run(&mut self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        // Stream end means the transport task is gone for good.
        let _ = self.status_tx.send(ConnectionStatus::Disconnected);
    }
}
