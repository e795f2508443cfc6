//! Session transport: the persistent connection to the messaging server.
//!
//! [`SessionTransport`] owns one authenticated websocket session: the
//! handshake (bearer token in the `Authorization` header, never in the
//! URL), the `welcome`/`join` exchange, reconnection with exponential
//! backoff, and raw send/receive of [`ChatEnvelope`]s.  All inbound
//! activity is delivered on a single [`TransportEvent`] stream; connection
//! state is observable through a `watch` channel.
//!
//! The transport never retries a failed send on its own: only the caller
//! knows whether a duplicate-safe id exists for the envelope, so retry
//! policy belongs to the timeline.

use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::{ChatConfig, ReconnectPolicy, HANDSHAKE_TIMEOUT};
use crate::logging;
use crate::protocol::{
    decode_server_frame, encode_client_frame, ChatEnvelope, ClientFrame, ServerFrame,
};
use crate::rlog;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Identity material for one session.  Supplied once at construction and
/// immutable for the session's lifetime; a new login builds a new session.
#[derive(Clone)]
pub struct Credentials {
    pub auth_token: String,
    pub user_id: String,
    pub username: String,
}

// The token must never leak into logs or debug dumps.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("auth_token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .finish()
    }
}

/// Why a session can no longer be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The server rejected the handshake; a fresh token is required.
    Auth,
    /// Reconnection attempts are exhausted.
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed(FailureReason),
}

/// Why a connected link ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Clean, caller-requested close.
    Closed,
    ConnectionLost(String),
    /// No inbound traffic within the liveness timeout.
    LivenessTimeout,
    AuthRejected,
    RetriesExhausted,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Closed => write!(f, "closed"),
            DisconnectReason::ConnectionLost(detail) => {
                write!(f, "connection lost: {detail}")
            }
            DisconnectReason::LivenessTimeout => write!(f, "liveness timeout"),
            DisconnectReason::AuthRejected => write!(f, "authentication rejected"),
            DisconnectReason::RetriesExhausted => write!(f, "reconnect attempts exhausted"),
        }
    }
}

/// Everything the transport reports to its subscriber.
#[derive(Debug)]
pub enum TransportEvent {
    Connected {
        user_id: String,
        username: String,
    },
    Disconnected {
        reason: DisconnectReason,
        /// Whether the transport will attempt reconnection on its own.
        will_retry: bool,
    },
    Message(ChatEnvelope),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    NotConnected,
    /// The session is torn down; the send can never complete.
    Closed,
    Link(String),
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::NotConnected => write!(f, "session is not connected"),
            SendError::Closed => write!(f, "session is closed"),
            SendError::Link(detail) => write!(f, "send failed: {detail}"),
        }
    }
}

impl std::error::Error for SendError {}

/// The seam the timeline sends through; implemented by [`TransportHandle`]
/// and by test fakes.
#[allow(async_fn_in_trait)]
pub trait EnvelopeTransport {
    fn is_connected(&self) -> bool;
    async fn send(&self, envelope: ChatEnvelope) -> Result<(), SendError>;
}

impl<T: EnvelopeTransport> EnvelopeTransport for &T {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    async fn send(&self, envelope: ChatEnvelope) -> Result<(), SendError> {
        (**self).send(envelope).await
    }
}

enum Command {
    Send {
        envelope: ChatEnvelope,
        ack: oneshot::Sender<Result<(), SendError>>,
    },
    Close,
}

/// Cheap cloneable sending side of a session.
#[derive(Clone)]
pub struct TransportHandle {
    state_rx: watch::Receiver<SessionState>,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl EnvelopeTransport for TransportHandle {
    fn is_connected(&self) -> bool {
        *self.state_rx.borrow() == SessionState::Connected
    }

    /// Queue one envelope for transmission and wait for the write to be
    /// accepted by the link.  Valid only while connected.
    async fn send(&self, envelope: ChatEnvelope) -> Result<(), SendError> {
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send {
                envelope,
                ack: ack_tx,
            })
            .map_err(|_| SendError::Closed)?;
        ack_rx.await.map_err(|_| SendError::Closed)?
    }
}

/// One authenticated chat session.  The UI owns exactly one of these at a
/// time; dropping it tears the connection down.
pub struct SessionTransport {
    credentials: Credentials,
    state_rx: watch::Receiver<SessionState>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl SessionTransport {
    /// Construct the session and start connecting.  Returns the owned
    /// session handle and its single inbound event stream.
    pub fn connect(
        config: ChatConfig,
        credentials: Credentials,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(connection_loop(
            config,
            credentials.clone(),
            state_tx,
            cmd_rx,
            event_tx,
        ));
        (
            Self {
                credentials,
                state_rx,
                cmd_tx,
                task,
            },
            event_rx,
        )
    }

    pub fn user_id(&self) -> &str {
        &self.credentials.user_id
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Watch connection state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// A cloneable sending handle for the timeline.
    pub fn handle(&self) -> TransportHandle {
        TransportHandle {
            state_rx: self.state_rx.clone(),
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// Close the session cleanly.  Pending sends resolve to
    /// [`SendError::Closed`]; reconnection timers are cancelled.
    pub async fn close(mut self) {
        let _ = self.cmd_tx.send(Command::Close);
        if tokio::time::timeout(Duration::from_secs(2), &mut self.task)
            .await
            .is_err()
        {
            self.task.abort();
        }
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        // Teardown must not leave the loop or its timers running.
        self.task.abort();
    }
}

enum ConnectError {
    AuthRejected(String),
    Link(String),
}

enum ConnectionEnd {
    Closed,
    Dropped(DisconnectReason),
}

fn backoff_delay(policy: &ReconnectPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(exponent))
        .min(policy.max_delay)
}

async fn connection_loop(
    config: ChatConfig,
    credentials: Credentials,
    state_tx: watch::Sender<SessionState>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    // Consecutive failed connection attempts since the last working link.
    let mut attempt: u32 = 0;
    loop {
        let _ = state_tx.send(SessionState::Connecting);
        match open_session(&config, &credentials).await {
            Ok((stream, user_id, username)) => {
                attempt = 0;
                let _ = state_tx.send(SessionState::Connected);
                rlog!("session connected as {}", logging::user_id(&user_id));
                let _ = event_tx.send(TransportEvent::Connected { user_id, username });

                match drive_connected(stream, &mut cmd_rx, &event_tx, config.liveness_timeout)
                    .await
                {
                    ConnectionEnd::Closed => {
                        announce_closed(&state_tx, &event_tx);
                        return;
                    }
                    ConnectionEnd::Dropped(reason) => {
                        rlog!("session dropped: {reason}");
                        let _ = state_tx.send(SessionState::Reconnecting);
                        let _ = event_tx.send(TransportEvent::Disconnected {
                            reason,
                            will_retry: true,
                        });
                        attempt = 1;
                        let delay = backoff_delay(&config.reconnect, attempt);
                        if backoff_sleep(delay, &mut cmd_rx).await {
                            announce_closed(&state_tx, &event_tx);
                            return;
                        }
                    }
                }
            }
            Err(ConnectError::AuthRejected(detail)) => {
                // Fatal: a rejected token must never be retried silently.
                let _ = state_tx.send(SessionState::Failed(FailureReason::Auth));
                rlog!("session handshake rejected: {detail}");
                let _ = event_tx.send(TransportEvent::Error(format!(
                    "authentication rejected: {detail}"
                )));
                let _ = event_tx.send(TransportEvent::Disconnected {
                    reason: DisconnectReason::AuthRejected,
                    will_retry: false,
                });
                return;
            }
            Err(ConnectError::Link(detail)) => {
                attempt += 1;
                if attempt >= config.reconnect.max_attempts {
                    let _ = state_tx.send(SessionState::Failed(FailureReason::Unreachable));
                    rlog!("server unreachable after {attempt} attempt(s): {detail}");
                    let _ = event_tx.send(TransportEvent::Error(format!(
                        "server unreachable after {attempt} attempts"
                    )));
                    let _ = event_tx.send(TransportEvent::Disconnected {
                        reason: DisconnectReason::RetriesExhausted,
                        will_retry: false,
                    });
                    return;
                }
                let delay = backoff_delay(&config.reconnect, attempt);
                let _ = state_tx.send(SessionState::Reconnecting);
                rlog!(
                    "connect failed (attempt {attempt}, retry in {:.1}s): {detail}",
                    delay.as_secs_f64()
                );
                if backoff_sleep(delay, &mut cmd_rx).await {
                    announce_closed(&state_tx, &event_tx);
                    return;
                }
            }
        }
    }
}

/// Sleep out a reconnection delay while still honouring commands: a close
/// request cancels the timer, and sends are refused instead of queueing
/// into a future connection.  Returns true when the caller should stop.
async fn backoff_sleep(delay: Duration, cmd_rx: &mut mpsc::UnboundedReceiver<Command>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            command = cmd_rx.recv() => match command {
                Some(Command::Send { ack, .. }) => {
                    let _ = ack.send(Err(SendError::NotConnected));
                }
                Some(Command::Close) | None => return true,
            },
        }
    }
}

fn announce_closed(
    state_tx: &watch::Sender<SessionState>,
    event_tx: &mpsc::UnboundedSender<TransportEvent>,
) {
    let _ = state_tx.send(SessionState::Disconnected);
    let _ = event_tx.send(TransportEvent::Disconnected {
        reason: DisconnectReason::Closed,
        will_retry: false,
    });
    rlog!("session closed");
}

/// Open the websocket, authenticate, consume the `welcome` frame, and
/// announce presence with `join`.
async fn open_session(
    config: &ChatConfig,
    credentials: &Credentials,
) -> Result<(WsStream, String, String), ConnectError> {
    let mut request = config
        .server_url
        .as_str()
        .into_client_request()
        .map_err(|e| ConnectError::Link(format!("bad server url: {e}")))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", credentials.auth_token))
        .map_err(|e| ConnectError::Link(format!("bad token value: {e}")))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    let (mut stream, _response) = match connect_async(request).await {
        Ok(ok) => ok,
        Err(WsError::Http(response)) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(ConnectError::AuthRejected(format!("HTTP {status}")));
            }
            return Err(ConnectError::Link(format!("HTTP {status}")));
        }
        Err(err) => return Err(ConnectError::Link(err.to_string())),
    };

    let (user_id, username) = read_welcome(&mut stream).await?;

    let join = ClientFrame::Join {
        username: credentials.username.clone(),
    };
    let frame = encode_client_frame(&join).map_err(|e| ConnectError::Link(e.to_string()))?;
    stream
        .send(WsMessage::Text(frame))
        .await
        .map_err(|e| ConnectError::Link(format!("join failed: {e}")))?;

    Ok((stream, user_id, username))
}

/// Wait for the server to resolve the handshake to a session identity.
/// An `error` frame before `welcome` is an authentication rejection.
async fn read_welcome(stream: &mut WsStream) -> Result<(String, String), ConnectError> {
    let wait = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => match decode_server_frame(&text) {
                    Ok(Some(ServerFrame::Welcome { user_id, username })) => {
                        return Ok((user_id, username));
                    }
                    Ok(Some(ServerFrame::Error { message })) => {
                        return Err(ConnectError::AuthRejected(message));
                    }
                    Ok(_) | Err(_) => continue,
                },
                Ok(WsMessage::Close(_)) => {
                    return Err(ConnectError::Link(
                        "connection closed during handshake".to_string(),
                    ));
                }
                Ok(_) => continue,
                Err(err) => return Err(ConnectError::Link(err.to_string())),
            }
        }
        Err(ConnectError::Link(
            "connection ended before welcome".to_string(),
        ))
    });
    match wait.await {
        Ok(result) => result,
        Err(_) => Err(ConnectError::Link("handshake timed out".to_string())),
    }
}

/// Pump the connected link: outbound commands one way, inbound frames the
/// other, until the link ends or the caller closes the session.
async fn drive_connected(
    stream: WsStream,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    event_tx: &mpsc::UnboundedSender<TransportEvent>,
    liveness_timeout: Duration,
) -> ConnectionEnd {
    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(Command::Send { envelope, ack }) => {
                    let frame = match encode_client_frame(&ClientFrame::Message {
                        payload: envelope,
                    }) {
                        Ok(frame) => frame,
                        Err(err) => {
                            let _ = ack.send(Err(SendError::Link(err.to_string())));
                            continue;
                        }
                    };
                    match sink.send(WsMessage::Text(frame)).await {
                        Ok(()) => {
                            let _ = ack.send(Ok(()));
                        }
                        Err(err) => {
                            // The link is gone; the caller decides on retry.
                            let detail = err.to_string();
                            let _ = ack.send(Err(SendError::Link(detail.clone())));
                            return ConnectionEnd::Dropped(
                                DisconnectReason::ConnectionLost(detail),
                            );
                        }
                    }
                }
                Some(Command::Close) | None => {
                    let _ = sink.close().await;
                    return ConnectionEnd::Closed;
                }
            },
            inbound = tokio::time::timeout(liveness_timeout, source.next()) => match inbound {
                Err(_elapsed) => {
                    return ConnectionEnd::Dropped(DisconnectReason::LivenessTimeout);
                }
                Ok(None) => {
                    return ConnectionEnd::Dropped(DisconnectReason::ConnectionLost(
                        "connection closed".to_string(),
                    ));
                }
                Ok(Some(Ok(WsMessage::Text(text)))) => match decode_server_frame(&text) {
                    Ok(Some(ServerFrame::Message(envelope))) => {
                        let _ = event_tx.send(TransportEvent::Message(envelope));
                    }
                    Ok(Some(ServerFrame::Error { message })) => {
                        rlog!("server error: {message}");
                        let _ = event_tx.send(TransportEvent::Error(message));
                    }
                    // Duplicate welcome frames and unknown events are ignored.
                    Ok(Some(ServerFrame::Welcome { .. })) | Ok(None) => {}
                    Err(err) => {
                        rlog!("dropping malformed frame: {err}");
                    }
                },
                Ok(Some(Ok(WsMessage::Close(_)))) => {
                    return ConnectionEnd::Dropped(DisconnectReason::ConnectionLost(
                        "server closed the connection".to_string(),
                    ));
                }
                // Ping/pong and binary keepalive traffic count as liveness.
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(err))) => {
                    return ConnectionEnd::Dropped(DisconnectReason::ConnectionLost(
                        err.to_string(),
                    ));
                }
            },
        }
    }
}
