//! Configuration for the chat session core.

use std::time::Duration;

/// Capacity of the timeline's broadcast event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long to wait for the server's welcome frame during the handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Reconnection behaviour after an unexpected connection drop.
///
/// Delays grow exponentially from `base_delay` (1s, 2s, 4s, ...) up to
/// `max_delay`.  After `max_attempts` consecutive failed connection
/// attempts the session transitions to `Failed(Unreachable)` and stops.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 6,
        }
    }
}

/// Connection settings for one chat session.
///
/// Settings can come from code or from environment variables; environment
/// values take precedence over the built-in defaults.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Websocket URL of the messaging server.
    pub server_url: String,
    pub reconnect: ReconnectPolicy,
    /// A connected link with no inbound traffic for this long is treated
    /// as dropped and enters reconnection.
    pub liveness_timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:5000".to_string(),
            reconnect: ReconnectPolicy::default(),
            liveness_timeout: Duration::from_secs(45),
        }
    }
}

impl ChatConfig {
    /// Build a config from the environment, falling back to defaults.
    ///
    /// Recognised variables: `RESQ_SERVER_URL`,
    /// `RESQ_RECONNECT_MAX_ATTEMPTS`, `RESQ_LIVENESS_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("RESQ_SERVER_URL") {
            config.server_url = url;
        }
        if let Some(attempts) = env_u64("RESQ_RECONNECT_MAX_ATTEMPTS") {
            config.reconnect.max_attempts = attempts as u32;
        }
        if let Some(secs) = env_u64("RESQ_LIVENESS_TIMEOUT_SECS") {
            config.liveness_timeout = Duration::from_secs(secs);
        }
        config
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
