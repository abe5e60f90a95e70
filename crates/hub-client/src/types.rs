//! Public types for the hub client.

use std::time::Duration;

use hubmesh_protocol::Location;
use hubmesh_protocol::constants::DEFAULT_RESPONSE_TIMEOUT;

/// Lifecycle state of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport handle exists.
    Stopped,
    /// Transport created, waiting for readiness and the ONLINE handshake.
    Connecting,
    /// Online handshake acknowledged.
    Online,
    /// Transport lost the connection and is reconnecting.
    Reconnecting,
}

/// Diagnostics emitted by a session.
///
/// Background work (resync, inbound dispatch) has no caller to return an
/// error to, so its failures are reported here.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Session state changed.
    StateChanged(SessionState),
    /// Resync after a reconnect finished; `republished` selectors re-announced.
    Resynced { republished: usize },
    /// Resync after a reconnect stopped early.
    ResyncFailed { reason: String },
    /// Replying to a MESSAGE_DOWN failed.
    DispatchFailed { reason: String },
}

/// Configuration for automatic reconnection with exponential backoff.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
    /// Give up after this many failed attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Calculates the delay for a given attempt number (1-based),
    /// with ±25% jitter to avoid thundering herd.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        let jitter = capped * 0.25;
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / u32::MAX as f64)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        let with_jitter = (capped + jitter * offset).max(0.05);
        Duration::from_secs_f64(with_jitter)
    }

    /// Returns `true` once `attempt` failed attempts exhaust the budget.
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identity attached to every outbound envelope.
    pub location: Location,
    /// Window every correlated request waits for its reply.
    pub response_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            location: Location::random(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}
