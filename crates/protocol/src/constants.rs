use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time to wait for a pong response (or any incoming frame).
///
/// This acts as a read deadline: if *nothing* arrives from the Hub within
/// this window the connection is considered dead and the transport starts
/// reconnecting.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often to send keepalive pings (must be well below [`WS_PONG_WAIT`]).
pub const WS_PING_PERIOD: Duration = Duration::from_secs(15);

/// Maximum frame size in bytes (16 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default window a correlated request waits for its reply.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Hub action identifier carried by every request envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    // Session handshakes
    Online,
    Offline,

    // Registry
    Publish,
    Unpublish,
    /// Whole snapshot when sent without a selector, filtered when sent with one.
    Discover,

    // Messaging
    /// Client to Hub: relay `data` to one (or every) client matching `remote`.
    MessageUp,
    /// Hub to client: a message relayed from another client.
    MessageDown,
}

impl Action {
    /// Returns the wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Online => "online",
            Action::Offline => "offline",
            Action::Publish => "publish",
            Action::Unpublish => "unpublish",
            Action::Discover => "discover",
            Action::MessageUp => "message_up",
            Action::MessageDown => "message_down",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
