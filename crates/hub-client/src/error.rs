//! Error types for the hub client.

use std::time::Duration;

use hubmesh_protocol::{Action, Selector};

/// Connection-level failures surfaced by a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("connection closed")]
    Closed,

    /// The Hub could not be reached; carries the URL and the cause.
    #[error("connect failed: {0}")]
    Connect(String),
}

/// Errors returned by the public client verbs.
///
/// Lifecycle and registry errors are raised locally without contacting the
/// Hub. The Hub-reported variants carry the cause from the failed reply.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("client already started")]
    AlreadyStarted,

    #[error("client not started")]
    NotStarted,

    #[error("selector {0} duplicates an already published selector")]
    DuplicateSelector(Selector),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("hub refused {action}: {reason}")]
    Handshake { action: Action, reason: String },

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("unpublish failed after removing {removed} selector(s): {reason}")]
    Unpublish { reason: String, removed: usize },

    #[error("discover failed: {0}")]
    Discover(String),

    #[error("lookup failed: {0}")]
    Lookup(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Transport(TransportError::Codec(e))
    }
}
