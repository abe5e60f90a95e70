//! Handler for Hub-pushed MESSAGE_DOWN messages.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use hubmesh_protocol::Location;

/// Error type a handler may fail with. The message becomes the `error` of
/// the failure reply sent back to the Hub.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by [`MessageHandler::handle`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send + 'a>>;

/// A message relayed by the Hub from another client.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Location of the client that invoked us.
    pub sender: Location,
    pub data: Value,
    /// Whether the sender waits for a reply.
    pub need_reply: bool,
}

/// Answers MESSAGE_DOWN messages.
///
/// The default implementation echoes `data` back unchanged. The returned
/// value is sent to the invoker only if it asked for a reply.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, message: InboundMessage) -> HandlerFuture<'_> {
        Box::pin(async move { Ok::<_, HandlerError>(message.data) })
    }
}

/// Handler that echoes every message back.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl MessageHandler for EchoHandler {}
