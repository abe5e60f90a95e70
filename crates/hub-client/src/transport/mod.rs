//! Transport seam between the session and the Hub connection.
//!
//! A [`Connector`] creates a [`Transport`] and reports everything that
//! happens on the connection through a channel of [`TransportEvent`]s.
//! Reconnection policy lives entirely inside the transport; the session
//! only reacts to [`TransportEvent::Disconnected`] and
//! [`TransportEvent::Reconnected`].

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use hubmesh_protocol::Packet;

use crate::error::TransportError;

pub mod memory;
mod pumps;
pub(crate) mod reconnection;
pub mod ws;

pub use memory::{HubEndpoint, MemoryConnector};
pub use ws::{WsConnector, WsTransport};

/// Events reported by a transport to its owner.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The first connection is established and packets may be sent.
    Ready,
    /// A packet arrived from the Hub.
    Packet(Packet),
    /// The link with the given epoch dropped; the transport is reconnecting.
    Disconnected { epoch: u64 },
    /// A new link with the given epoch is up after a drop.
    Reconnected { epoch: u64 },
    /// The transport shut down (closed locally or gave up reconnecting).
    Closed,
}

/// A single logical connection to the Hub.
pub trait Transport: Send + Sync + 'static {
    /// Queues a packet for delivery.
    ///
    /// Fails with [`TransportError::Closed`] while the connection is down.
    fn send(&self, packet: Packet) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Identifies the current underlying link. Grows by one each time the
    /// connection is re-established.
    fn epoch(&self) -> u64;

    /// Closes the connection. No events follow [`TransportEvent::Closed`].
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Creates transports.
pub trait Connector: Send + Sync + 'static {
    /// Connects and returns the transport handle. Events for the new
    /// connection are delivered on `events`, starting with
    /// [`TransportEvent::Ready`].
    fn connect(
        &self,
        events: mpsc::Sender<TransportEvent>,
    ) -> BoxFuture<'_, Result<Arc<dyn Transport>, TransportError>>;
}
