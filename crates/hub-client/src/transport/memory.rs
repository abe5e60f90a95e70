//! In-process transport.
//!
//! [`pair`] returns a [`MemoryConnector`] for the client and a
//! [`HubEndpoint`] that plays the Hub: it sees every outbound packet,
//! answers requests, pushes MESSAGE_DOWN, and can simulate a dropped and
//! re-established connection.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use hubmesh_protocol::{Envelope, Packet, ReplyEnvelope};

use crate::error::TransportError;
use crate::transport::{Connector, Transport, TransportEvent};

struct Link {
    /// Events sender of the current connection, if any.
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    up: AtomicBool,
    epoch: AtomicU64,
    connects: AtomicUsize,
    to_hub: mpsc::UnboundedSender<Packet>,
}

impl Link {
    fn events(&self) -> Option<mpsc::Sender<TransportEvent>> {
        self.events.lock().ok().and_then(|guard| guard.clone())
    }

    async fn emit(&self, event: TransportEvent) -> bool {
        match self.events() {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }
}

/// Creates a connected client/Hub pair.
pub fn pair() -> (MemoryConnector, HubEndpoint) {
    let (to_hub, from_client) = mpsc::unbounded_channel();
    let link = Arc::new(Link {
        events: Mutex::new(None),
        up: AtomicBool::new(false),
        epoch: AtomicU64::new(0),
        connects: AtomicUsize::new(0),
        to_hub,
    });
    let connector = MemoryConnector { link: link.clone() };
    let endpoint = HubEndpoint {
        link,
        inbox: Arc::new(tokio::sync::Mutex::new(from_client)),
    };
    (connector, endpoint)
}

/// Client side of an in-memory link.
#[derive(Clone)]
pub struct MemoryConnector {
    link: Arc<Link>,
}

impl Connector for MemoryConnector {
    fn connect(
        &self,
        events: mpsc::Sender<TransportEvent>,
    ) -> BoxFuture<'_, Result<Arc<dyn Transport>, TransportError>> {
        Box::pin(async move {
            if let Ok(mut guard) = self.link.events.lock() {
                *guard = Some(events.clone());
            }
            self.link.up.store(true, Ordering::Release);
            self.link.connects.fetch_add(1, Ordering::Relaxed);
            events
                .send(TransportEvent::Ready)
                .await
                .map_err(|_| TransportError::Closed)?;
            Ok(Arc::new(MemoryTransport {
                link: self.link.clone(),
            }) as Arc<dyn Transport>)
        })
    }
}

struct MemoryTransport {
    link: Arc<Link>,
}

impl Transport for MemoryTransport {
    fn send(&self, packet: Packet) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if !self.link.up.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            self.link
                .to_hub
                .send(packet)
                .map_err(|_| TransportError::Closed)
        })
    }

    fn epoch(&self) -> u64 {
        self.link.epoch.load(Ordering::Acquire)
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.link.up.store(false, Ordering::Release);
            self.link.emit(TransportEvent::Closed).await;
            if let Ok(mut guard) = self.link.events.lock() {
                *guard = None;
            }
        })
    }
}

/// Hub side of an in-memory link.
#[derive(Clone)]
pub struct HubEndpoint {
    link: Arc<Link>,
    inbox: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Packet>>>,
}

impl HubEndpoint {
    /// Waits for the next packet sent by the client.
    pub async fn recv(&self) -> Option<Packet> {
        self.inbox.lock().await.recv().await
    }

    /// Waits for the next request sent by the client, skipping replies.
    pub async fn recv_request(&self) -> Option<(String, Envelope)> {
        loop {
            match self.recv().await? {
                Packet::Request { id, envelope } => return Some((id, envelope)),
                Packet::Reply { .. } => continue,
            }
        }
    }

    /// Delivers a packet to the client. Returns `false` if no client is
    /// connected.
    pub async fn push(&self, packet: Packet) -> bool {
        self.link.emit(TransportEvent::Packet(packet)).await
    }

    /// Answers the request with the given id.
    pub async fn reply(&self, id: impl Into<String>, reply: ReplyEnvelope) -> bool {
        self.push(Packet::reply(id, reply)).await
    }

    /// Simulates a dropped connection: sends fail until [`reconnect`](Self::reconnect).
    pub async fn drop_connection(&self) {
        self.link.up.store(false, Ordering::Release);
        let epoch = self.link.epoch.load(Ordering::Acquire);
        self.link.emit(TransportEvent::Disconnected { epoch }).await;
    }

    /// Simulates the transport re-establishing the connection on a new link.
    pub async fn reconnect(&self) {
        // The epoch moves before sends are accepted again.
        let epoch = self.link.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.link.up.store(true, Ordering::Release);
        self.link.emit(TransportEvent::Reconnected { epoch }).await;
    }

    /// Simulates the transport giving up for good.
    pub async fn shut_down(&self) {
        self.link.up.store(false, Ordering::Release);
        self.link.emit(TransportEvent::Closed).await;
    }

    /// Returns `true` while the client side is connected.
    pub fn is_up(&self) -> bool {
        self.link.up.load(Ordering::Acquire)
    }

    /// Number of times a client connected through this link.
    pub fn connects(&self) -> usize {
        self.link.connects.load(Ordering::Relaxed)
    }
}
