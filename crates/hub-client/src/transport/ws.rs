//! WebSocket transport to the Hub.
//!
//! One JSON [`Packet`] per text frame. A supervisor task owns the socket,
//! runs the read/write/ping pumps, and reconnects with exponential backoff
//! when the connection drops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::future::BoxFuture;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};
use tokio_util::sync::CancellationToken;
use tracing::info;

use hubmesh_protocol::Packet;
use hubmesh_protocol::constants::WS_MAX_MESSAGE_SIZE;

use crate::error::TransportError;
use crate::transport::reconnection::{Supervisor, supervise};
use crate::transport::{Connector, Transport, TransportEvent};
use crate::types::ReconnectConfig;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens a WebSocket connection with the Hub frame limits applied.
///
/// Handshake failures are reported as [`TransportError::Connect`] with the
/// URL, so retries and the first connect log where they were aiming.
pub(crate) async fn open(url: &str) -> Result<WsStream, TransportError> {
    let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
    ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
    ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
    let (ws_stream, _) = tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false)
        .await
        .map_err(|e| TransportError::Connect(format!("{url}: {e}")))?;
    Ok(ws_stream)
}

/// Creates [`WsTransport`]s to a fixed Hub URL.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    reconnect: ReconnectConfig,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}

impl Connector for WsConnector {
    fn connect(
        &self,
        events: mpsc::Sender<TransportEvent>,
    ) -> BoxFuture<'_, Result<Arc<dyn Transport>, TransportError>> {
        Box::pin(async move {
            let transport = WsTransport::connect(&self.url, self.reconnect.clone(), events).await?;
            Ok(Arc::new(transport) as Arc<dyn Transport>)
        })
    }
}

/// WebSocket connection to the Hub, reconnecting on drop.
pub struct WsTransport {
    write_tx: mpsc::Sender<tungstenite::Message>,
    /// Cleared by the supervisor while the socket is down.
    connected: Arc<AtomicBool>,
    /// Bumped by the supervisor each time a new socket is up.
    epoch: Arc<AtomicU64>,
    cancel: CancellationToken,
    _supervisor: tokio::task::JoinHandle<()>,
}

impl WsTransport {
    /// Connects to `url`. Fails if the first connection cannot be opened;
    /// later drops are retried per `reconnect`.
    pub async fn connect(
        url: &str,
        reconnect: ReconnectConfig,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Self, TransportError> {
        let ws_stream = open(url).await?;
        info!(%url, "connected to hub");

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        let connected = Arc::new(AtomicBool::new(true));
        let epoch = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();

        // Ready goes out before the read pump can forward any packet.
        events
            .send(TransportEvent::Ready)
            .await
            .map_err(|_| TransportError::Closed)?;

        let supervisor = Supervisor {
            url: url.to_string(),
            reconnect,
            events,
            write_tx: write_tx.clone(),
            connected: connected.clone(),
            epoch: epoch.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(supervise(supervisor, ws_stream, write_rx));

        Ok(Self {
            write_tx,
            connected,
            epoch,
            cancel,
            _supervisor: handle,
        })
    }

    /// Returns `true` while the socket is up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl Transport for WsTransport {
    fn send(&self, packet: Packet) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if !self.is_connected() {
                return Err(TransportError::Closed);
            }
            let json = serde_json::to_string(&packet)?;
            self.write_tx
                .send(tungstenite::Message::Text(json.into()))
                .await
                .map_err(|_| TransportError::Closed)
        })
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.connected.store(false, Ordering::Release);
            self.cancel.cancel();
        })
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
