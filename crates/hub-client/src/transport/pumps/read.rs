//! WebSocket read pump: decodes incoming frames into transport events.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use hubmesh_protocol::Packet;
use hubmesh_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PONG_WAIT};

use crate::transport::TransportEvent;

/// Reads frames from the WebSocket and forwards decoded packets.
///
/// Uses a read deadline to detect dead connections: if nothing arrives
/// within [`WS_PONG_WAIT`] the connection is considered dead and the loop
/// exits. The caller treats any exit other than cancellation as a drop.
pub(crate) async fn read_pump<S>(
    mut read: S,
    events: mpsc::Sender<TransportEvent>,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let pong_deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(pong_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut pong_deadline => {
                warn!("pong timeout, connection dead");
                break;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        // Any incoming frame resets the deadline.
                        pong_deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                handle_text_message(&text, &events).await;
                            }
                            tungstenite::Message::Ping(data) => {
                                trace!("received ping, sending pong");
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Pong(_) => {
                                trace!("received pong");
                            }
                            tungstenite::Message::Close(_) => {
                                debug!("received close frame");
                                break;
                            }
                            _ => {} // Binary is not part of the protocol
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    cancel.cancel();
}

/// Decodes a text frame and forwards it as [`TransportEvent::Packet`].
async fn handle_text_message(text: &str, events: &mpsc::Sender<TransportEvent>) {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!("frame too large ({} bytes), dropping", text.len());
        return;
    }

    let packet: Packet = match serde_json::from_str(text) {
        Ok(p) => p,
        Err(e) => {
            warn!("failed to parse frame: {e}");
            return;
        }
    };

    trace!(id = %packet.id(), "received packet");

    if events.send(TransportEvent::Packet(packet)).await.is_err() {
        debug!("event receiver gone, dropping packet");
    }
}
