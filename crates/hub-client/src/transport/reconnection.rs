//! Connection supervision and reconnection with exponential backoff.
//!
//! The supervisor runs the pumps for one socket at a time. When a socket
//! dies it reports [`TransportEvent::Disconnected`], retries until a new
//! socket opens, and reports [`TransportEvent::Reconnected`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::TransportEvent;
use crate::transport::pumps::{ping::ping_pump, read::read_pump, write::write_pump};
use crate::transport::ws::{WsStream, open};
use crate::types::ReconnectConfig;

/// Shared state for the supervisor task.
pub(crate) struct Supervisor {
    pub(crate) url: String,
    pub(crate) reconnect: ReconnectConfig,
    pub(crate) events: mpsc::Sender<TransportEvent>,
    pub(crate) write_tx: mpsc::Sender<tungstenite::Message>,
    pub(crate) connected: Arc<AtomicBool>,
    pub(crate) epoch: Arc<AtomicU64>,
    pub(crate) cancel: CancellationToken,
}

/// Owns the connection until the transport is closed or gives up.
pub(crate) async fn supervise(
    sup: Supervisor,
    first: WsStream,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
) {
    let mut stream = Some(first);

    while let Some(ws) = stream.take() {
        write_rx = run_connection(ws, write_rx, &sup).await;
        sup.connected.store(false, Ordering::Release);

        if sup.cancel.is_cancelled() {
            break;
        }

        // Frames queued against the dead socket belong to requests that
        // are being failed; do not replay them on the next one.
        let mut stale = 0usize;
        while write_rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "discarded frames queued before the drop");
        }

        let epoch = sup.epoch.load(Ordering::Acquire);
        warn!(url = %sup.url, epoch, "connection to hub lost");
        if sup.events.send(TransportEvent::Disconnected { epoch }).await.is_err() {
            debug!("event receiver gone, stopping supervisor");
            break;
        }

        stream = reconnect_loop(&sup).await;
        if stream.is_some() {
            // The epoch moves before sends are accepted on the new socket.
            let epoch = sup.epoch.fetch_add(1, Ordering::AcqRel) + 1;
            sup.connected.store(true, Ordering::Release);
            let _ = sup.events.send(TransportEvent::Reconnected { epoch }).await;
        }
    }

    sup.connected.store(false, Ordering::Release);
    let _ = sup.events.send(TransportEvent::Closed).await;
}

/// Runs the read, write, and ping pumps for one socket until any of them
/// stops. Returns the outbound queue for the next socket.
async fn run_connection(
    ws: WsStream,
    write_rx: mpsc::Receiver<tungstenite::Message>,
    sup: &Supervisor,
) -> mpsc::Receiver<tungstenite::Message> {
    let conn_cancel = sup.cancel.child_token();
    let (write, read) = ws.split();

    let writer = write_pump(write, write_rx, conn_cancel.clone());
    let reader = read_pump(
        read,
        sup.events.clone(),
        sup.write_tx.clone(),
        conn_cancel.clone(),
    );
    let pinger = ping_pump(sup.write_tx.clone(), conn_cancel);

    let (write_rx, (), ()) = tokio::join!(writer, reader, pinger);
    write_rx
}

/// Retries with backoff until a socket opens, the transport is closed, or
/// the attempt budget runs out.
async fn reconnect_loop(sup: &Supervisor) -> Option<WsStream> {
    let mut attempt: u32 = 0;

    loop {
        attempt = attempt.saturating_add(1);
        let delay = sup.reconnect.delay_for_attempt(attempt);
        let delay_secs = delay.as_secs_f64();

        info!(
            url = %sup.url,
            attempt,
            delay_secs = format_args!("{delay_secs:.1}"),
            "reconnecting"
        );

        tokio::select! {
            _ = sup.cancel.cancelled() => {
                debug!("reconnect cancelled");
                return None;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let result = tokio::select! {
            _ = sup.cancel.cancelled() => return None,
            r = open(&sup.url) => r,
        };

        match result {
            Ok(ws) => {
                info!(url = %sup.url, attempt, "reconnected successfully");
                return Some(ws);
            }
            Err(e) => {
                warn!(url = %sup.url, attempt, error = %e, "reconnect attempt failed");
                if sup.reconnect.exhausted(attempt) {
                    warn!(url = %sup.url, attempt, "reconnect attempts exhausted, giving up");
                    return None;
                }
            }
        }
    }
}
