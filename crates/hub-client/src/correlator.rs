//! Request/reply correlation over the shared Hub connection.
//!
//! Every reply-expecting send gets a fresh UUID as its correlation token and
//! an entry in the pending table. The entry is removed when the reply arrives,
//! when the send fails, on timeout, or when the link it was sent on drops,
//! whichever comes first. Tokens are never reused, so a reply that arrives
//! after its request timed out finds no entry and is discarded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, trace};

use hubmesh_protocol::{Action, Envelope, Location, Packet, ReplyEnvelope};

use crate::error::{ClientError, TransportError};
use crate::transport::Transport;

/// A waiting request and the transport epoch it was sent on.
struct Pending {
    epoch: u64,
    tx: oneshot::Sender<ReplyEnvelope>,
}

type PendingTable = Arc<Mutex<HashMap<String, Pending>>>;

/// Turns sends into awaitable replies.
pub struct RequestCorrelator {
    location: Location,
    timeout: Duration,
    pending: PendingTable,
}

impl RequestCorrelator {
    pub fn new(location: Location, timeout: Duration) -> Self {
        Self {
            location,
            timeout,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends `action` with `need_reply` set and waits for the correlated reply.
    ///
    /// Hub-reported failures come back as `Ok` with `success == false`; only
    /// transport failures and timeouts are errors here.
    pub async fn send_and_wait(
        &self,
        transport: &dyn Transport,
        action: Action,
        data: Option<Value>,
    ) -> Result<ReplyEnvelope, ClientError> {
        let id = uuid::Uuid::new_v4().to_string();
        let envelope = Envelope::new(action, self.location.clone(), data).with_reply();

        let (tx, rx) = oneshot::channel();
        let epoch = transport.epoch();
        self.pending
            .lock()
            .await
            .insert(id.clone(), Pending { epoch, tx });

        trace!(%action, %id, epoch, "sending request");
        if let Err(e) = transport.send(Packet::request(&id, envelope)).await {
            self.pending.lock().await.remove(&id);
            return Err(e.into());
        }

        let result = tokio::time::timeout(self.timeout, rx).await;

        // Clean up pending entry on any exit path.
        self.pending.lock().await.remove(&id);

        match result {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TransportError::Closed.into()),
            Err(_) => {
                debug!(%action, %id, "request timed out");
                Err(ClientError::Timeout(self.timeout))
            }
        }
    }

    /// Sends `action` without waiting for, or asking for, a reply.
    pub async fn send_only(
        &self,
        transport: &dyn Transport,
        action: Action,
        data: Option<Value>,
    ) -> Result<(), ClientError> {
        let id = uuid::Uuid::new_v4().to_string();
        let envelope = Envelope::new(action, self.location.clone(), data);
        trace!(%action, %id, "sending fire-and-forget");
        transport.send(Packet::request(id, envelope)).await?;
        Ok(())
    }

    /// Completes the pending request `id`. Returns `false` if nothing is
    /// waiting for it (late reply after a timeout, or an unknown id).
    pub async fn resolve(&self, id: &str, reply: ReplyEnvelope) -> bool {
        let Some(pending) = self.pending.lock().await.remove(id) else {
            return false;
        };
        pending.tx.send(reply).is_ok()
    }

    /// Fails every pending request with [`TransportError::Closed`].
    pub async fn fail_all(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().await.drain().collect();
        drained.len()
    }

    /// Fails the requests sent on link `epoch` or earlier. Requests already
    /// sent on a newer link stay pending.
    pub async fn fail_through(&self, epoch: u64) -> usize {
        let mut pending = self.pending.lock().await;
        let before = pending.len();
        pending.retain(|_, entry| entry.epoch > epoch);
        before - pending.len()
    }

    /// Number of requests waiting for a reply.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}
