//! Session manager: lifecycle, inbound dispatch, and reconnect resync.
//!
//! The session owns the transport handle. A single event loop consumes
//! [`TransportEvent`]s: replies go to the correlator, MESSAGE_DOWN goes to
//! the handler, and a reconnect triggers a resync that re-sends ONLINE and
//! republishes every registered selector in registry order.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use hubmesh_protocol::{
    Action, Envelope, MatchPredicate, Packet, ReplyEnvelope, Selector, SelectorPayload,
};

use crate::correlator::RequestCorrelator;
use crate::error::{ClientError, TransportError};
use crate::handler::{InboundMessage, MessageHandler};
use crate::registry::SelectorRegistry;
use crate::transport::{Connector, Transport, TransportEvent};
use crate::types::{ClientConfig, SessionEvent, SessionState};

const TRANSPORT_EVENT_CAPACITY: usize = 256;
const SESSION_EVENT_CAPACITY: usize = 64;

/// State shared between the session owner and its background tasks.
pub(crate) struct SessionCore {
    pub(crate) correlator: RequestCorrelator,
    pub(crate) registry: Mutex<SelectorRegistry>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    state: RwLock<SessionState>,
    handler: Arc<dyn MessageHandler>,
    events_tx: mpsc::Sender<SessionEvent>,
}

impl SessionCore {
    /// Returns the transport handle, or [`ClientError::NotStarted`].
    pub(crate) async fn transport(&self) -> Result<Arc<dyn Transport>, ClientError> {
        self.transport
            .read()
            .await
            .clone()
            .ok_or(ClientError::NotStarted)
    }

    pub(crate) async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Sends PUBLISH for `selector` without touching the registry.
    ///
    /// Shared by the public publish verb, which checks uniqueness first,
    /// and by resync, which re-announces selectors already registered.
    pub(crate) async fn announce(
        &self,
        transport: &dyn Transport,
        selector: &Selector,
    ) -> Result<ReplyEnvelope, ClientError> {
        let payload = serde_json::to_value(SelectorPayload {
            selector: selector.clone(),
        })?;
        let reply = self
            .correlator
            .send_and_wait(transport, Action::Publish, Some(payload))
            .await?;
        if !reply.success {
            return Err(ClientError::Publish(reply.error_message()));
        }
        Ok(reply)
    }

    /// Sends ONLINE or OFFLINE and waits for the Hub to accept it.
    async fn handshake(&self, transport: &dyn Transport, action: Action) -> Result<(), ClientError> {
        let reply = self.correlator.send_and_wait(transport, action, None).await?;
        if !reply.success {
            return Err(ClientError::Handshake {
                action,
                reason: reply.error_message(),
            });
        }
        Ok(())
    }

    async fn set_state(&self, new_state: SessionState) {
        {
            let mut state = self.state.write().await;
            if *state == new_state {
                return;
            }
            *state = new_state;
        }
        debug!(state = ?new_state, "session state changed");
        self.emit(SessionEvent::StateChanged(new_state));
    }

    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            trace!("session event dropped: {e}");
        }
    }

    /// Re-sends ONLINE, then republishes every registered selector in
    /// order. Stops at the first failure, or as soon as the link it was
    /// started for has been replaced.
    async fn republish_all(&self, transport: &dyn Transport, epoch: u64) -> Result<usize, ClientError> {
        ensure_current(transport, epoch)?;
        self.handshake(transport, Action::Online).await?;

        // Held for the whole pass so verbs cannot reorder the registry
        // under the resync.
        let registry = self.registry.lock().await;
        for selector in registry.entries() {
            ensure_current(transport, epoch)?;
            self.announce(transport, selector).await?;
            debug!(%selector, "republished");
        }
        Ok(registry.len())
    }

    fn dispatch(self: &Arc<Self>, id: String, envelope: Envelope) {
        let core = self.clone();
        tokio::spawn(async move {
            if let Err(reason) = core.answer(id, envelope).await {
                warn!(%reason, "failed to reply to inbound message");
                core.emit(SessionEvent::DispatchFailed { reason });
            }
        });
    }

    /// Runs the handler for a Hub-pushed request and replies if asked to.
    async fn answer(&self, id: String, envelope: Envelope) -> Result<(), String> {
        let need_reply = envelope.need_reply;

        let reply = if envelope.action == Action::MessageDown {
            let message = InboundMessage {
                sender: envelope.host,
                data: envelope.data.unwrap_or(Value::Null),
                need_reply,
            };
            match self.handler.handle(message).await {
                Ok(data) => ReplyEnvelope::ok(data),
                Err(e) => {
                    debug!(%id, error = %e, "handler failed");
                    ReplyEnvelope::failure(e.to_string())
                }
            }
        } else {
            debug!(action = %envelope.action, %id, "unexpected request from hub");
            ReplyEnvelope::failure(format!("unsupported action {}", envelope.action))
        };

        if !need_reply {
            return Ok(());
        }
        let transport = self.transport.read().await.clone().ok_or("session stopped")?;
        transport
            .send(Packet::reply(id, reply))
            .await
            .map_err(|e| e.to_string())
    }
}

/// Owns the transport handle and drives the session state machine.
pub(crate) struct Session {
    core: Arc<SessionCore>,
    connector: Box<dyn Connector>,
    events_rx: Mutex<Option<mpsc::Receiver<SessionEvent>>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    /// Serializes start and stop.
    lifecycle: Mutex<()>,
}

impl Session {
    pub(crate) fn new(
        config: ClientConfig,
        connector: Box<dyn Connector>,
        handler: Arc<dyn MessageHandler>,
        matcher: Arc<dyn MatchPredicate>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(SESSION_EVENT_CAPACITY);
        let core = SessionCore {
            correlator: RequestCorrelator::new(config.location, config.response_timeout),
            registry: Mutex::new(SelectorRegistry::new(matcher)),
            transport: RwLock::new(None),
            state: RwLock::new(SessionState::Stopped),
            handler,
            events_tx,
        };
        Self {
            core: Arc::new(core),
            connector,
            events_rx: Mutex::new(Some(events_rx)),
            event_task: Mutex::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    pub(crate) fn core(&self) -> &SessionCore {
        &self.core
    }

    /// Takes the event receiver. Can only be called once.
    pub(crate) async fn take_events(&self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events_rx.lock().await.take()
    }

    /// Connects, waits for readiness, and performs the ONLINE handshake.
    pub(crate) async fn start(&self) -> Result<(), ClientError> {
        let _guard = self.lifecycle.lock().await;
        if self.core.transport.read().await.is_some() {
            return Err(ClientError::AlreadyStarted);
        }

        let location = self.core.correlator.location().clone();
        info!(%location, "starting session");
        self.core.set_state(SessionState::Connecting).await;

        let (tx, mut rx) = mpsc::channel(TRANSPORT_EVENT_CAPACITY);
        let transport = match self.connector.connect(tx).await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "failed to connect to hub");
                self.core.set_state(SessionState::Stopped).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.wait_ready(&mut rx).await {
            warn!(error = %e, "transport never became ready");
            transport.close().await;
            self.core.set_state(SessionState::Stopped).await;
            return Err(e);
        }

        *self.core.transport.write().await = Some(transport.clone());
        let task = tokio::spawn(event_loop(self.core.clone(), rx));
        *self.event_task.lock().await = Some(task);

        match self.core.handshake(transport.as_ref(), Action::Online).await {
            Ok(()) => {
                self.core.set_state(SessionState::Online).await;
                info!(%location, "session online");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "online handshake failed");
                self.teardown().await;
                Err(e)
            }
        }
    }

    /// Sends OFFLINE, waits for the acknowledgment, and releases the
    /// transport. The transport is released even if the handshake fails.
    pub(crate) async fn stop(&self) -> Result<(), ClientError> {
        let _guard = self.lifecycle.lock().await;
        let transport = self.core.transport().await?;

        info!(location = %self.core.correlator.location(), "stopping session");
        let result = self.core.handshake(transport.as_ref(), Action::Offline).await;
        if let Err(e) = &result {
            warn!(error = %e, "offline handshake failed");
        }
        drop(transport);
        self.teardown().await;
        result
    }

    async fn wait_ready(&self, rx: &mut mpsc::Receiver<TransportEvent>) -> Result<(), ClientError> {
        let window = self.core.correlator.timeout();
        let ready = async {
            loop {
                match rx.recv().await {
                    Some(TransportEvent::Ready) => return Ok(()),
                    Some(TransportEvent::Closed) | None => {
                        return Err(ClientError::Transport(TransportError::Closed));
                    }
                    Some(other) => debug!(event = ?other, "ignoring event before ready"),
                }
            }
        };
        tokio::time::timeout(window, ready)
            .await
            .map_err(|_| ClientError::Timeout(window))?
    }

    /// Closes and releases the transport, then waits for the event loop.
    async fn teardown(&self) {
        let transport = self.core.transport.write().await.take();
        if let Some(transport) = transport {
            transport.close().await;
        }
        let task = self.event_task.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
        let failed = self.core.correlator.fail_all().await;
        if failed > 0 {
            debug!(failed, "failed pending requests on teardown");
        }
        self.core.set_state(SessionState::Stopped).await;
        info!("session stopped");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.get_mut().take() {
            task.abort();
        }
    }
}

/// Fails with [`TransportError::Closed`] once the link `epoch` is gone.
fn ensure_current(transport: &dyn Transport, epoch: u64) -> Result<(), ClientError> {
    if transport.epoch() != epoch {
        return Err(TransportError::Closed.into());
    }
    Ok(())
}

async fn event_loop(core: Arc<SessionCore>, mut rx: mpsc::Receiver<TransportEvent>) {
    // At most one resync runs, and only for the newest link.
    let mut resync_task: Option<JoinHandle<()>> = None;

    while let Some(event) = rx.recv().await {
        match event {
            TransportEvent::Ready => debug!("transport ready"),
            TransportEvent::Packet(Packet::Reply { id, reply }) => {
                if !core.correlator.resolve(&id, reply).await {
                    debug!(%id, "discarding reply with no pending request");
                }
            }
            TransportEvent::Packet(Packet::Request { id, envelope }) => {
                debug!(action = %envelope.action, %id, host = %envelope.host, "inbound request");
                core.dispatch(id, envelope);
            }
            TransportEvent::Disconnected { epoch } => {
                cancel_resync(&mut resync_task);
                core.set_state(SessionState::Reconnecting).await;
                // Requests already sent on a newer link are still answerable.
                let failed = core.correlator.fail_through(epoch).await;
                warn!(epoch, failed, "connection to hub lost");
            }
            TransportEvent::Reconnected { epoch } => {
                cancel_resync(&mut resync_task);
                core.set_state(SessionState::Online).await;
                info!(epoch, "reconnected to hub, resynchronizing");
                resync_task = Some(tokio::spawn(resync(core.clone(), epoch)));
            }
            TransportEvent::Closed => {
                cancel_resync(&mut resync_task);
                // A handle still in place means the transport gave up on
                // its own rather than being closed by stop().
                if core.transport.write().await.take().is_some() {
                    warn!("transport closed, session stopped");
                    core.correlator.fail_all().await;
                    core.set_state(SessionState::Stopped).await;
                }
                break;
            }
        }
    }
    cancel_resync(&mut resync_task);
    debug!("session event loop exited");
}

fn cancel_resync(task: &mut Option<JoinHandle<()>>) {
    if let Some(task) = task.take() {
        task.abort();
    }
}

async fn resync(core: Arc<SessionCore>, epoch: u64) {
    let Some(transport) = core.transport.read().await.clone() else {
        return;
    };
    match core.republish_all(transport.as_ref(), epoch).await {
        Ok(republished) => {
            info!(republished, epoch, "resync complete");
            core.emit(SessionEvent::Resynced { republished });
        }
        Err(_) if transport.epoch() != epoch => {
            debug!(epoch, "resync superseded by a newer connection");
        }
        Err(e) => {
            warn!(error = %e, "resync failed");
            core.emit(SessionEvent::ResyncFailed {
                reason: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use crate::client::HubClient;
    use crate::testkit::{ack, expect_request, fail, no_more_requests, started};
    use crate::transport::memory;
    use crate::types::{ClientConfig, SessionEvent, SessionState};

    use super::*;

    fn config() -> ClientConfig {
        ClientConfig {
            location: "node-a".into(),
            response_timeout: Duration::from_secs(5),
        }
    }

    async fn wait_for_state(client: &HubClient, want: SessionState) {
        for _ in 0..500 {
            if client.state().await == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("state never became {want:?}");
    }

    #[tokio::test]
    async fn start_goes_online_and_emits_transitions() {
        let (connector, hub) = memory::pair();
        let client = HubClient::new(config(), connector);
        let mut events = client.take_events().await.unwrap();
        assert!(client.take_events().await.is_none());
        assert_eq!(client.state().await, SessionState::Stopped);

        let (result, online) = tokio::join!(client.start(), ack(&hub, Action::Online));
        result.unwrap();
        assert!(online.need_reply);
        assert_eq!(online.host.as_str(), "node-a");
        assert_eq!(client.state().await, SessionState::Online);

        assert_eq!(
            events.recv().await,
            Some(SessionEvent::StateChanged(SessionState::Connecting))
        );
        assert_eq!(
            events.recv().await,
            Some(SessionEvent::StateChanged(SessionState::Online))
        );
    }

    #[tokio::test]
    async fn second_start_is_rejected_without_reconnecting() {
        let (client, hub) = started(config()).await;
        assert!(matches!(client.start().await, Err(ClientError::AlreadyStarted)));
        assert_eq!(hub.connects(), 1);
        no_more_requests(&hub).await;
    }

    #[tokio::test]
    async fn refused_online_tears_down() {
        let (connector, hub) = memory::pair();
        let client = HubClient::new(config(), connector);

        let (result, _) = tokio::join!(client.start(), fail(&hub, Action::Online, "banned"));
        match result {
            Err(ClientError::Handshake { action, reason }) => {
                assert_eq!(action, Action::Online);
                assert_eq!(reason, "banned");
            }
            other => panic!("expected handshake error, got {other:?}"),
        }
        assert_eq!(client.state().await, SessionState::Stopped);
        assert!(!hub.is_up());
        assert!(matches!(client.discover().await, Err(ClientError::NotStarted)));

        // A fresh handle is created on the next start.
        let (result, _) = tokio::join!(client.start(), ack(&hub, Action::Online));
        result.unwrap();
        assert_eq!(hub.connects(), 2);
    }

    #[tokio::test]
    async fn stop_sends_offline_and_allows_restart() {
        let (client, hub) = started(config()).await;
        let (_, b) = tokio::join!(client.publish("a"), ack(&hub, Action::Publish));
        assert!(b.need_reply);

        let (result, offline) = tokio::join!(client.stop(), ack(&hub, Action::Offline));
        result.unwrap();
        assert_eq!(offline.host.as_str(), "node-a");
        assert_eq!(client.state().await, SessionState::Stopped);
        assert!(!hub.is_up());
        assert!(matches!(client.publish("b").await, Err(ClientError::NotStarted)));

        let (result, _) = tokio::join!(client.start(), ack(&hub, Action::Online));
        result.unwrap();
        assert_eq!(client.state().await, SessionState::Online);
        // The registry is kept across a stop.
        assert_eq!(client.published().await, [Selector::from("a")]);
    }

    #[tokio::test]
    async fn refused_offline_still_releases_transport() {
        let (client, hub) = started(config()).await;
        let (result, _) = tokio::join!(client.stop(), fail(&hub, Action::Offline, "no"));
        assert!(matches!(result, Err(ClientError::Handshake { .. })));
        assert_eq!(client.state().await, SessionState::Stopped);
        assert!(!hub.is_up());
    }

    #[tokio::test]
    async fn transport_giving_up_stops_the_session() {
        let (client, hub) = started(config()).await;
        hub.shut_down().await;
        wait_for_state(&client, SessionState::Stopped).await;
        assert!(matches!(client.discover().await, Err(ClientError::NotStarted)));
    }

    #[tokio::test]
    async fn inbound_without_reply_request_is_not_answered() {
        let (_client, hub) = started(config()).await;
        let envelope = Envelope::new(Action::MessageDown, "node-b".into(), Some(json!(1)));
        hub.push(Packet::request("down-1", envelope)).await;
        no_more_requests(&hub).await;
    }

    #[tokio::test]
    async fn unexpected_inbound_action_gets_failure_reply() {
        let (_client, hub) = started(config()).await;
        let envelope = Envelope::new(Action::Publish, "node-b".into(), None).with_reply();
        hub.push(Packet::request("odd-1", envelope)).await;

        match tokio::time::timeout(Duration::from_secs(5), hub.recv()).await.unwrap() {
            Some(Packet::Reply { id, reply }) => {
                assert_eq!(id, "odd-1");
                assert!(!reply.success);
            }
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_reply_failure_is_reported_not_raised() {
        struct Slow;
        impl MessageHandler for Slow {
            fn handle(&self, message: InboundMessage) -> crate::handler::HandlerFuture<'_> {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, crate::handler::HandlerError>(message.data)
                })
            }
        }

        let (connector, hub) = memory::pair();
        let client = HubClient::builder(config(), connector).handler(Slow).build();
        let mut events = client.take_events().await.unwrap();
        let (result, _) = tokio::join!(client.start(), ack(&hub, Action::Online));
        result.unwrap();

        let envelope = Envelope::new(Action::MessageDown, "node-b".into(), None).with_reply();
        hub.push(Packet::request("down-2", envelope)).await;
        // The connection drops while the handler runs, so the reply cannot go out.
        hub.drop_connection().await;

        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            if let SessionEvent::DispatchFailed { reason } = event {
                assert_eq!(reason, "connection closed");
                break;
            }
        }
        assert_eq!(client.state().await, SessionState::Reconnecting);

        // The session keeps working once the link is back.
        hub.reconnect().await;
        ack(&hub, Action::Online).await;
        let (result, _) = tokio::join!(client.discover(), ack(&hub, Action::Discover));
        assert_eq!(result.unwrap(), serde_json::Value::Null);
    }

    #[tokio::test]
    async fn reconnect_during_resync_republishes_once() {
        let (client, hub) = started(config()).await;
        let client = Arc::new(client);
        let (result, _) = tokio::join!(client.publish("a"), ack(&hub, Action::Publish));
        result.unwrap();

        hub.drop_connection().await;
        hub.reconnect().await;
        let (online_id, _) = expect_request(&hub, Action::Online).await;

        // A publish holds the registry until its reply, which never comes.
        let c = client.clone();
        let blocked = tokio::spawn(async move { c.publish("c").await });
        expect_request(&hub, Action::Publish).await;

        // The first resync is accepted and queues behind the registry,
        // then the link is replaced again.
        hub.reply(online_id, ReplyEnvelope::ok(None)).await;
        hub.drop_connection().await;
        hub.reconnect().await;

        assert!(matches!(
            blocked.await.unwrap(),
            Err(ClientError::Transport(TransportError::Closed))
        ));
        ack(&hub, Action::Online).await;
        let republished = ack(&hub, Action::Publish).await;
        let payload: SelectorPayload = republished.parse_data().unwrap().unwrap();
        assert_eq!(payload.selector, Selector::from("a"));
        no_more_requests(&hub).await;
        assert_eq!(client.published().await, [Selector::from("a")]);
    }

    #[tokio::test]
    async fn request_on_new_link_survives_earlier_drop() {
        let (client, hub) = started(config()).await;
        hub.drop_connection().await;
        hub.reconnect().await;

        // Sent on the new link before the session has seen the drop.
        let hub_side = async {
            let (id, _) = expect_request(&hub, Action::Discover).await;
            hub.reply(id, ReplyEnvelope::ok(json!({"node-b": []}))).await;
            ack(&hub, Action::Online).await;
        };
        let (result, ()) = tokio::join!(client.discover(), hub_side);
        assert_eq!(result.unwrap(), json!({"node-b": []}));
        assert_eq!(client.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn late_reply_after_resolution_is_ignored() {
        let (client, hub) = started(config()).await;
        let hub_side = async {
            let (id, _) = expect_request(&hub, Action::Discover).await;
            hub.reply(id.clone(), ReplyEnvelope::ok(json!(1))).await;
            hub.reply(id, ReplyEnvelope::ok(json!(2))).await;
        };
        let (result, ()) = tokio::join!(client.discover(), hub_side);
        assert_eq!(result.unwrap(), json!(1));
        assert_eq!(client.pending_requests().await, 0);
        assert_eq!(client.state().await, SessionState::Online);
    }
}
