//! Public client API.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use hubmesh_protocol::{
    Action, Location, MatchPredicate, MessageUpPayload, PatternMatcher, ReplyEnvelope, Selector,
    SelectorPayload,
};

use crate::error::ClientError;
use crate::handler::{EchoHandler, MessageHandler};
use crate::registry::SelectorRegistry;
use crate::session::Session;
use crate::transport::Connector;
use crate::types::{ClientConfig, SessionEvent, SessionState};

/// Builder for [`HubClient`].
pub struct HubClientBuilder {
    config: ClientConfig,
    connector: Box<dyn Connector>,
    handler: Arc<dyn MessageHandler>,
    matcher: Arc<dyn MatchPredicate>,
}

impl HubClientBuilder {
    /// Handler for Hub-pushed messages. Defaults to [`EchoHandler`].
    pub fn handler(mut self, handler: impl MessageHandler) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Predicate deciding when two selectors are the same registration.
    /// Defaults to [`PatternMatcher`].
    pub fn matcher(mut self, matcher: impl MatchPredicate) -> Self {
        self.matcher = Arc::new(matcher);
        self
    }

    pub fn build(self) -> HubClient {
        HubClient {
            location: self.config.location.clone(),
            session: Session::new(self.config, self.connector, self.handler, self.matcher),
        }
    }
}

/// A participant in the hub fabric.
///
/// Publishes selectors, discovers other clients, and invokes them through
/// the Hub. Every verb except [`start`](Self::start) fails with
/// [`ClientError::NotStarted`] until the client is started.
pub struct HubClient {
    location: Location,
    session: Session,
}

impl HubClient {
    /// Creates a client with the default handler and matcher.
    pub fn new(config: ClientConfig, connector: impl Connector) -> Self {
        Self::builder(config, connector).build()
    }

    pub fn builder(config: ClientConfig, connector: impl Connector) -> HubClientBuilder {
        HubClientBuilder {
            config,
            connector: Box::new(connector),
            handler: Arc::new(EchoHandler),
            matcher: Arc::new(PatternMatcher),
        }
    }

    /// Connects to the Hub and goes online.
    pub async fn start(&self) -> Result<(), ClientError> {
        self.session.start().await
    }

    /// Goes offline and releases the connection. The client can be
    /// started again afterwards.
    pub async fn stop(&self) -> Result<(), ClientError> {
        self.session.stop().await
    }

    /// Publishes `selector`.
    ///
    /// Fails with [`ClientError::DuplicateSelector`] without contacting
    /// the Hub if it matches an already published selector. The registry
    /// is only updated once the Hub accepts.
    pub async fn publish(&self, selector: impl Into<Selector>) -> Result<ReplyEnvelope, ClientError> {
        let selector = selector.into();
        let core = self.session.core();
        let transport = core.transport().await?;

        let mut registry = core.registry.lock().await;
        registry.check_unique(&selector)?;
        let reply = core.announce(transport.as_ref(), &selector).await?;
        registry.add(selector.clone())?;
        info!(%selector, "published");
        Ok(reply)
    }

    /// Withdraws every published selector matching `selector`.
    ///
    /// Matches are withdrawn one at a time in registry order. On the first
    /// failure the call stops; selectors already withdrawn are removed from
    /// the registry and the rest stay published.
    pub async fn unpublish(&self, selector: impl Into<Selector>) -> Result<ReplyEnvelope, ClientError> {
        let selector = selector.into();
        let core = self.session.core();
        let transport = core.transport().await?;

        let mut registry = core.registry.lock().await;
        let targets = registry.matching(&selector);
        let mut replies = Vec::with_capacity(targets.len());

        for target in &targets {
            let payload = serde_json::to_value(SelectorPayload {
                selector: target.clone(),
            })?;
            let outcome = core
                .correlator
                .send_and_wait(transport.as_ref(), Action::Unpublish, Some(payload))
                .await;
            match outcome {
                Ok(reply) if reply.success => replies.push(reply),
                Ok(reply) => {
                    let removed = withdraw(&mut registry, &targets[..replies.len()]);
                    warn!(%target, removed, "unpublish refused by hub");
                    return Err(ClientError::Unpublish {
                        reason: reply.error_message(),
                        removed,
                    });
                }
                Err(e) => {
                    let removed = withdraw(&mut registry, &targets[..replies.len()]);
                    warn!(%target, removed, error = %e, "unpublish interrupted");
                    return Err(e);
                }
            }
        }

        registry.remove_matching(&selector);
        info!(%selector, removed = replies.len(), "unpublished");
        Ok(ReplyEnvelope::batch(replies))
    }

    /// Returns the Hub's full Location/Selector snapshot.
    pub async fn discover(&self) -> Result<Value, ClientError> {
        let reply = self.request(Action::Discover, None).await?;
        if !reply.success {
            return Err(ClientError::Discover(reply.error_message()));
        }
        Ok(reply.data.unwrap_or(Value::Null))
    }

    /// Returns the part of the Hub's snapshot matching `selector`.
    pub async fn lookup(&self, selector: impl Into<Selector>) -> Result<Value, ClientError> {
        let payload = serde_json::to_value(SelectorPayload {
            selector: selector.into(),
        })?;
        let reply = self.request(Action::Discover, Some(payload)).await?;
        if !reply.success {
            return Err(ClientError::Lookup(reply.error_message()));
        }
        Ok(reply.data.unwrap_or(Value::Null))
    }

    /// Invokes one client matching `remote` and returns its reply.
    ///
    /// The Hub picks the target. A handler failure on the remote side comes
    /// back as a reply with `success == false`, not as an error.
    pub async fn invoke(
        &self,
        remote: impl Into<Selector>,
        data: Value,
    ) -> Result<ReplyEnvelope, ClientError> {
        let payload = message_up(remote.into(), false, data)?;
        self.request(Action::MessageUp, Some(payload)).await
    }

    /// Invokes every client matching `remote` and returns their replies in
    /// the order the Hub issued them.
    pub async fn multiple_invoke(
        &self,
        remote: impl Into<Selector>,
        data: Value,
    ) -> Result<Vec<ReplyEnvelope>, ClientError> {
        let payload = message_up(remote.into(), true, data)?;
        let reply = self.request(Action::MessageUp, Some(payload)).await?;
        Ok(match reply.batch_reply {
            Some(replies) => replies,
            None if reply.success => Vec::new(),
            None => vec![reply],
        })
    }

    /// Sends `data` to one client matching `remote` without waiting.
    pub async fn send(&self, remote: impl Into<Selector>, data: Value) -> Result<(), ClientError> {
        let payload = message_up(remote.into(), false, data)?;
        self.notify(Action::MessageUp, payload).await
    }

    /// Sends `data` to every client matching `remote` without waiting.
    pub async fn multiple_send(
        &self,
        remote: impl Into<Selector>,
        data: Value,
    ) -> Result<(), ClientError> {
        let payload = message_up(remote.into(), true, data)?;
        self.notify(Action::MessageUp, payload).await
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub async fn state(&self) -> SessionState {
        self.session.core().state().await
    }

    /// Snapshot of the published selectors, in publish order.
    pub async fn published(&self) -> Vec<Selector> {
        self.session.core().registry.lock().await.entries().to_vec()
    }

    /// Number of requests waiting for a reply.
    pub async fn pending_requests(&self) -> usize {
        self.session.core().correlator.pending_len().await
    }

    /// Takes the diagnostic event receiver. Can only be called once.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.session.take_events().await
    }

    async fn request(&self, action: Action, data: Option<Value>) -> Result<ReplyEnvelope, ClientError> {
        let core = self.session.core();
        let transport = core.transport().await?;
        core.correlator.send_and_wait(transport.as_ref(), action, data).await
    }

    async fn notify(&self, action: Action, data: Value) -> Result<(), ClientError> {
        let core = self.session.core();
        let transport = core.transport().await?;
        core.correlator
            .send_only(transport.as_ref(), action, Some(data))
            .await
    }
}

fn message_up(remote: Selector, broadcast: bool, data: Value) -> Result<Value, ClientError> {
    Ok(serde_json::to_value(MessageUpPayload {
        remote,
        broadcast,
        data,
    })?)
}

/// Drops the selectors the Hub already acknowledged withdrawing.
fn withdraw(registry: &mut SelectorRegistry, acknowledged: &[Selector]) -> usize {
    for selector in acknowledged {
        if !registry.remove_exact(selector) {
            debug!(%selector, "withdrawn selector already gone from registry");
        }
    }
    acknowledged.len()
}
