//! Hub-side helpers shared by the unit tests.

use std::time::Duration;

use hubmesh_protocol::{Action, Envelope, ReplyEnvelope};

use crate::client::HubClient;
use crate::transport::memory::{self, HubEndpoint};
use crate::types::ClientConfig;

const WAIT: Duration = Duration::from_secs(5);

/// Waits for the next request and checks its action.
pub(crate) async fn expect_request(hub: &HubEndpoint, action: Action) -> (String, Envelope) {
    let (id, envelope) = tokio::time::timeout(WAIT, hub.recv_request())
        .await
        .expect("request in time")
        .expect("link open");
    assert_eq!(envelope.action, action, "unexpected request: {envelope:?}");
    (id, envelope)
}

/// Accepts the next request, which must be `action`.
pub(crate) async fn ack(hub: &HubEndpoint, action: Action) -> Envelope {
    let (id, envelope) = expect_request(hub, action).await;
    hub.reply(id, ReplyEnvelope::ok(None)).await;
    envelope
}

/// Refuses the next request, which must be `action`.
pub(crate) async fn fail(hub: &HubEndpoint, action: Action, reason: &str) -> Envelope {
    let (id, envelope) = expect_request(hub, action).await;
    hub.reply(id, ReplyEnvelope::failure(reason)).await;
    envelope
}

/// Asserts the client sends nothing more for a short while.
pub(crate) async fn no_more_requests(hub: &HubEndpoint) {
    let next = tokio::time::timeout(Duration::from_millis(100), hub.recv()).await;
    assert!(next.is_err(), "unexpected packet: {next:?}");
}

/// A client started against an in-memory Hub that accepted ONLINE.
pub(crate) async fn started(config: ClientConfig) -> (HubClient, HubEndpoint) {
    let (connector, hub) = memory::pair();
    let client = HubClient::new(config, connector);
    let (result, _) = tokio::join!(client.start(), ack(&hub, Action::Online));
    result.expect("client starts");
    (client, hub)
}
