//! Application orchestrator: connects the node, publishes its selectors,
//! and answers invocations until shutdown.

use serde_json::Value;

use hubmesh_client::{
    HandlerError, HandlerFuture, HubClient, InboundMessage, MessageHandler, SessionEvent, WsConnector,
};

use crate::config::Config;

/// Logs every invocation and echoes its data back.
struct NodeHandler;

impl MessageHandler for NodeHandler {
    fn handle(&self, message: InboundMessage) -> HandlerFuture<'_> {
        Box::pin(async move {
            tracing::info!(
                sender = %message.sender,
                need_reply = message.need_reply,
                "invocation received"
            );
            Ok::<_, HandlerError>(message.data)
        })
    }
}

/// Runs the node until SIGINT.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let connector = WsConnector::new(config.hub_url.clone()).with_reconnect(config.reconnect());
    let client = HubClient::builder(config.client_config(), connector)
        .handler(NodeHandler)
        .build();

    if let Some(mut events) = client.take_events().await {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                log_event(&event);
            }
        });
    }

    tracing::info!(hub = %config.hub_url, location = %client.location(), "connecting");
    client.start().await?;

    for selector in &config.selectors {
        match client.publish(selector.clone()).await {
            Ok(_) => tracing::info!(%selector, "selector published"),
            Err(e) => tracing::warn!(%selector, error = %e, "failed to publish selector"),
        }
    }

    tracing::info!(published = config.selectors.len(), "node ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("SIGINT received, shutting down");

    if let Err(e) = client.stop().await {
        tracing::warn!(error = %e, "unclean shutdown");
    }
    Ok(())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged(state) => tracing::debug!(?state, "session state"),
        SessionEvent::Resynced { republished } => {
            tracing::info!(republished, "re-announced to hub after reconnect")
        }
        SessionEvent::ResyncFailed { reason } => {
            tracing::warn!(%reason, "could not re-announce to hub")
        }
        SessionEvent::DispatchFailed { reason } => {
            tracing::warn!(%reason, "could not answer invocation")
        }
    }
}
