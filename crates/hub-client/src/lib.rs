//! Client side of the hubmesh service-location fabric.
//!
//! A [`HubClient`] keeps one session with the Hub: it goes online,
//! publishes selectors, discovers and invokes other clients, answers
//! messages pushed by the Hub, and re-announces itself after reconnects.

pub mod client;
pub mod correlator;
pub mod error;
pub mod handler;
pub mod registry;
mod session;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testkit;

pub use client::{HubClient, HubClientBuilder};
pub use error::{ClientError, TransportError};
pub use handler::{EchoHandler, HandlerError, HandlerFuture, InboundMessage, MessageHandler};
pub use transport::{Connector, Transport, TransportEvent, WsConnector};
pub use types::{ClientConfig, ReconnectConfig, SessionEvent, SessionState};
