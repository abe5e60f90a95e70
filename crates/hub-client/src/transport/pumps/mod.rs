//! Per-connection WebSocket pumps.

pub(crate) mod ping;
pub(crate) mod read;
pub(crate) mod write;
