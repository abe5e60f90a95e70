//! Wire protocol types for hubmesh Client-Hub communication.
//!
//! Every frame on the connection is a [`Packet`]: either a request carrying
//! an [`Envelope`] or a reply carrying a [`ReplyEnvelope`], correlated by id.

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod selector;
pub mod types;

// Re-export primary types for convenience.
pub use constants::Action;
pub use envelope::{Envelope, Packet, ReplyEnvelope};
pub use messages::{MessageUpPayload, SelectorPayload};
pub use selector::{MatchPredicate, PatternMatcher, Selector};
pub use types::Location;
