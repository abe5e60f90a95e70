use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::selector::Selector;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Payload of PUBLISH and UNPUBLISH, and of a filtered DISCOVER (lookup).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorPayload {
    pub selector: Selector,
}

/// Payload of MESSAGE_UP.
///
/// The Hub relays `data` to one client matching `remote`, or to every
/// matching client when `broadcast` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageUpPayload {
    pub remote: Selector,
    pub broadcast: bool,
    #[serde(default)]
    pub data: Value,
}
