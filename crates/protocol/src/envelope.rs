use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::Action;
use crate::types::Location;

/// Outbound (or Hub-pushed) request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub action: Action,
    /// Sender location.
    pub host: Location,
    /// Only serialized when set; fire-and-forget sends omit it.
    #[serde(default, skip_serializing_if = "is_false")]
    pub need_reply: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl Envelope {
    pub fn new(action: Action, host: Location, data: Option<Value>) -> Self {
        Self {
            action,
            host,
            need_reply: false,
            data,
        }
    }

    /// Marks the envelope as expecting a correlated reply.
    pub fn with_reply(mut self) -> Self {
        self.need_reply = true;
        self
    }

    /// Deserializes `data` into the given type.
    pub fn parse_data<T: for<'de> Deserialize<'de>>(&self) -> Result<Option<T>, serde_json::Error> {
        match &self.data {
            Some(v) => Ok(Some(T::deserialize(v)?)),
            None => Ok(None),
        }
    }
}

/// Reply to a correlated request.
///
/// `batch_reply` is present only for broadcast-style operations and keeps
/// the issuing order of the underlying per-target requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_reply: Option<Vec<ReplyEnvelope>>,
}

impl ReplyEnvelope {
    /// Successful reply carrying `data`.
    pub fn ok(data: impl Into<Option<Value>>) -> Self {
        Self {
            success: true,
            data: data.into(),
            error: None,
            batch_reply: None,
        }
    }

    /// Failed reply carrying the cause.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            batch_reply: None,
        }
    }

    /// Successful aggregate of per-target replies.
    pub fn batch(replies: Vec<ReplyEnvelope>) -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            batch_reply: Some(replies),
        }
    }

    /// Returns the Hub-reported cause, or a generic one if the Hub sent none.
    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "hub reported failure without a cause".into())
    }

    /// Deserializes `data` into the given type.
    pub fn parse_data<T: for<'de> Deserialize<'de>>(&self) -> Result<Option<T>, serde_json::Error> {
        match &self.data {
            Some(v) => Ok(Some(T::deserialize(v)?)),
            None => Ok(None),
        }
    }
}

/// One frame on the Client-Hub connection.
///
/// `id` is the correlation token: a reply carries the `id` of the request
/// it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Packet {
    Request { id: String, envelope: Envelope },
    Reply { id: String, reply: ReplyEnvelope },
}

impl Packet {
    pub fn request(id: impl Into<String>, envelope: Envelope) -> Self {
        Packet::Request {
            id: id.into(),
            envelope,
        }
    }

    pub fn reply(id: impl Into<String>, reply: ReplyEnvelope) -> Self {
        Packet::Reply {
            id: id.into(),
            reply,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Packet::Request { id, .. } | Packet::Reply { id, .. } => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fire_and_forget_omits_need_reply() {
        let env = Envelope::new(Action::MessageUp, "node-a".into(), None);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json, json!({"action": "message_up", "host": "node-a"}));
    }

    #[test]
    fn with_reply_sets_flag() {
        let env = Envelope::new(Action::Publish, "node-a".into(), Some(json!({"x": 1}))).with_reply();
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["needReply"], true);
        assert_eq!(json["data"]["x"], 1);
    }

    #[test]
    fn missing_need_reply_defaults_false() {
        let env: Envelope =
            serde_json::from_value(json!({"action": "message_down", "host": "hub"})).unwrap();
        assert!(!env.need_reply);
        assert!(env.data.is_none());
    }

    #[test]
    fn reply_constructors() {
        let ok = ReplyEnvelope::ok(json!(42));
        assert!(ok.success);
        assert_eq!(ok.data, Some(json!(42)));

        let fail = ReplyEnvelope::failure("nope");
        assert!(!fail.success);
        assert_eq!(fail.error_message(), "nope");

        let bare = ReplyEnvelope {
            success: false,
            data: None,
            error: None,
            batch_reply: None,
        };
        assert!(bare.error_message().contains("without a cause"));
    }

    #[test]
    fn batch_reply_uses_camel_case() {
        let batch = ReplyEnvelope::batch(vec![ReplyEnvelope::ok(None), ReplyEnvelope::failure("x")]);
        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["batchReply"].as_array().unwrap().len(), 2);
        assert_eq!(json["batchReply"][1]["error"], "x");
    }

    #[test]
    fn packet_is_tagged_by_kind() {
        let p = Packet::reply("r-1", ReplyEnvelope::ok(None));
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json, json!({"kind": "reply", "id": "r-1", "reply": {"success": true}}));
        assert_eq!(p.id(), "r-1");

        let parsed: Packet = serde_json::from_value(json!({
            "kind": "request",
            "id": "q-1",
            "envelope": {"action": "online", "host": "node-a", "needReply": true}
        }))
        .unwrap();
        match parsed {
            Packet::Request { id, envelope } => {
                assert_eq!(id, "q-1");
                assert_eq!(envelope.action, Action::Online);
                assert!(envelope.need_reply);
            }
            other => panic!("expected request, got {other:?}"),
        }
    }
}
