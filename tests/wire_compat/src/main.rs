fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use hubmesh_protocol::{
        Action, Envelope, MessageUpPayload, Packet, ReplyEnvelope, Selector, SelectorPayload,
    };
    use serde_json::json;

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture into a packet, re-serializes it, and compares
    /// the JSON values. Returns the parsed packet for further checks.
    fn roundtrip(name: &str) -> Packet {
        let fixture = load_fixture(name);
        let parsed: Packet = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  rust:    {reserialized}"
        );
        parsed
    }

    fn request(name: &str) -> (String, Envelope) {
        match roundtrip(name) {
            Packet::Request { id, envelope } => (id, envelope),
            other => panic!("{name}: expected request, got {other:?}"),
        }
    }

    fn reply(name: &str) -> ReplyEnvelope {
        match roundtrip(name) {
            Packet::Reply { reply, .. } => reply,
            other => panic!("{name}: expected reply, got {other:?}"),
        }
    }

    #[test]
    fn fixture_request_online() {
        let (id, envelope) = request("request_online.json");
        assert_eq!(id, "0b6f3c1e-8f43-4d51-9a57-3f1b2c9a7e10");
        assert_eq!(envelope.action, Action::Online);
        assert!(envelope.need_reply);
        assert!(envelope.data.is_none());
    }

    #[test]
    fn fixture_request_publish() {
        let (_, envelope) = request("request_publish.json");
        assert_eq!(envelope.action, Action::Publish);
        let payload: SelectorPayload = envelope.parse_data().unwrap().unwrap();
        assert_eq!(
            payload.selector,
            Selector::new(json!({"service": "printer", "floor": 3, "formats": ["pdf", "ps"]}))
        );
    }

    #[test]
    fn fixture_request_lookup_uses_discover_with_selector() {
        let (_, envelope) = request("request_lookup.json");
        assert_eq!(envelope.action, Action::Discover);
        let payload: SelectorPayload = envelope.parse_data().unwrap().unwrap();
        assert_eq!(payload.selector, Selector::new(json!({"service": "*"})));
    }

    #[test]
    fn fixture_request_multiple_invoke() {
        let (_, envelope) = request("request_multiple_invoke.json");
        assert_eq!(envelope.action, Action::MessageUp);
        let payload: MessageUpPayload = envelope.parse_data().unwrap().unwrap();
        assert!(payload.broadcast);
        assert_eq!(payload.data, json!({"job": 42, "args": ["--fast"]}));
    }

    #[test]
    fn fixture_request_send_omits_need_reply() {
        let (_, envelope) = request("request_send.json");
        assert!(!envelope.need_reply);
        let payload: MessageUpPayload = envelope.parse_data().unwrap().unwrap();
        assert!(!payload.broadcast);
        assert_eq!(payload.remote, Selector::from("printer"));
    }

    #[test]
    fn fixture_request_message_down() {
        let (_, envelope) = request("request_message_down.json");
        assert_eq!(envelope.action, Action::MessageDown);
        assert_eq!(envelope.host.as_str(), "node-b");
    }

    #[test]
    fn fixture_reply_success() {
        let reply = reply("reply_success.json");
        assert!(reply.success);
        assert!(reply.error.is_none());
        assert!(reply.batch_reply.is_none());
    }

    #[test]
    fn fixture_reply_failure() {
        let reply = reply("reply_failure.json");
        assert!(!reply.success);
        assert_eq!(reply.error_message(), "selector already published by node-a");
    }

    #[test]
    fn fixture_reply_batch_keeps_order() {
        let reply = reply("reply_batch.json");
        let batch = reply.batch_reply.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].data, Some(json!({"done": true})));
        assert_eq!(batch[1].error.as_deref(), Some("busy"));
        assert_eq!(batch[2].data, Some(json!(7)));
    }

    #[test]
    fn built_packets_match_fixtures() {
        let envelope = Envelope::new(Action::Online, "node-a".into(), None).with_reply();
        let packet = Packet::request("0b6f3c1e-8f43-4d51-9a57-3f1b2c9a7e10", envelope);
        assert_eq!(
            serde_json::to_value(&packet).unwrap(),
            load_fixture("request_online.json")
        );

        let reply = ReplyEnvelope::failure("selector already published by node-a");
        let packet = Packet::reply("5d1e9a2b-3c4f-4a6b-8d7e-9f0a1b2c3d4e", reply);
        assert_eq!(
            serde_json::to_value(&packet).unwrap(),
            load_fixture("reply_failure.json")
        );
    }
}
