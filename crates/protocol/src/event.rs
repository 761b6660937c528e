use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A broker event: a dictionary discriminated by a `kind` field.
///
/// The broker's event vocabulary is open-ended (new `delivery_*` kinds in
/// particular appear over time), so every field beyond `kind` is kept as an
/// opaque JSON map rather than a fixed struct — consumers read named fields
/// out of it with the accessors below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerEvent {
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl BrokerEvent {
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn name(&self) -> &str {
        self.str_field("name").unwrap_or("")
    }

    pub fn from_field(&self) -> &str {
        self.str_field("from").unwrap_or("")
    }

    pub fn u64_field(&self, key: &str) -> Option<u64> {
        self.fields.get(key).and_then(Value::as_u64)
    }

    pub fn i64_field(&self, key: &str) -> Option<i64> {
        self.fields.get(key).and_then(Value::as_i64)
    }

    pub fn is_delivery_update(&self) -> bool {
        self.kind.starts_with("delivery_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kind_and_exposes_remaining_fields_opaquely() {
        let value = serde_json::json!({
            "kind": "worker_ready",
            "name": "Analyst",
            "runtime": "pty",
        });
        let event: BrokerEvent = serde_json::from_value(value).unwrap();
        assert_eq!(event.kind, "worker_ready");
        assert_eq!(event.name(), "Analyst");
        assert_eq!(event.str_field("runtime"), Some("pty"));
        assert_eq!(event.str_field("missing"), None);
    }

    #[test]
    fn recognizes_delivery_prefixed_kinds() {
        let value = serde_json::json!({"kind": "delivery_queued"});
        let event: BrokerEvent = serde_json::from_value(value).unwrap();
        assert!(event.is_delivery_update());

        let value = serde_json::json!({"kind": "relaycast_published"});
        let event: BrokerEvent = serde_json::from_value(value).unwrap();
        assert!(!event.is_delivery_update());
    }
}
