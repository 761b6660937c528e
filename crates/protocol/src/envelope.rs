use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire protocol version this crate speaks. Envelopes carrying any other
/// value are not ours to interpret and must be dropped by the reader.
pub const PROTOCOL_VERSION: u32 = 1;

/// A single line of the broker's line-delimited JSON protocol.
///
/// `payload` is carried opaquely (§9: "treat unknown response payload keys
/// as opaque passthroughs") — callers downcast it with `serde_json::from_value`
/// once they know the expected response shape for a given request type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub v: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Envelope {
    pub fn request(kind: impl Into<String>, payload: Value, request_id: impl Into<String>) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            kind: kind.into(),
            payload,
            request_id: Some(request_id.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == "error"
    }

    pub fn is_event(&self) -> bool {
        self.kind == "event"
    }

    /// Serialize as a single protocol line, newline-terminated.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Decode one line of the broker's stdout into an [`Envelope`].
///
/// Per the envelope codec's contract this never panics and never returns an
/// `Err` — a line that is not a JSON object, lacks the version constant, or
/// carries a non-string `type` is simply not ours, and decodes to `None`.
/// The broker may print unrelated diagnostic text on stdout, especially
/// during startup; callers must tolerate that silently.
pub fn decode_envelope(line: &str) -> Option<Envelope> {
    let value: Value = serde_json::from_str(line).ok()?;
    let object = value.as_object()?;

    let v = object.get("v")?.as_u64()? as u32;
    if v != PROTOCOL_VERSION {
        return None;
    }
    if !matches!(object.get("type"), Some(Value::String(_))) {
        return None;
    }

    serde_json::from_value(value).ok()
}
