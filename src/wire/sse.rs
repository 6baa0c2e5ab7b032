//! Server-sent events chunk framing.

use bytes::Bytes;
use serde_json::Value;

/// Encode one event: `data: <payload>\n\n`. String payloads are emitted
/// raw, everything else as its JSON serialization. Embedded newlines are
/// split into continuation `data:` lines so a multi-line payload stays one
/// event.
pub fn encode_chunk(payload: &Value) -> Bytes {
    let text = match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let mut out = String::with_capacity(text.len() + 16);
    for line in text.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    Bytes::from(out)
}
