//! Per-protocol envelope codecs.
//!
//! Each submodule owns one wire shape: decoding the request envelope into
//! the pieces the dispatcher needs and encoding outcomes back into that
//! protocol's bytes. Dispatch logic itself lives elsewhere; these modules
//! are pure (de)serialization.

pub mod graphql;
pub mod grpc;
pub mod http;
pub mod jsonrpc;
pub mod soap;
pub mod sse;

use serde_json::{Map, Value};

/// Argument map for a raw duplex message (WebSocket frame, gRPC stream
/// message). A JSON object becomes the map directly; any other JSON value
/// or plain text is wrapped under `"message"` so handlers always see
/// named arguments.
pub fn message_args(payload: &[u8]) -> Map<String, Value> {
    if let Ok(Value::Object(map)) = serde_json::from_slice(payload) {
        return map;
    }
    let value = match serde_json::from_slice::<Value>(payload) {
        Ok(v) => v,
        Err(_) => Value::String(String::from_utf8_lossy(payload).into_owned()),
    };
    let mut map = Map::new();
    map.insert("message".to_string(), value);
    map
}
