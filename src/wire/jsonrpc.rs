//! JSON-RPC 2.0 envelope codec.
//!
//! Request:  `{"jsonrpc":"2.0","method":..,"params":..,"id":..}`
//! Success:  `{"jsonrpc":"2.0","result":..,"id":<matching>}`
//! Error:    `{"jsonrpc":"2.0","error":{"code":..,"message":..},"id":<matching>}`

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::call::Call;
use crate::error::{GatewayError, Result};
use crate::registry::ProtocolKind;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
}

/// Decode one request envelope into a [`Call`].
///
/// Positional params are mapped to argument names `"0"`, `"1"`, ... so the
/// call's argument map stays uniformly keyed.
pub fn decode_request(path: &str, body: &[u8]) -> Result<Call> {
    let req: RpcRequest = serde_json::from_slice(body)
        .map_err(|e| GatewayError::Protocol(format!("invalid JSON-RPC envelope: {e}")))?;

    if req.jsonrpc != "2.0" {
        return Err(GatewayError::Protocol(format!(
            "unsupported JSON-RPC version {:?}",
            req.jsonrpc
        )));
    }

    let args = match req.params {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(Value::Array(items)) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        Some(other) => {
            return Err(GatewayError::Protocol(format!(
                "JSON-RPC params must be object or array, got {other}"
            )))
        }
    };

    let mut call = Call::new(ProtocolKind::JsonRpc, path, req.method).with_args(args);
    if let Some(id) = req.id {
        call = call.with_correlation(id);
    }
    Ok(call)
}

/// Encode a success envelope.
pub fn encode_success(result: &Value, id: Option<&Value>) -> Vec<u8> {
    let envelope = json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id.cloned().unwrap_or(Value::Null),
    });
    serde_json::to_vec(&envelope).unwrap_or_default()
}

/// Encode an error envelope.
pub fn encode_error(error: &GatewayError, id: Option<&Value>) -> Vec<u8> {
    let envelope = json!({
        "jsonrpc": "2.0",
        "error": {
            "code": error.jsonrpc_code(),
            "message": error.to_string(),
        },
        "id": id.cloned().unwrap_or(Value::Null),
    });
    serde_json::to_vec(&envelope).unwrap_or_default()
}
