//! GraphQL query envelope codec.
//!
//! Query execution internals are external to the gateway; the dispatch
//! contract only needs the top-level field name (the registry method
//! name), the variables map, and the `data`/`errors` response envelope.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::call::Call;
use crate::error::{GatewayError, Result};
use crate::registry::ProtocolKind;

#[derive(Debug, Deserialize)]
struct GraphQlRequest {
    query: String,
    #[serde(default)]
    variables: Option<Map<String, Value>>,
}

/// Decode a query envelope into a [`Call`] addressed at the query's first
/// top-level field. Variables become the call arguments.
pub fn decode_request(path: &str, body: &[u8]) -> Result<Call> {
    let req: GraphQlRequest = serde_json::from_slice(body)
        .map_err(|e| GatewayError::Protocol(format!("invalid GraphQL envelope: {e}")))?;

    let field = top_level_field(&req.query).ok_or_else(|| {
        GatewayError::Protocol(format!("no selection set in query {:?}", req.query))
    })?;

    Ok(Call::new(ProtocolKind::GraphQl, path, field)
        .with_args(req.variables.unwrap_or_default()))
}

/// First field name inside the outermost selection set.
///
/// Handles the shorthand form (`{ ping }`) and named operations with
/// variable definitions (`query Q($n: Int) { ping(n: $n) }`). Anything
/// deeper is the executor's business, not the dispatcher's.
fn top_level_field(query: &str) -> Option<String> {
    let brace = query.find('{')?;
    let rest = query[brace + 1..]
        .trim_start_matches(|c: char| c.is_whitespace() || c == ',');

    let field: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();

    if field.is_empty() {
        None
    } else {
        Some(field)
    }
}

/// Encode a success envelope: `{"data":{<field>:<value>}}`.
pub fn encode_success(field: &str, value: &Value) -> Vec<u8> {
    let envelope = json!({ "data": { field: value } });
    serde_json::to_vec(&envelope).unwrap_or_default()
}

/// Encode an error envelope with the stable gateway code in extensions.
pub fn encode_error(error: &GatewayError) -> Vec<u8> {
    let envelope = json!({
        "errors": [{
            "message": error.to_string(),
            "extensions": { "code": error.jsonrpc_code() },
        }]
    });
    serde_json::to_vec(&envelope).unwrap_or_default()
}
