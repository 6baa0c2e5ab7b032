//! Response encoder: one handler outcome in, one protocol's bytes out.
//!
//! Every lane funnels through [`encode`] so the error-envelope convention
//! stays uniform: the gateway never exposes internal failures as anything
//! other than its categorized, stable codes. Encoding is deterministic
//! for identical inputs.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::handler::Outcome;
use crate::registry::ProtocolKind;
use crate::wire::{graphql, grpc, http, jsonrpc, soap, sse};

/// Per-response context the envelope needs beyond the outcome itself.
#[derive(Debug, Default, Clone)]
pub struct ResponseCtx {
    /// Correlation id for call-dispatch envelopes.
    pub correlation: Option<Value>,
    /// SOAP operation or GraphQL field the response wraps.
    pub operation: String,
}

impl ResponseCtx {
    pub fn for_operation(operation: impl Into<String>) -> Self {
        Self {
            correlation: None,
            operation: operation.into(),
        }
    }

    pub fn for_correlation(correlation: Option<Value>) -> Self {
        Self {
            correlation,
            operation: String::new(),
        }
    }
}

/// The uniform JSON error body used by REST-shaped lanes and stream
/// error frames.
pub fn error_body(error: &GatewayError) -> Value {
    json!({
        "error": {
            "code": error.jsonrpc_code(),
            "message": error.to_string(),
        }
    })
}

/// Serialize an outcome into one protocol's complete wire response.
pub fn encode(kind: ProtocolKind, ctx: &ResponseCtx, outcome: &Outcome) -> Bytes {
    match kind {
        ProtocolKind::Rest | ProtocolKind::Webhook => match outcome {
            Ok(value) => http::encode_response(
                200,
                "application/json",
                &serde_json::to_vec(value).unwrap_or_default(),
            ),
            Err(e) => http::encode_response(
                e.http_status(),
                "application/json",
                &serde_json::to_vec(&error_body(e)).unwrap_or_default(),
            ),
        },

        ProtocolKind::Soap => match outcome {
            Ok(value) => {
                http::encode_response(200, "text/xml", &soap::encode_success(&ctx.operation, value))
            }
            Err(e) => http::encode_response(e.http_status(), "text/xml", &soap::encode_fault(e)),
        },

        ProtocolKind::JsonRpc => {
            let body = match outcome {
                Ok(value) => jsonrpc::encode_success(value, ctx.correlation.as_ref()),
                Err(e) => jsonrpc::encode_error(e, ctx.correlation.as_ref()),
            };
            http::encode_response(200, "application/json", &body)
        }

        ProtocolKind::GraphQl => {
            let body = match outcome {
                Ok(value) => graphql::encode_success(&ctx.operation, value),
                Err(e) => graphql::encode_error(e),
            };
            http::encode_response(200, "application/json", &body)
        }

        ProtocolKind::Grpc => match outcome {
            Ok(value) => {
                let payload = serde_json::to_vec(value).unwrap_or_default();
                let mut buf = BytesMut::new();
                buf.put_slice(&grpc::encode_message(&payload));
                buf.put_slice(&grpc::encode_trailer(0, ""));
                buf.freeze()
            }
            Err(e) => grpc::encode_trailer(e.grpc_status(), &e.to_string()),
        },

        // SSE responses are chunk streams, not single envelopes; drivers
        // use `sse::encode_chunk` directly. A whole-outcome encode only
        // happens for pre-stream failures.
        ProtocolKind::Sse => match outcome {
            Ok(value) => sse::encode_chunk(value),
            Err(e) => http::encode_response(
                e.http_status(),
                "application/json",
                &serde_json::to_vec(&error_body(e)).unwrap_or_default(),
            ),
        },

        // WebSocket payloads travel inside codec frames; see
        // `duplex_payload`.
        ProtocolKind::WebSocket => Bytes::from(duplex_payload(outcome)),
    }
}

/// JSON payload for one duplex message response, protocol framing left to
/// the channel codec.
pub fn duplex_payload(outcome: &Outcome) -> Vec<u8> {
    match outcome {
        Ok(value) => serde_json::to_vec(value).unwrap_or_default(),
        Err(e) => serde_json::to_vec(&error_body(e)).unwrap_or_default(),
    }
}

/// The one final error frame a failing mid-stream SSE session attempts
/// before closing.
pub fn sse_error_frame(error: &GatewayError) -> Bytes {
    sse::encode_chunk(&error_body(error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rest_success() {
        let out: Outcome = Ok(json!({"message": "Hello from REST API!"}));
        let bytes = encode(ProtocolKind::Rest, &ResponseCtx::default(), &out);
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.contains("Hello from REST API!"));
    }

    #[test]
    fn test_rest_not_found() {
        let out: Outcome = Err(GatewayError::MethodNotFound {
            kind: ProtocolKind::Rest,
            path: "/x".into(),
            method: "GET".into(),
        });
        let bytes = encode(ProtocolKind::Rest, &ResponseCtx::default(), &out);
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 404"));
        assert!(text.contains("\"code\":-32601"));
    }

    #[test]
    fn test_jsonrpc_carries_correlation() {
        let ctx = ResponseCtx::for_correlation(Some(json!(1)));
        let out: Outcome = Ok(json!("pong"));
        let bytes = encode(ProtocolKind::JsonRpc, &ctx, &out);
        let text = std::str::from_utf8(&bytes).unwrap();
        let body = text.split("\r\n\r\n").nth(1).unwrap();
        let v: Value = serde_json::from_str(body).unwrap();
        assert_eq!(v["result"], "pong");
        assert_eq!(v["id"], 1);
    }

    #[test]
    fn test_graphql_wraps_field() {
        let ctx = ResponseCtx::for_operation("hello");
        let out: Outcome = Ok(json!("Hello from GraphQL!"));
        let bytes = encode(ProtocolKind::GraphQl, &ctx, &out);
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains(r#"{"data":{"hello":"Hello from GraphQL!"}}"#));
    }

    #[test]
    fn test_soap_wraps_operation() {
        let ctx = ResponseCtx::for_operation("Greet");
        let out: Outcome = Ok(json!("hi"));
        let bytes = encode(ProtocolKind::Soap, &ctx, &out);
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains("content-type: text/xml"));
        assert!(text.contains("<GreetResponse>"));
    }

    #[test]
    fn test_grpc_success_has_message_and_trailer() {
        let out: Outcome = Ok(json!("pong"));
        let bytes = encode(ProtocolKind::Grpc, &ResponseCtx::default(), &out);
        // flag + length prefix, payload, then trailer
        assert_eq!(bytes[0], 0);
        let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
        assert_eq!(&bytes[5..5 + len], b"\"pong\"");
        let trailer = std::str::from_utf8(&bytes[5 + len..]).unwrap();
        assert!(trailer.contains("grpc-status: 0"));
    }

    #[test]
    fn test_grpc_error_is_trailer_only() {
        let out: Outcome = Err(GatewayError::DeadlineExceeded);
        let bytes = encode(ProtocolKind::Grpc, &ResponseCtx::default(), &out);
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.starts_with("grpc-status: 4"));
    }

    #[test]
    fn test_duplex_payload_error_shape() {
        let out: Outcome = Err(GatewayError::BackpressureExceeded);
        let payload = duplex_payload(&out);
        let v: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(v["error"]["code"], -32003);
    }

    #[test]
    fn test_sse_error_frame() {
        let frame = sse_error_frame(&GatewayError::DeadlineExceeded);
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with("data: "));
        assert!(text.contains("deadline exceeded"));
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn test_encode_deterministic() {
        let out: Outcome = Ok(json!({"b": 1, "a": 2}));
        let a = encode(ProtocolKind::Rest, &ResponseCtx::default(), &out);
        let b = encode(ProtocolKind::Rest, &ResponseCtx::default(), &out);
        assert_eq!(a, b);
    }
}
