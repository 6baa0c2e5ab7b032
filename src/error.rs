//! Error types for the gateway core.

use thiserror::Error;

/// Main error type for all gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Initial bytes match no known framing. The connection is closed
    /// without a response; there is no protocol to answer in.
    #[error("unclassifiable frame")]
    UnclassifiableFrame,

    /// No descriptor registered under the requested key.
    #[error("method not found: {kind:?} {path} {method}")]
    MethodNotFound {
        kind: crate::registry::ProtocolKind,
        path: String,
        method: String,
    },

    /// Startup-time registration conflict. Fatal to startup.
    #[error("duplicate method: {kind:?} {path} {method}")]
    DuplicateMethod {
        kind: crate::registry::ProtocolKind,
        path: String,
        method: String,
    },

    /// Registration attempted after the registry was frozen by its
    /// first lookup. A programming error, reported rather than ignored.
    #[error("registry frozen, cannot register {kind:?} {path} {method}")]
    RegistryFrozen {
        kind: crate::registry::ProtocolKind,
        path: String,
        method: String,
    },

    /// Handler-reported domain error. Always surfaced as a wire error
    /// response in the connection's native envelope.
    #[error("handler failure ({code}): {message}")]
    Handler { code: i64, message: String },

    /// Duplex outbound queue overflowed its configured capacity.
    #[error("backpressure exceeded")]
    BackpressureExceeded,

    /// Handler abandoned past the configured deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Peer closed the connection. Normal termination, not a failure.
    #[error("connection closed")]
    ConnectionClosed,

    /// Malformed envelope or framing violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error on the transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON envelope (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Shorthand for a handler-reported domain failure.
    pub fn handler(code: i64, message: impl Into<String>) -> Self {
        Self::Handler {
            code,
            message: message.into(),
        }
    }

    /// Whether this error is ordinary transport loss: peer reset or
    /// disconnect. These terminate the driver without a response attempt
    /// and are never logged as failures.
    pub fn is_transport_loss(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// HTTP status for REST/webhook/SOAP/SSE error responses.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::MethodNotFound { .. } => 404,
            Self::Protocol(_) | Self::Json(_) => 400,
            Self::DeadlineExceeded => 504,
            Self::BackpressureExceeded => 503,
            _ => 500,
        }
    }

    /// JSON-RPC 2.0 error code.
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            Self::MethodNotFound { .. } => -32601,
            Self::Protocol(_) | Self::Json(_) => -32600,
            Self::Handler { code, .. } => *code,
            Self::DeadlineExceeded => -32002,
            Self::BackpressureExceeded => -32003,
            _ => -32603,
        }
    }

    /// gRPC status code for the response trailer.
    pub fn grpc_status(&self) -> u32 {
        match self {
            Self::MethodNotFound { .. } => 12,      // UNIMPLEMENTED
            Self::Protocol(_) | Self::Json(_) => 3, // INVALID_ARGUMENT
            Self::DeadlineExceeded => 4,            // DEADLINE_EXCEEDED
            Self::BackpressureExceeded => 8,        // RESOURCE_EXHAUSTED
            _ => 13,                                // INTERNAL
        }
    }
}

/// Result type alias using GatewayError.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProtocolKind;

    #[test]
    fn test_transport_loss_detection() {
        assert!(GatewayError::ConnectionClosed.is_transport_loss());
        assert!(GatewayError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "pipe"
        ))
        .is_transport_loss());
        assert!(!GatewayError::DeadlineExceeded.is_transport_loss());
        assert!(!GatewayError::handler(1, "x").is_transport_loss());
    }

    #[test]
    fn test_jsonrpc_codes() {
        let nf = GatewayError::MethodNotFound {
            kind: ProtocolKind::JsonRpc,
            path: "/rpc".into(),
            method: "nope".into(),
        };
        assert_eq!(nf.jsonrpc_code(), -32601);
        assert_eq!(
            GatewayError::handler(-32050, "domain").jsonrpc_code(),
            -32050
        );
        assert_eq!(GatewayError::DeadlineExceeded.jsonrpc_code(), -32002);
        assert_eq!(GatewayError::Protocol("bad".into()).jsonrpc_code(), -32600);
    }

    #[test]
    fn test_http_status_mapping() {
        let nf = GatewayError::MethodNotFound {
            kind: ProtocolKind::Rest,
            path: "/x".into(),
            method: "GET".into(),
        };
        assert_eq!(nf.http_status(), 404);
        assert_eq!(GatewayError::DeadlineExceeded.http_status(), 504);
        assert_eq!(GatewayError::BackpressureExceeded.http_status(), 503);
    }

    #[test]
    fn test_grpc_status_mapping() {
        let nf = GatewayError::MethodNotFound {
            kind: ProtocolKind::Grpc,
            path: "/svc".into(),
            method: "Call".into(),
        };
        assert_eq!(nf.grpc_status(), 12);
        assert_eq!(GatewayError::DeadlineExceeded.grpc_status(), 4);
    }
}
