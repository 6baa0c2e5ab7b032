//! Protocol-neutral request unit.
//!
//! A [`Call`] is what the dispatcher hands to a handler regardless of the
//! wire protocol it arrived on. Envelope decoding (JSON-RPC object, SOAP
//! body, query string) happens before a `Call` exists; envelope encoding
//! happens after the handler's outcome is known.

use serde_json::{Map, Value};

use crate::registry::ProtocolKind;

/// One protocol-neutral request. Created per inbound message by the
/// dispatcher, consumed exactly once by a handler.
#[derive(Debug, Clone)]
pub struct Call {
    /// Protocol the request arrived on.
    pub kind: ProtocolKind,
    /// Route or service path.
    pub path: String,
    /// Method name (HTTP verb, RPC method, GraphQL field, SOAP operation).
    pub method: String,
    /// Named arguments, keys unique by map construction.
    pub args: Map<String, Value>,
    /// Opaque correlation id. Present for call-dispatch envelopes
    /// (JSON-RPC `id`), absent for the other shapes.
    pub correlation: Option<Value>,
}

impl Call {
    /// Create a call with no arguments and no correlation id.
    pub fn new(kind: ProtocolKind, path: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            method: method.into(),
            args: Map::new(),
            correlation: None,
        }
    }

    /// Attach an argument map.
    pub fn with_args(mut self, args: Map<String, Value>) -> Self {
        self.args = args;
        self
    }

    /// Attach a correlation id.
    pub fn with_correlation(mut self, id: Value) -> Self {
        self.correlation = Some(id);
        self
    }

    /// Look up a single argument.
    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }
}
