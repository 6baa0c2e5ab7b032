//! Method registry: the shared, build-then-freeze routing table.
//!
//! Registration happens only during startup. The first `resolve` flips an
//! atomic freeze flag; any registration after that point is a programming
//! error and is reported as [`GatewayError::RegistryFrozen`]. Once frozen
//! the registry is read-only, so concurrent lookups from connection tasks
//! need no locking and it is shared behind a plain `Arc`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{GatewayError, Result};
use crate::handler::{CallHandler, StreamProducer};

/// Protocol tag assigned by the frame classifier. Immutable once assigned
/// to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    Rest,
    WebSocket,
    Webhook,
    Sse,
    GraphQl,
    Grpc,
    Soap,
    JsonRpc,
}

/// Interaction pattern a method follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleShape {
    /// One request, one response, close.
    Unary,
    /// One request, many pushed chunks, close.
    ServerStream,
    /// Many messages each direction.
    Duplex,
    /// Envelope-addressed method call, stateless per message.
    CallDispatch,
}

/// Registry key: protocol, route/service path, method name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub kind: ProtocolKind,
    pub path: String,
    pub method: String,
}

impl MethodKey {
    pub fn new(kind: ProtocolKind, path: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            method: method.into(),
        }
    }
}

/// The registered handler capability, one variant per handler trait.
pub enum HandlerSlot {
    Call(Arc<dyn CallHandler>),
    Stream(Arc<dyn StreamProducer>),
}

/// Identifies one registered handler. Owned exclusively by the registry,
/// never mutated after registration.
pub struct MethodDescriptor {
    pub key: MethodKey,
    pub shape: LifecycleShape,
    pub handler: HandlerSlot,
}

impl MethodDescriptor {
    /// The call handler, or a protocol error for stream-only descriptors.
    pub fn call_handler(&self) -> Result<Arc<dyn CallHandler>> {
        match &self.handler {
            HandlerSlot::Call(h) => Ok(h.clone()),
            HandlerSlot::Stream(_) => Err(GatewayError::Protocol(format!(
                "method {} is stream-shaped",
                self.key.method
            ))),
        }
    }

    /// The stream producer, or a protocol error for call-only descriptors.
    pub fn stream_producer(&self) -> Result<Arc<dyn StreamProducer>> {
        match &self.handler {
            HandlerSlot::Stream(h) => Ok(h.clone()),
            HandlerSlot::Call(_) => Err(GatewayError::Protocol(format!(
                "method {} is call-shaped",
                self.key.method
            ))),
        }
    }
}

impl std::fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("key", &self.key)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

/// Mapping from [`MethodKey`] to [`MethodDescriptor`].
pub struct MethodRegistry {
    methods: HashMap<MethodKey, Arc<MethodDescriptor>>,
    frozen: AtomicBool,
}

impl MethodRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
            frozen: AtomicBool::new(false),
        }
    }

    /// Register a descriptor.
    ///
    /// Fails with `DuplicateMethod` if the key already exists and with
    /// `RegistryFrozen` if a lookup has already happened.
    pub fn register(&mut self, descriptor: MethodDescriptor) -> Result<()> {
        let key = descriptor.key.clone();
        if self.frozen.load(Ordering::Acquire) {
            return Err(GatewayError::RegistryFrozen {
                kind: key.kind,
                path: key.path,
                method: key.method,
            });
        }
        if self.methods.contains_key(&key) {
            return Err(GatewayError::DuplicateMethod {
                kind: key.kind,
                path: key.path,
                method: key.method,
            });
        }
        self.methods.insert(key, Arc::new(descriptor));
        Ok(())
    }

    /// Resolve a key to its descriptor, freezing the registry.
    ///
    /// Repeated resolution of the same key returns the identical `Arc`.
    pub fn resolve(&self, kind: ProtocolKind, path: &str, method: &str) -> Result<Arc<MethodDescriptor>> {
        self.frozen.store(true, Ordering::Release);
        let key = MethodKey::new(kind, path, method);
        self.methods
            .get(&key)
            .cloned()
            .ok_or(GatewayError::MethodNotFound {
                kind,
                path: path.to_string(),
                method: method.to_string(),
            })
    }

    /// Resolve the descriptor bound to a path regardless of method name.
    ///
    /// Used for route-bound sessions (WebSocket, SSE) where the wire
    /// carries no method name. When several methods share the path the
    /// lexically smallest method name wins, keeping resolution
    /// deterministic.
    pub fn resolve_route(&self, kind: ProtocolKind, path: &str) -> Result<Arc<MethodDescriptor>> {
        self.frozen.store(true, Ordering::Release);
        self.methods
            .iter()
            .filter(|(k, _)| k.kind == kind && k.path == path)
            .min_by(|(a, _), (b, _)| a.method.cmp(&b.method))
            .map(|(_, d)| d.clone())
            .ok_or(GatewayError::MethodNotFound {
                kind,
                path: path.to_string(),
                method: "*".to_string(),
            })
    }

    /// Whether any method is registered under `kind` at exactly `path`.
    pub fn has_route(&self, kind: ProtocolKind, path: &str) -> bool {
        self.methods
            .keys()
            .any(|k| k.kind == kind && k.path == path)
    }

    /// Whether any path registered under `kind` is a prefix of `path`.
    /// The classifier uses this for GraphQL endpoint matching and for
    /// tagging webhook deliveries.
    pub fn has_route_prefix(&self, kind: ProtocolKind, path: &str) -> bool {
        self.methods
            .keys()
            .any(|k| k.kind == kind && path.starts_with(k.path.as_str()))
    }

    /// Whether the registry has been frozen by a lookup.
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}
