//! Call-dispatch driver: envelope-addressed method calls.
//!
//! Unlike the route-bound shapes, the target method name travels inside
//! each decoded envelope (JSON-RPC `method`, GraphQL top-level field,
//! SOAP body operation, gRPC route line). Dispatch is stateless per call:
//! no session state carries over between messages on the same connection.

use std::time::Duration;

use serde_json::Value;

use crate::call::Call;
use crate::error::GatewayError;
use crate::handler::Outcome;
use crate::registry::{LifecycleShape, MethodRegistry};

/// Resolve the call's embedded method name and invoke its handler under
/// `deadline`. Returns the correlation id alongside the outcome so the
/// encoder can echo it even on failure.
pub async fn dispatch(
    registry: &MethodRegistry,
    call: Call,
    deadline: Duration,
) -> (Option<Value>, Outcome) {
    let correlation = call.correlation.clone();
    let outcome = dispatch_inner(registry, call, deadline).await;
    (correlation, outcome)
}

async fn dispatch_inner(registry: &MethodRegistry, call: Call, deadline: Duration) -> Outcome {
    let descriptor = registry.resolve(call.kind, &call.path, &call.method)?;
    if descriptor.shape != LifecycleShape::CallDispatch {
        return Err(GatewayError::Protocol(format!(
            "method {} is not call-dispatch",
            call.method
        )));
    }
    let handler = descriptor.call_handler()?;
    match tokio::time::timeout(deadline, handler.call(call)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(GatewayError::DeadlineExceeded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{HandlerSlot, MethodDescriptor, MethodKey, ProtocolKind};
    use serde_json::json;
    use std::sync::Arc;

    fn registry_with_ping() -> MethodRegistry {
        let mut registry = MethodRegistry::new();
        registry
            .register(MethodDescriptor {
                key: MethodKey::new(ProtocolKind::JsonRpc, "/rpc", "ping"),
                shape: LifecycleShape::CallDispatch,
                handler: HandlerSlot::Call(Arc::new(|_call| async { Ok(json!("pong")) })),
            })
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_dispatch_by_envelope_method() {
        let registry = registry_with_ping();
        let call = Call::new(ProtocolKind::JsonRpc, "/rpc", "ping").with_correlation(json!(1));

        let (correlation, outcome) = dispatch(&registry, call, Duration::from_secs(1)).await;
        assert_eq!(correlation, Some(json!(1)));
        assert_eq!(outcome.unwrap(), json!("pong"));
    }

    #[tokio::test]
    async fn test_unknown_method_keeps_correlation() {
        let registry = registry_with_ping();
        let call = Call::new(ProtocolKind::JsonRpc, "/rpc", "nope").with_correlation(json!(42));

        let (correlation, outcome) = dispatch(&registry, call, Duration::from_secs(1)).await;
        assert_eq!(correlation, Some(json!(42)));
        assert!(matches!(outcome, Err(GatewayError::MethodNotFound { .. })));
    }

    #[tokio::test]
    async fn test_shape_mismatch_rejected() {
        let mut registry = MethodRegistry::new();
        registry
            .register(MethodDescriptor {
                key: MethodKey::new(ProtocolKind::JsonRpc, "/rpc", "ping"),
                shape: LifecycleShape::Unary,
                handler: HandlerSlot::Call(Arc::new(|_call| async { Ok(json!("pong")) })),
            })
            .unwrap();

        let call = Call::new(ProtocolKind::JsonRpc, "/rpc", "ping");
        let (_, outcome) = dispatch(&registry, call, Duration::from_secs(1)).await;
        assert!(matches!(outcome, Err(GatewayError::Protocol(_))));
    }
}
