//! Protocol-multiplexing gateway core.
//!
//! One listener accepts connections of unknown protocol. The classifier
//! inspects the initial bytes and tags each connection with a
//! [`ProtocolKind`]; the dispatcher then runs it under one of four
//! lifecycle shapes (unary, server-stream, duplex, call-dispatch) against
//! a shared build-then-freeze method registry. Handlers are
//! protocol-neutral: they consume a [`Call`] and produce a JSON outcome,
//! and the gateway takes care of each protocol's envelope, error mapping
//! and framing.
//!
//! # Quick start
//!
//! ```ignore
//! use polygate::{Gateway, LifecycleShape, ProtocolKind};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> polygate::Result<()> {
//!     let gateway = Gateway::builder()
//!         .method(ProtocolKind::JsonRpc, "/rpc", "ping", LifecycleShape::CallDispatch, |_call| async {
//!             Ok(json!("pong"))
//!         })
//!         .method(ProtocolKind::WebSocket, "/ws", "echo", LifecycleShape::Duplex, |call| async move {
//!             Ok(json!(format!("Echo: {}", call.arg("message").and_then(|v| v.as_str()).unwrap_or(""))))
//!         })
//!         .build()?;
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     gateway.serve(listener).await
//! }
//! ```

pub mod call;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod encode;
pub mod error;
pub mod handler;
pub mod registry;
pub mod replay;
pub mod server;
pub mod wire;

pub use call::Call;
pub use config::GatewayConfig;
pub use dispatch::Dispatcher;
pub use error::{GatewayError, Result};
pub use handler::{CallHandler, ChunkSink, Outcome, StreamProducer};
pub use registry::{LifecycleShape, MethodDescriptor, MethodKey, MethodRegistry, ProtocolKind};
pub use server::{Gateway, GatewayBuilder};
