//! Handler traits and the stream chunk sink.
//!
//! Handlers receive a protocol-neutral [`Call`] and, for streaming shapes,
//! an explicit capability to push chunks. There is no ambient context:
//! everything a handler may touch is passed in as an argument.
//!
//! # Example
//!
//! ```ignore
//! builder.method(ProtocolKind::JsonRpc, "/rpc", "ping", LifecycleShape::CallDispatch, |_call| async {
//!     Ok(json!("pong"))
//! });
//!
//! builder.stream(ProtocolKind::Sse, "/sse", "GET", |_call, sink| async move {
//!     for i in 0..5 {
//!         sink.send(json!(format!("Server message {i}"))).await?;
//!     }
//!     Ok(())
//! });
//! ```

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::call::Call;
use crate::error::{GatewayError, Result};

/// Outcome of one handler invocation: an opaque success payload or a
/// categorized failure.
pub type Outcome = Result<Value>;

/// Boxed future returned by handler trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A handler that answers one call with one outcome.
///
/// Used by the Unary, CallDispatch and Duplex (per-message) shapes.
pub trait CallHandler: Send + Sync + 'static {
    /// Consume the call and produce an outcome.
    fn call(&self, call: Call) -> BoxFuture<'static, Outcome>;
}

impl<F, Fut> CallHandler for F
where
    F: Fn(Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    fn call(&self, call: Call) -> BoxFuture<'static, Outcome> {
        Box::pin((self)(call))
    }
}

/// A producer that answers one call with zero or more pushed chunks.
///
/// Used by the ServerStream shape. Returning `Ok(())` signals normal
/// completion; any error ends the stream after one final error frame.
pub trait StreamProducer: Send + Sync + 'static {
    /// Run the producer, pushing chunks through `sink` until done.
    fn produce(&self, call: Call, sink: ChunkSink) -> BoxFuture<'static, Result<()>>;
}

impl<F, Fut> StreamProducer for F
where
    F: Fn(Call, ChunkSink) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn produce(&self, call: Call, sink: ChunkSink) -> BoxFuture<'static, Result<()>> {
        Box::pin((self)(call, sink))
    }
}

/// Capability handed to a [`StreamProducer`] for pushing chunks.
///
/// The channel capacity is one: a chunk is flushed to the wire before the
/// next `send` completes, bounding buffered output to a single chunk.
/// Cancellation (peer disconnect, shutdown) makes every subsequent `send`
/// fail with [`GatewayError::ConnectionClosed`] within one scheduling step.
#[derive(Clone)]
pub struct ChunkSink {
    tx: mpsc::Sender<Value>,
    cancel: CancellationToken,
}

impl ChunkSink {
    /// Create a sink and its receiving end.
    pub fn channel(cancel: CancellationToken) -> (Self, mpsc::Receiver<Value>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx, cancel }, rx)
    }

    /// Push one chunk. Suspends until the previous chunk is flushed.
    pub async fn send(&self, chunk: Value) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(GatewayError::ConnectionClosed),
            sent = self.tx.send(chunk) => {
                sent.map_err(|_| GatewayError::ConnectionClosed)
            }
        }
    }

    /// Whether the stream has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
