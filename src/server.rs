//! Gateway construction and the accept loop.
//!
//! # Example
//!
//! ```ignore
//! let gateway = Gateway::builder()
//!     .method(ProtocolKind::JsonRpc, "/rpc", "ping", LifecycleShape::CallDispatch, |_call| async {
//!         Ok(json!("pong"))
//!     })
//!     .stream(ProtocolKind::Sse, "/sse", "GET", |_call, sink| async move {
//!         for i in 0..5 {
//!             sink.send(json!(format!("Server message {i}"))).await?;
//!         }
//!         Ok(())
//!     })
//!     .build()?;
//!
//! let listener = TcpListener::bind("127.0.0.1:8080").await?;
//! gateway.serve(listener).await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::call::Call;
use crate::config::GatewayConfig;
use crate::dispatch::Dispatcher;
use crate::error::{GatewayError, Result};
use crate::handler::{ChunkSink, Outcome};
use crate::registry::{
    HandlerSlot, LifecycleShape, MethodDescriptor, MethodKey, MethodRegistry, ProtocolKind,
};

/// Fluent gateway builder. Registration errors are stashed and reported
/// by [`GatewayBuilder::build`], so call chains stay uncluttered.
pub struct GatewayBuilder {
    registry: MethodRegistry,
    config: GatewayConfig,
    error: Option<GatewayError>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            registry: MethodRegistry::new(),
            config: GatewayConfig::default(),
            error: None,
        }
    }

    /// Register a call-answering method under one of the call shapes
    /// (Unary, CallDispatch, Duplex).
    pub fn method<F, Fut>(
        mut self,
        kind: ProtocolKind,
        path: impl Into<String>,
        name: impl Into<String>,
        shape: LifecycleShape,
        handler: F,
    ) -> Self
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        if shape == LifecycleShape::ServerStream {
            let key = MethodKey::new(kind, path, name);
            self.stash(GatewayError::Protocol(format!(
                "method {} {} is stream-shaped, register it with `stream`",
                key.path, key.method
            )));
            return self;
        }
        let descriptor = MethodDescriptor {
            key: MethodKey::new(kind, path, name),
            shape,
            handler: HandlerSlot::Call(Arc::new(handler)),
        };
        if let Err(e) = self.registry.register(descriptor) {
            self.stash(e);
        }
        self
    }

    /// Register a server-stream producer.
    pub fn stream<F, Fut>(
        mut self,
        kind: ProtocolKind,
        path: impl Into<String>,
        name: impl Into<String>,
        producer: F,
    ) -> Self
    where
        F: Fn(Call, ChunkSink) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let descriptor = MethodDescriptor {
            key: MethodKey::new(kind, path, name),
            shape: LifecycleShape::ServerStream,
            handler: HandlerSlot::Stream(Arc::new(producer)),
        };
        if let Err(e) = self.registry.register(descriptor) {
            self.stash(e);
        }
        self
    }

    pub fn max_preview_bytes(mut self, bytes: usize) -> Self {
        self.config.max_preview_bytes = bytes;
        self
    }

    pub fn classify_deadline(mut self, deadline: Duration) -> Self {
        self.config.classify_deadline = deadline;
        self
    }

    pub fn unary_deadline(mut self, deadline: Duration) -> Self {
        self.config.unary_deadline = deadline;
        self
    }

    pub fn call_deadline(mut self, deadline: Duration) -> Self {
        self.config.call_deadline = deadline;
        self
    }

    pub fn stream_chunk_deadline(mut self, deadline: Duration) -> Self {
        self.config.stream_chunk_deadline = deadline;
        self
    }

    pub fn duplex_deadline(mut self, deadline: Duration) -> Self {
        self.config.duplex_deadline = deadline;
        self
    }

    pub fn duplex_buffer(mut self, capacity: usize) -> Self {
        self.config.duplex_buffer = capacity;
        self
    }

    // First registration error wins; later ones would usually be noise
    // caused by the same mistake.
    fn stash(&mut self, error: GatewayError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Finish construction. Fails with the first registration error.
    pub fn build(self) -> Result<Gateway> {
        if let Some(e) = self.error {
            return Err(e);
        }
        info!(methods = self.registry.len(), "gateway built");
        Ok(Gateway {
            dispatcher: Dispatcher::new(Arc::new(self.registry), self.config),
            shutdown: CancellationToken::new(),
        })
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running gateway: a frozen method registry plus the accept loop.
pub struct Gateway {
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway").finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Token that stops the accept loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept connections until shutdown. Each connection runs in its own
    /// task; one misbehaving peer never stalls the loop.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, "gateway listening");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("gateway shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        // Transient accept failures (fd exhaustion, a peer
                        // resetting mid-handshake) must not kill the loop.
                        Err(e) => {
                            error!("accept failed: {e}");
                            continue;
                        }
                    };
                    let dispatcher = self.dispatcher.clone();
                    tokio::spawn(async move {
                        if let Err(e) = dispatcher.handle(stream).await {
                            if e.is_transport_loss() {
                                debug!(%peer, "connection lost: {e}");
                            } else {
                                error!(%peer, "connection failed: {e}");
                            }
                        }
                    });
                }
            }
        }
    }

    /// Serve a single already-connected stream. This is the same path a
    /// TCP connection takes, exposed for in-memory transports.
    pub async fn drive_stream<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.dispatcher.handle(stream).await
    }

    /// The frozen registry backing this gateway.
    pub fn registry(&self) -> &MethodRegistry {
        self.dispatcher.registry()
    }
}
