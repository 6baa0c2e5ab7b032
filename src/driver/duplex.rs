//! Duplex driver: many messages each direction over one connection.
//!
//! The driver is framing-agnostic: it speaks to a [`MessageChannel`],
//! which hides whether payloads travel in WebSocket frames or gRPC
//! length-prefixed messages. Handlers run concurrently per inbound
//! message, but responses always leave in arrival order. A bounded
//! pending window caps how far inbound reads may run ahead of responses;
//! exceeding it fails the connection with `BackpressureExceeded`.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::FuturesOrdered;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message, Utf8Bytes};
use tokio_tungstenite::WebSocketStream;

use crate::call::Call;
use crate::config::GatewayConfig;
use crate::driver::session::StreamSession;
use crate::encode::{duplex_payload, error_body};
use crate::error::{GatewayError, Result};
use crate::handler::{BoxFuture, Outcome};
use crate::registry::MethodDescriptor;
use crate::wire::{grpc, message_args};

/// Framed message transport for one duplex session.
#[async_trait]
pub trait MessageChannel: Send {
    /// Receive the next complete message payload. `None` means the peer
    /// half-closed cleanly.
    async fn recv(&mut self) -> Result<Option<Bytes>>;

    /// Send one complete message payload.
    async fn send(&mut self, payload: Bytes) -> Result<()>;

    /// Finish the session cleanly.
    async fn close(&mut self) -> Result<()>;

    /// Report a terminal error to the peer, then close. The default
    /// sends the uniform error body as a last message.
    async fn fail(&mut self, error: &GatewayError) -> Result<()> {
        let body = serde_json::to_vec(&error_body(error)).unwrap_or_default();
        self.send(Bytes::from(body)).await?;
        self.close().await
    }
}

/// Run one duplex session to completion. Returns the number of responses
/// sent.
pub async fn run<C: MessageChannel>(
    channel: &mut C,
    descriptor: &MethodDescriptor,
    config: &GatewayConfig,
) -> Result<u64> {
    let handler = descriptor.call_handler()?;
    let key = &descriptor.key;

    let mut pending: FuturesOrdered<BoxFuture<'static, Outcome>> = FuturesOrdered::new();
    let mut session = StreamSession::new();
    let mut inbound_open = true;

    enum Event {
        Outbound(Outcome),
        Inbound(Result<Option<Bytes>>),
    }

    while inbound_open || !pending.is_empty() {
        // The select only picks an event; channel writes happen after it
        // so the recv future's borrow has ended.
        let event = tokio::select! {
            Some(outcome) = pending.next(), if !pending.is_empty() => Event::Outbound(outcome),
            inbound = channel.recv(), if inbound_open => Event::Inbound(inbound),
        };

        match event {
            Event::Outbound(outcome) => {
                session.next_seq();
                channel.send(Bytes::from(duplex_payload(&outcome))).await?;
            }
            Event::Inbound(Ok(Some(payload))) => {
                if pending.len() >= config.duplex_buffer {
                    let e = GatewayError::BackpressureExceeded;
                    let _ = channel.fail(&e).await;
                    return Err(e);
                }
                let call = Call {
                    kind: key.kind,
                    path: key.path.clone(),
                    method: key.method.clone(),
                    args: message_args(&payload),
                    correlation: None,
                };
                let fut = handler.call(call);
                let deadline = config.duplex_deadline;
                pending.push_back(Box::pin(async move {
                    match tokio::time::timeout(deadline, fut).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(GatewayError::DeadlineExceeded),
                    }
                }));
            }
            Event::Inbound(Ok(None)) => {
                inbound_open = false;
                session.begin_close();
            }
            Event::Inbound(Err(e)) => {
                if !e.is_transport_loss() {
                    let _ = channel.fail(&e).await;
                }
                return Err(e);
            }
        }
    }

    channel.close().await?;
    session.close();
    Ok(session.sent())
}

/// WebSocket framing over an accepted stream.
pub struct WsChannel<S> {
    inner: WebSocketStream<S>,
}

impl<S> WsChannel<S> {
    pub fn new(inner: WebSocketStream<S>) -> Self {
        Self { inner }
    }
}

fn ws_err(e: WsError) -> GatewayError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => GatewayError::ConnectionClosed,
        WsError::Io(e) => GatewayError::Io(e),
        other => GatewayError::Protocol(other.to_string()),
    }
}

#[async_trait]
impl<S> MessageChannel for WsChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.inner.next().await {
                None => return Ok(None),
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Bytes::copy_from_slice(text.as_bytes())))
                }
                Some(Ok(Message::Binary(payload))) => return Ok(Some(payload)),
                Some(Ok(Message::Close(_))) => return Ok(None),
                // Ping/pong is answered by the protocol layer.
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => return Ok(None),
                Some(Err(e)) => return Err(ws_err(e)),
            }
        }
    }

    async fn send(&mut self, payload: Bytes) -> Result<()> {
        let message = match Utf8Bytes::try_from(payload.clone()) {
            Ok(text) => Message::Text(text),
            Err(_) => Message::Binary(payload),
        };
        self.inner.send(message).await.map_err(ws_err)
    }

    async fn close(&mut self) -> Result<()> {
        match self.inner.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(ws_err(e)),
        }
    }
}

/// Length-prefixed message framing for gRPC-style streams.
///
/// Inbound frames are reassembled through an internal buffer, so a
/// `recv` future dropped mid-message (the session loop races it against
/// handler outcomes) keeps every byte already consumed from the stream.
pub struct GrpcChannel<S> {
    stream: S,
    inbound: BytesMut,
    max_message: usize,
}

impl<S> GrpcChannel<S> {
    pub fn new(stream: S, max_message: usize) -> Self {
        Self {
            stream,
            inbound: BytesMut::new(),
            max_message,
        }
    }
}

#[async_trait]
impl<S> MessageChannel for GrpcChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(msg) = grpc::decode_message(&mut self.inbound, self.max_message)? {
                return Ok(Some(msg));
            }
            let n = self.stream.read_buf(&mut self.inbound).await?;
            if n == 0 {
                return if self.inbound.is_empty() {
                    Ok(None)
                } else {
                    Err(GatewayError::Protocol("truncated gRPC message".into()))
                };
            }
        }
    }

    async fn send(&mut self, payload: Bytes) -> Result<()> {
        self.stream.write_all(&grpc::encode_message(&payload)).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.write_all(&grpc::encode_trailer(0, "")).await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Terminal errors become a status trailer instead of a payload.
    async fn fail(&mut self, error: &GatewayError) -> Result<()> {
        self.stream
            .write_all(&grpc::encode_trailer(error.grpc_status(), &error.to_string()))
            .await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}
