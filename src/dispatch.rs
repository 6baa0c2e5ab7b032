//! Connection dispatcher.
//!
//! Takes one freshly accepted transport stream from classification through
//! lane selection to its lifecycle driver. Each lane decodes its envelope,
//! resolves a descriptor, runs the shape's driver, and encodes the outcome
//! back in the connection's native protocol. Failures are answered on the
//! wire in that protocol before the connection closes; the only silent
//! terminations are transport loss and frames no protocol claims.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::classify::{classify, require_full_replay, Preview};
use crate::config::GatewayConfig;
use crate::driver::duplex::{self, GrpcChannel, WsChannel};
use crate::driver::server_stream;
use crate::driver::unary::UnaryDriver;
use crate::driver::call_dispatch;
use crate::call::Call;
use crate::encode::{encode, ResponseCtx};
use crate::error::{GatewayError, Result};
use crate::registry::{LifecycleShape, MethodRegistry, ProtocolKind};
use crate::replay::ReplayStream;
use crate::wire::http::HttpHead;
use crate::wire::{graphql, grpc, http, jsonrpc, message_args, soap};

/// Routes accepted connections. Shares nothing mutable: the registry is
/// frozen and the config immutable, so one dispatcher serves all
/// connection tasks.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<MethodRegistry>,
    config: GatewayConfig,
}

impl Dispatcher {
    pub fn new(registry: Arc<MethodRegistry>, config: GatewayConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    /// Serve one connection to completion.
    pub async fn handle<S>(&self, mut stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let classified = tokio::time::timeout(
            self.config.classify_deadline,
            classify(&mut stream, &self.registry, self.config.max_preview_bytes),
        )
        .await;
        let (kind, mut preview) = match classified {
            Ok(result) => result?,
            // A stalled envelope prefix never earns a protocol lane, so
            // there is no wire format to answer in. Drop the connection.
            Err(_) => return Err(GatewayError::DeadlineExceeded),
        };
        debug!(?kind, path = preview.path(), "classified connection");

        match kind {
            ProtocolKind::Rest | ProtocolKind::Webhook => {
                self.serve_unary(kind, &preview, stream).await
            }
            ProtocolKind::JsonRpc => self.serve_jsonrpc(&preview, stream).await,
            ProtocolKind::GraphQl => self.serve_graphql(&preview, stream).await,
            ProtocolKind::Soap => self.serve_soap(&preview, stream).await,
            ProtocolKind::Sse => self.serve_sse(&preview, stream).await,
            ProtocolKind::WebSocket => {
                let answer = self.resolve_ws(&preview);
                match answer {
                    Err(e) => {
                        // No 101: the handshake is refused in plain HTTP.
                        let body = serde_json::to_vec(&crate::encode::error_body(&e))
                            .unwrap_or_default();
                        respond(
                            &mut stream,
                            http::encode_response(e.http_status(), "application/json", &body),
                        )
                        .await?;
                        Ok(())
                    }
                    Ok(descriptor) => {
                        require_full_replay(&mut preview);
                        let replayed = ReplayStream::new(preview.replay(), stream);
                        let ws = tokio_tungstenite::accept_async(replayed)
                            .await
                            .map_err(|e| {
                                GatewayError::Protocol(format!("WebSocket handshake failed: {e}"))
                            })?;
                        let mut channel = WsChannel::new(ws);
                        duplex::run(&mut channel, &descriptor, &self.config).await?;
                        Ok(())
                    }
                }
            }
            ProtocolKind::Grpc => self.serve_grpc(preview, stream).await,
        }
    }

    async fn serve_unary<S>(&self, kind: ProtocolKind, preview: &Preview, mut stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let head = http_head(preview)?;
        let ctx = ResponseCtx::default();

        let descriptor = match self.registry.resolve(kind, &head.path, &head.method) {
            Ok(d) => d,
            Err(e) => {
                return respond(&mut stream, encode(kind, &ctx, &Err(e))).await;
            }
        };

        let call = Call::new(kind, head.path.clone(), head.method.clone())
            .with_args(unary_args(head, &preview.body));

        let mut driver = UnaryDriver::new();
        let outcome = driver
            .run(&descriptor, call, self.config.unary_deadline)
            .await;
        respond(&mut stream, encode(kind, &ctx, &outcome)).await?;
        driver.close();
        Ok(())
    }

    async fn serve_jsonrpc<S>(&self, preview: &Preview, mut stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let path = preview.path().to_string();
        let call = match jsonrpc::decode_request(&path, &preview.body) {
            Ok(call) => call,
            Err(e) => {
                let ctx = ResponseCtx::for_correlation(None);
                return respond(&mut stream, encode(ProtocolKind::JsonRpc, &ctx, &Err(e))).await;
            }
        };

        let (correlation, outcome) =
            call_dispatch::dispatch(&self.registry, call, self.config.call_deadline).await;
        let ctx = ResponseCtx::for_correlation(correlation);
        respond(&mut stream, encode(ProtocolKind::JsonRpc, &ctx, &outcome)).await
    }

    async fn serve_graphql<S>(&self, preview: &Preview, mut stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let path = preview.path().to_string();
        let call = match graphql::decode_request(&path, &preview.body) {
            Ok(call) => call,
            Err(e) => {
                let ctx = ResponseCtx::default();
                return respond(&mut stream, encode(ProtocolKind::GraphQl, &ctx, &Err(e))).await;
            }
        };

        let ctx = ResponseCtx::for_operation(call.method.clone());
        let (_, outcome) =
            call_dispatch::dispatch(&self.registry, call, self.config.call_deadline).await;
        respond(&mut stream, encode(ProtocolKind::GraphQl, &ctx, &outcome)).await
    }

    async fn serve_soap<S>(&self, preview: &Preview, mut stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let path = preview.path().to_string();
        let call = match soap::decode_request(&path, &preview.body) {
            Ok(call) => call,
            Err(e) => {
                let ctx = ResponseCtx::default();
                return respond(&mut stream, encode(ProtocolKind::Soap, &ctx, &Err(e))).await;
            }
        };

        let ctx = ResponseCtx::for_operation(call.method.clone());
        let (_, outcome) =
            call_dispatch::dispatch(&self.registry, call, self.config.call_deadline).await;
        respond(&mut stream, encode(ProtocolKind::Soap, &ctx, &outcome)).await
    }

    async fn serve_sse<S>(&self, preview: &Preview, mut stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let head = http_head(preview)?;

        let descriptor = match self.registry.resolve(ProtocolKind::Sse, &head.path, &head.method)
        {
            Ok(d) => d,
            Err(e) => {
                let ctx = ResponseCtx::default();
                return respond(&mut stream, encode(ProtocolKind::Sse, &ctx, &Err(e))).await;
            }
        };

        stream.write_all(&http::encode_sse_head()).await?;
        stream.flush().await?;

        let call = Call::new(ProtocolKind::Sse, head.path.clone(), head.method.clone())
            .with_args(head.query_args());

        let (read_half, write_half) = tokio::io::split(stream);
        let sent = server_stream::run(
            &descriptor,
            call,
            self.config.stream_chunk_deadline,
            read_half,
            write_half,
        )
        .await?;
        debug!(sent, "event stream finished");
        Ok(())
    }

    fn resolve_ws(&self, preview: &Preview) -> Result<Arc<crate::registry::MethodDescriptor>> {
        let descriptor = self
            .registry
            .resolve_route(ProtocolKind::WebSocket, preview.path())?;
        if descriptor.shape != LifecycleShape::Duplex {
            return Err(GatewayError::Protocol(format!(
                "route {} is not duplex",
                preview.path()
            )));
        }
        Ok(descriptor)
    }

    async fn serve_grpc<S>(&self, preview: Preview, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut stream = ReplayStream::new(preview.replay(), stream);
        let (service, method) = match grpc::read_route(&mut stream).await {
            Ok(route) => route,
            Err(e) => {
                if !e.is_transport_loss() {
                    let trailer = grpc::encode_trailer(e.grpc_status(), &e.to_string());
                    let _ = respond(&mut stream, trailer).await;
                }
                return Err(e);
            }
        };

        let descriptor = match self.registry.resolve(ProtocolKind::Grpc, &service, &method) {
            Ok(d) => d,
            Err(e) => {
                let trailer = grpc::encode_trailer(e.grpc_status(), &e.to_string());
                respond(&mut stream, trailer).await?;
                return Ok(());
            }
        };

        match descriptor.shape {
            LifecycleShape::CallDispatch => {
                let payload = grpc::read_message(&mut stream, self.config.max_preview_bytes)
                    .await?
                    .ok_or(GatewayError::ConnectionClosed)?;

                let call = Call::new(ProtocolKind::Grpc, service, method)
                    .with_args(message_args(&payload));
                let (_, outcome) =
                    call_dispatch::dispatch(&self.registry, call, self.config.call_deadline).await;
                respond(
                    &mut stream,
                    encode(ProtocolKind::Grpc, &ResponseCtx::default(), &outcome),
                )
                .await
            }
            LifecycleShape::Duplex => {
                let mut channel = GrpcChannel::new(stream, self.config.max_preview_bytes);
                duplex::run(&mut channel, &descriptor, &self.config).await?;
                Ok(())
            }
            other => {
                let e = GatewayError::Protocol(format!(
                    "gRPC method {method} has unsupported shape {other:?}"
                ));
                let trailer = grpc::encode_trailer(e.grpc_status(), &e.to_string());
                respond(&mut stream, trailer).await?;
                Err(e)
            }
        }
    }
}

fn http_head(preview: &Preview) -> Result<&HttpHead> {
    preview
        .http
        .as_ref()
        .ok_or_else(|| GatewayError::Protocol("missing request head".into()))
}

/// Merge query parameters with the request body into one argument map.
/// A JSON object body contributes its fields directly; any other body is
/// kept whole under `"body"`.
fn unary_args(head: &HttpHead, body: &[u8]) -> Map<String, Value> {
    let mut args = head.query_args();
    if body.is_empty() {
        return args;
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => {
            for (k, v) in map {
                args.insert(k, v);
            }
        }
        Ok(other) => {
            args.insert("body".to_string(), other);
        }
        Err(_) => {
            args.insert(
                "body".to_string(),
                Value::String(String::from_utf8_lossy(body).into_owned()),
            );
        }
    }
    args
}

async fn respond<S>(stream: &mut S, bytes: Bytes) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ChunkSink;
    use crate::registry::{HandlerSlot, MethodDescriptor, MethodKey};
    use serde_json::json;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn dispatcher() -> Dispatcher {
        let mut registry = MethodRegistry::new();
        registry
            .register(MethodDescriptor {
                key: MethodKey::new(ProtocolKind::Rest, "/rest", "GET"),
                shape: LifecycleShape::Unary,
                handler: HandlerSlot::Call(Arc::new(|call: Call| async move {
                    Ok(json!({
                        "message": "Hello from REST API!",
                        "name": call.arg("name").cloned().unwrap_or(Value::Null),
                    }))
                })),
            })
            .unwrap();
        registry
            .register(MethodDescriptor {
                key: MethodKey::new(ProtocolKind::JsonRpc, "/rpc", "ping"),
                shape: LifecycleShape::CallDispatch,
                handler: HandlerSlot::Call(Arc::new(|_call| async { Ok(json!("pong")) })),
            })
            .unwrap();
        registry
            .register(MethodDescriptor {
                key: MethodKey::new(ProtocolKind::Sse, "/sse", "GET"),
                shape: LifecycleShape::ServerStream,
                handler: HandlerSlot::Stream(Arc::new(|_call, sink: ChunkSink| async move {
                    for i in 0..3 {
                        sink.send(json!(format!("Server message {i}"))).await?;
                    }
                    Ok(())
                })),
            })
            .unwrap();
        Dispatcher::new(Arc::new(registry), GatewayConfig::default())
    }

    async fn exchange(dispatcher: Dispatcher, request: &[u8]) -> String {
        let (mut client, server) = duplex(64 * 1024);
        client.write_all(request).await.unwrap();

        let drive = tokio::spawn(async move { dispatcher.handle(server).await });

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        drive.await.unwrap().unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_rest_round_trip() {
        let response = exchange(
            dispatcher(),
            b"GET /rest?name=Alice HTTP/1.1\r\nHost: x\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("Hello from REST API!"));
        assert!(response.contains("Alice"));
    }

    #[tokio::test]
    async fn test_rest_unknown_route_404() {
        let response = exchange(dispatcher(), b"GET /nope HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 404"));
        assert!(response.contains("-32601"));
    }

    #[tokio::test]
    async fn test_jsonrpc_ping_pong() {
        let body = br#"{"jsonrpc":"2.0","method":"ping","id":1}"#;
        let request = format!(
            "POST /rpc HTTP/1.1\r\ncontent-length: {}\r\n\r\n",
            body.len()
        );
        let mut bytes = request.into_bytes();
        bytes.extend_from_slice(body);

        let response = exchange(dispatcher(), &bytes).await;
        let payload = response.split("\r\n\r\n").nth(1).unwrap();
        let v: Value = serde_json::from_str(payload).unwrap();
        assert_eq!(v, json!({"jsonrpc": "2.0", "result": "pong", "id": 1}));
    }

    #[tokio::test]
    async fn test_sse_streams_chunks() {
        let response = exchange(
            dispatcher(),
            b"GET /sse HTTP/1.1\r\nAccept: text/event-stream\r\n\r\n",
        )
        .await;
        assert!(response.contains("content-type: text/event-stream"));
        for i in 0..3 {
            assert!(response.contains(&format!("data: Server message {i}\n\n")));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_partial_head_hits_classify_deadline() {
        let (mut client, server) = duplex(64 * 1024);
        // Incomplete head with the peer still connected: without a
        // deadline this connection task would wait forever.
        client.write_all(b"GET /rest HTTP/1.1\r\nHos").await.unwrap();

        let result = dispatcher().handle(server).await;
        assert!(matches!(result, Err(GatewayError::DeadlineExceeded)));
        drop(client);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undelivered_declared_body_hits_classify_deadline() {
        let (mut client, server) = duplex(64 * 1024);
        client
            .write_all(b"POST /rpc HTTP/1.1\r\ncontent-length: 64\r\n\r\n{\"jsonrpc\"")
            .await
            .unwrap();

        let result = dispatcher().handle(server).await;
        assert!(matches!(result, Err(GatewayError::DeadlineExceeded)));
        drop(client);
    }

    #[tokio::test]
    async fn test_ws_unregistered_route_rejected_without_upgrade() {
        let request = b"GET /nowhere HTTP/1.1\r\n\
                        Host: x\r\n\
                        Upgrade: websocket\r\n\
                        Connection: Upgrade\r\n\
                        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                        Sec-WebSocket-Version: 13\r\n\r\n";
        let response = exchange(dispatcher(), request).await;
        assert!(response.starts_with("HTTP/1.1 404"));
        assert!(!response.contains("101"));
    }

    #[tokio::test]
    async fn test_grpc_call_dispatch() {
        let mut registry = MethodRegistry::new();
        registry
            .register(MethodDescriptor {
                key: MethodKey::new(ProtocolKind::Grpc, "/example.Echo", "Say"),
                shape: LifecycleShape::CallDispatch,
                handler: HandlerSlot::Call(Arc::new(|call: Call| async move {
                    Ok(json!(format!(
                        "grpc:{}",
                        call.arg("message").and_then(Value::as_str).unwrap_or("")
                    )))
                })),
            })
            .unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry), GatewayConfig::default());

        let mut request = grpc::CLIENT_PREFACE.to_vec();
        request.extend_from_slice(b"/example.Echo/Say\r\n");
        request.extend_from_slice(&grpc::encode_message(br#"{"message":"hi"}"#));

        let (mut client, server) = duplex(64 * 1024);
        client.write_all(&request).await.unwrap();
        client.shutdown().await.unwrap();

        let drive = tokio::spawn(async move { dispatcher.handle(server).await });
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        drive.await.unwrap().unwrap();

        assert_eq!(out[0], 0);
        let len = u32::from_be_bytes([out[1], out[2], out[3], out[4]]) as usize;
        assert_eq!(&out[5..5 + len], b"\"grpc:hi\"");
        let trailer = std::str::from_utf8(&out[5 + len..]).unwrap();
        assert!(trailer.contains("grpc-status: 0"));
    }

    #[tokio::test]
    async fn test_grpc_unknown_method_trailer() {
        let dispatcher = Dispatcher::new(
            Arc::new(MethodRegistry::new()),
            GatewayConfig::default(),
        );

        let mut request = grpc::CLIENT_PREFACE.to_vec();
        request.extend_from_slice(b"/example.Echo/Nope\r\n");

        let (mut client, server) = duplex(64 * 1024);
        client.write_all(&request).await.unwrap();
        client.shutdown().await.unwrap();

        let drive = tokio::spawn(async move { dispatcher.handle(server).await });
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        drive.await.unwrap().unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("grpc-status: 12"));
    }

    #[test]
    fn test_unary_args_merges_body_object() {
        let head = http::parse_head(b"POST /rest?x=1 HTTP/1.1\r\ncontent-length: 9\r\n\r\n")
            .unwrap()
            .unwrap();
        let args = unary_args(&head, br#"{"y": 2}"#);
        assert_eq!(args.get("x"), Some(&json!("1")));
        assert_eq!(args.get("y"), Some(&json!(2)));
    }

    #[test]
    fn test_unary_args_wraps_non_object_body() {
        let head = http::parse_head(b"POST /rest HTTP/1.1\r\n\r\n").unwrap().unwrap();
        let args = unary_args(&head, b"plain text");
        assert_eq!(args.get("body"), Some(&json!("plain text")));
    }
}
