//! Frame classifier.
//!
//! Inspects the initial bytes of an accepted connection and tags it with
//! a [`ProtocolKind`]. Classification is side-effect-free: no bytes are
//! written, and everything consumed is retained in the [`Preview`] so the
//! lifecycle driver can have it replayed. Rules apply in priority order:
//!
//! 1. upgrade handshake header          -> WebSocket
//! 2. `"jsonrpc":"2.0"` envelope        -> JsonRpc
//! 3. SOAP envelope namespace           -> Soap
//! 4. registered GraphQL endpoint path  -> GraphQl
//! 5. binary framed (h2 preface or
//!    length-prefixed first bytes)      -> Grpc
//! 6. `Accept: text/event-stream`       -> Sse
//! 7. fallback                          -> Rest (Webhook when the path
//!    has a registered webhook handler)

use bytes::{Bytes, BytesMut};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{GatewayError, Result};
use crate::registry::{MethodRegistry, ProtocolKind};
use crate::wire::{grpc, http::HttpHead, http::parse_head, soap};

/// Everything the classifier consumed, plus what it learned.
#[derive(Debug)]
pub struct Preview {
    /// All bytes read from the transport during classification.
    buffered: Bytes,
    /// Offset from which `buffered` must be replayed to the driver.
    /// Lanes whose envelope is fully decoded here replay nothing; the
    /// WebSocket lane replays the whole handshake request; the gRPC lane
    /// replays whatever followed the preface.
    replay_from: usize,
    /// Parsed request head for HTTP-shaped connections.
    pub http: Option<HttpHead>,
    /// Request body bytes (bounded by the preview limit).
    pub body: Bytes,
}

impl Preview {
    /// Bytes the lifecycle driver must see again.
    pub fn replay(&self) -> Bytes {
        self.buffered.slice(self.replay_from..)
    }

    /// Request path, `/` for non-HTTP lanes.
    pub fn path(&self) -> &str {
        self.http.as_ref().map(|h| h.path.as_str()).unwrap_or("/")
    }
}

/// Read initial bytes from `stream` and classify the connection.
///
/// Fails with [`GatewayError::UnclassifiableFrame`] when the bytes match
/// no known framing or the envelope prefix exceeds `max_preview` bytes.
pub async fn classify<S: AsyncRead + Unpin>(
    stream: &mut S,
    registry: &MethodRegistry,
    max_preview: usize,
) -> Result<(ProtocolKind, Preview)> {
    let mut buf = BytesMut::with_capacity(4 * 1024);
    let mut chunk = [0u8; 4 * 1024];

    loop {
        // Full h2 preface settles it without waiting for more.
        if buf.len() >= grpc::CLIENT_PREFACE.len() && buf.starts_with(grpc::CLIENT_PREFACE) {
            return Ok((
                ProtocolKind::Grpc,
                Preview {
                    replay_from: grpc::CLIENT_PREFACE.len(),
                    buffered: buf.freeze(),
                    http: None,
                    body: Bytes::new(),
                },
            ));
        }

        if !buf.is_empty() && !grpc::is_grpc_preface(&buf) {
            match parse_head(&buf) {
                Ok(Some(head)) => {
                    let preview = finish_http(stream, buf, head, max_preview).await?;
                    let kind = classify_http(&preview, registry);
                    return Ok((kind, preview));
                }
                Ok(None) => {} // head incomplete, keep reading
                Err(_) => {
                    // Not HTTP. A leading compressed-flag byte means a
                    // bare length-prefixed binary frame.
                    if buf[0] <= 1 {
                        return Ok((
                            ProtocolKind::Grpc,
                            Preview {
                                replay_from: 0,
                                buffered: buf.freeze(),
                                http: None,
                                body: Bytes::new(),
                            },
                        ));
                    }
                    return Err(GatewayError::UnclassifiableFrame);
                }
            }
        }

        if buf.len() > max_preview {
            return Err(GatewayError::UnclassifiableFrame);
        }

        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return if buf.is_empty() {
                Err(GatewayError::ConnectionClosed)
            } else {
                Err(GatewayError::UnclassifiableFrame)
            };
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Read the declared body (bounded) so envelope-sniffing rules can apply.
async fn finish_http<S: AsyncRead + Unpin>(
    stream: &mut S,
    mut buf: BytesMut,
    head: HttpHead,
    max_preview: usize,
) -> Result<Preview> {
    let body_len = head.content_length();
    let total = head.head_len + body_len;
    if total > max_preview {
        return Err(GatewayError::UnclassifiableFrame);
    }

    let mut chunk = [0u8; 4 * 1024];
    while buf.len() < total {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(GatewayError::UnclassifiableFrame);
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let buffered = buf.freeze();
    let body = buffered.slice(head.head_len..total);
    Ok(Preview {
        buffered,
        // Default: envelope fully decoded here. The WebSocket branch
        // rewrites this to replay the handshake.
        replay_from: total,
        http: Some(head),
        body,
    })
}

fn classify_http(preview: &Preview, registry: &MethodRegistry) -> ProtocolKind {
    let head = preview
        .http
        .as_ref()
        .expect("classify_http called with parsed head");

    if head.is_websocket_upgrade() {
        return ProtocolKind::WebSocket;
    }
    if is_jsonrpc_envelope(&preview.body) {
        return ProtocolKind::JsonRpc;
    }
    if soap::is_soap_envelope(&preview.body) {
        return ProtocolKind::Soap;
    }
    if registry.has_route_prefix(ProtocolKind::GraphQl, &head.path) {
        return ProtocolKind::GraphQl;
    }
    if head.accepts_event_stream() {
        return ProtocolKind::Sse;
    }
    if head.method == "POST" && registry.has_route(ProtocolKind::Webhook, &head.path) {
        return ProtocolKind::Webhook;
    }
    ProtocolKind::Rest
}

fn is_jsonrpc_envelope(body: &[u8]) -> bool {
    if !body.trim_ascii_start().starts_with(b"{") {
        return false;
    }
    matches!(
        serde_json::from_slice::<Value>(body),
        Ok(Value::Object(map)) if map.get("jsonrpc").and_then(Value::as_str) == Some("2.0")
    )
}

/// Mark the preview as needing a full replay of the handshake request.
/// Used by the WebSocket lane, whose codec performs its own handshake.
pub fn require_full_replay(preview: &mut Preview) {
    preview.replay_from = 0;
}
