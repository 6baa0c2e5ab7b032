//! Minimal HTTP/1.1 head parsing and response encoding.
//!
//! This is not an HTTP server. The classifier needs the request line and
//! headers to pick a protocol, and the HTTP-shaped lanes (REST, webhook,
//! SSE, SOAP, JSON-RPC, GraphQL) need just enough response framing to
//! answer one request and close. Head parsing is delegated to `httparse`.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{Map, Value};

use crate::error::{GatewayError, Result};

/// Maximum header count accepted in a request head.
const MAX_HEADERS: usize = 64;

/// Parsed request head: the subset of HTTP the gateway consumes.
#[derive(Debug, Clone)]
pub struct HttpHead {
    /// Request method (GET, POST, ...).
    pub method: String,
    /// Path component of the request target, query stripped.
    pub path: String,
    /// Decoded query parameters in declaration order.
    pub query: Vec<(String, String)>,
    /// Headers with lowercased names.
    pub headers: Vec<(String, String)>,
    /// Bytes consumed by the head, including the blank line.
    pub head_len: usize,
}

impl HttpHead {
    /// First header value by lowercased name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Declared body length, zero when absent or malformed.
    pub fn content_length(&self) -> usize {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Whether the request asks for a connection upgrade to WebSocket.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("upgrade")
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false)
    }

    /// Whether the client accepts an event stream.
    pub fn accepts_event_stream(&self) -> bool {
        self.header("accept")
            .map(|v| v.to_ascii_lowercase().contains("text/event-stream"))
            .unwrap_or(false)
    }

    /// Query parameters as a JSON argument map. Later duplicates of a
    /// key overwrite earlier ones, keeping keys unique.
    pub fn query_args(&self) -> Map<String, Value> {
        let mut args = Map::new();
        for (k, v) in &self.query {
            args.insert(k.clone(), Value::String(v.clone()));
        }
        args
    }
}

/// Try to parse a request head from the buffered prefix.
///
/// Returns `Ok(None)` while the head is still incomplete.
pub fn parse_head(buf: &[u8]) -> Result<Option<HttpHead>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let head_len = match req.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(GatewayError::Protocol(format!("bad request head: {e}"))),
    };

    let method = req.method.unwrap_or("").to_string();
    let target = req.path.unwrap_or("/");
    let (path, query) = split_target(target);

    let headers = req
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_ascii_lowercase(),
                String::from_utf8_lossy(h.value).into_owned(),
            )
        })
        .collect();

    Ok(Some(HttpHead {
        method,
        path,
        query,
        headers,
        head_len,
    }))
}

/// Split a request target into path and decoded query pairs.
fn split_target(target: &str) -> (String, Vec<(String, String)>) {
    match target.split_once('?') {
        None => (target.to_string(), Vec::new()),
        Some((path, qs)) => {
            let query = qs
                .split('&')
                .filter(|p| !p.is_empty())
                .map(|pair| match pair.split_once('=') {
                    Some((k, v)) => (percent_decode(k), percent_decode(v)),
                    None => (percent_decode(pair), String::new()),
                })
                .collect();
            (path.to_string(), query)
        }
    }
}

/// Decode `%XX` escapes and `+` in a query component. Invalid escapes are
/// passed through untouched.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = &s[i + 1..i + 3];
                match u8::from_str_radix(hex, 16) {
                    Ok(b) => {
                        out.push(b);
                        i += 3;
                    }
                    Err(_) => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Reason phrase for the statuses the gateway emits.
fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// Encode a complete close-delimited HTTP/1.1 response.
pub fn encode_response(status: u16, content_type: &str, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(128 + body.len());
    buf.put_slice(format!("HTTP/1.1 {} {}\r\n", status, reason(status)).as_bytes());
    buf.put_slice(format!("content-type: {content_type}\r\n").as_bytes());
    buf.put_slice(format!("content-length: {}\r\n", body.len()).as_bytes());
    buf.put_slice(b"connection: close\r\n\r\n");
    buf.put_slice(body);
    buf.freeze()
}

/// Encode the response head that opens an SSE stream. The body follows as
/// individually flushed chunks and the stream is close-delimited.
pub fn encode_sse_head() -> Bytes {
    Bytes::from_static(
        b"HTTP/1.1 200 OK\r\n\
          content-type: text/event-stream\r\n\
          cache-control: no-cache\r\n\
          connection: close\r\n\r\n",
    )
}
