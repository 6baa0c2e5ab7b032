//! gRPC-framed lane: length-prefixed messages and a status trailer.
//!
//! The gateway does not implement an HTTP/2 codec (an h2 terminator is
//! assumed upstream). What remains of gRPC at this seam is its
//! service-dispatch contract: a `/package.Service/Method` route, standard
//! length-prefixed messages (1-byte compressed flag + u32 BE length), and
//! a `grpc-status` trailer. The route arrives as one CRLF-terminated line
//! standing in for the `:path` pseudo-header.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{GatewayError, Result};

/// HTTP/2 client connection preface.
pub const CLIENT_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Length of a message prefix: compressed flag + payload length.
pub const MESSAGE_PREFIX_LEN: usize = 5;

/// Whether the buffered prefix begins with the h2 client preface.
/// Partial buffers match as long as they are a prefix of the preface.
pub fn is_grpc_preface(buf: &[u8]) -> bool {
    if buf.len() >= CLIENT_PREFACE.len() {
        buf.starts_with(CLIENT_PREFACE)
    } else {
        CLIENT_PREFACE.starts_with(buf) && !buf.is_empty()
    }
}

/// Read the CRLF-terminated route line and split it into
/// `(service_path, method)`.
pub async fn read_route<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(String, String)> {
    let mut line = Vec::with_capacity(64);
    let mut byte = [0u8; 1];
    loop {
        let n = reader.read(&mut byte).await?;
        if n == 0 {
            return Err(GatewayError::ConnectionClosed);
        }
        if byte[0] == b'\n' {
            break;
        }
        if byte[0] != b'\r' {
            line.push(byte[0]);
        }
        if line.len() > 1024 {
            return Err(GatewayError::Protocol("gRPC route line too long".into()));
        }
    }

    let route = String::from_utf8(line)
        .map_err(|_| GatewayError::Protocol("gRPC route is not UTF-8".into()))?;

    let (service, method) = route
        .rsplit_once('/')
        .filter(|(s, m)| !s.is_empty() && !m.is_empty())
        .ok_or_else(|| GatewayError::Protocol(format!("malformed gRPC route {route:?}")))?;

    Ok((service.to_string(), method.to_string()))
}

/// Decode one complete message from the front of `buf`. `Ok(None)` means
/// more bytes are needed; partial contents stay in the buffer, so callers
/// accumulate reads and retry without losing progress.
pub fn decode_message(buf: &mut BytesMut, max_len: usize) -> Result<Option<Bytes>> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] > 1 {
        return Err(GatewayError::Protocol(format!(
            "invalid gRPC compressed flag {}",
            buf[0]
        )));
    }
    if buf.len() < MESSAGE_PREFIX_LEN {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if len > max_len {
        return Err(GatewayError::Protocol(format!(
            "gRPC message length {len} exceeds maximum {max_len}"
        )));
    }
    if buf.len() < MESSAGE_PREFIX_LEN + len {
        return Ok(None);
    }
    buf.advance(MESSAGE_PREFIX_LEN);
    Ok(Some(buf.split_to(len).freeze()))
}

/// Read one length-prefixed message. `Ok(None)` on clean EOF between
/// messages (half-close), which ends the inbound direction.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> Result<Option<Bytes>> {
    let mut buf = BytesMut::with_capacity(MESSAGE_PREFIX_LEN);
    loop {
        if let Some(msg) = decode_message(&mut buf, max_len)? {
            return Ok(Some(msg));
        }
        let n = reader.read_buf(&mut buf).await?;
        if n == 0 {
            // EOF before the first byte is a half-close, not an error.
            return if buf.is_empty() {
                Ok(None)
            } else {
                Err(GatewayError::Protocol("truncated gRPC message".into()))
            };
        }
    }
}

/// Encode one uncompressed length-prefixed message.
pub fn encode_message(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(MESSAGE_PREFIX_LEN + payload.len());
    buf.put_u8(0);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Encode the status trailer block that terminates a call.
pub fn encode_trailer(status: u32, message: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(48 + message.len());
    buf.put_slice(format!("grpc-status: {status}\r\n").as_bytes());
    if !message.is_empty() {
        buf.put_slice(format!("grpc-message: {message}\r\n").as_bytes());
    }
    buf.put_slice(b"\r\n");
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_preface_detection() {
        assert!(is_grpc_preface(CLIENT_PREFACE));
        assert!(is_grpc_preface(b"PRI * HTTP/2.0"));
        assert!(!is_grpc_preface(b"GET / HTTP/1.1"));
        assert!(!is_grpc_preface(b""));
    }

    #[tokio::test]
    async fn test_read_route() {
        let mut cursor = Cursor::new(b"/example.Echo/Say\r\nrest".to_vec());
        let (service, method) = read_route(&mut cursor).await.unwrap();
        assert_eq!(service, "/example.Echo");
        assert_eq!(method, "Say");
    }

    #[tokio::test]
    async fn test_read_route_rejects_bare_path() {
        let mut cursor = Cursor::new(b"no-slashes\r\n".to_vec());
        assert!(read_route(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn test_message_round_trip() {
        let encoded = encode_message(b"{\"x\":1}");
        let mut cursor = Cursor::new(encoded.to_vec());
        let msg = read_message(&mut cursor, 1024).await.unwrap().unwrap();
        assert_eq!(&msg[..], b"{\"x\":1}");
    }

    #[test]
    fn test_decode_partial_prefix_retained() {
        let framed = encode_message(b"\"hello\"");
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&framed[..2]);
        assert!(decode_message(&mut buf, 1024).unwrap().is_none());
        assert_eq!(buf.len(), 2);

        buf.extend_from_slice(&framed[2..6]);
        assert!(decode_message(&mut buf, 1024).unwrap().is_none());
        assert_eq!(buf.len(), 6);

        buf.extend_from_slice(&framed[6..]);
        let msg = decode_message(&mut buf, 1024).unwrap().unwrap();
        assert_eq!(&msg[..], b"\"hello\"");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_leaves_following_frame() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_message(b"a"));
        buf.extend_from_slice(&encode_message(b"b"));

        let first = decode_message(&mut buf, 1024).unwrap().unwrap();
        assert_eq!(&first[..], b"a");
        let second = decode_message(&mut buf, 1024).unwrap().unwrap();
        assert_eq!(&second[..], b"b");
        assert!(decode_message(&mut buf, 1024).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_message_truncated_rejected() {
        let framed = encode_message(b"\"hello\"");
        let mut cursor = Cursor::new(framed[..4].to_vec());
        assert!(read_message(&mut cursor, 1024).await.is_err());
    }

    #[tokio::test]
    async fn test_read_message_half_close() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(read_message(&mut cursor, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_message_length_cap() {
        let mut framed = vec![0u8];
        framed.extend_from_slice(&1_000_000u32.to_be_bytes());
        let mut cursor = Cursor::new(framed);
        assert!(read_message(&mut cursor, 1024).await.is_err());
    }

    #[tokio::test]
    async fn test_read_message_bad_flag() {
        let mut framed = vec![7u8];
        framed.extend_from_slice(&0u32.to_be_bytes());
        let mut cursor = Cursor::new(framed);
        assert!(read_message(&mut cursor, 1024).await.is_err());
    }

    #[test]
    fn test_trailer_shape() {
        let trailer = encode_trailer(0, "");
        assert_eq!(&trailer[..], b"grpc-status: 0\r\n\r\n");

        let trailer = encode_trailer(12, "unimplemented");
        let text = std::str::from_utf8(&trailer).unwrap();
        assert!(text.contains("grpc-status: 12\r\n"));
        assert!(text.contains("grpc-message: unimplemented\r\n"));
    }
}
