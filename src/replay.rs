//! Prefix-replaying stream wrapper.
//!
//! The classifier consumes initial bytes to identify a connection's
//! protocol. Those bytes still belong to the lifecycle driver (a WebSocket
//! handshake needs the whole upgrade request, a gRPC lane needs its
//! preface consumed but nothing after it). [`ReplayStream`] hands the
//! buffered prefix back to readers before touching the inner transport,
//! so classification never loses data.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A transport stream with a replayed read prefix. Writes pass straight
/// through to the inner stream.
pub struct ReplayStream<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> ReplayStream<S> {
    /// Wrap `inner`, replaying `prefix` to readers first.
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }

    /// Bytes of prefix not yet replayed.
    pub fn remaining_prefix(&self) -> usize {
        self.prefix.len()
    }

    /// Consume the wrapper, returning any unreplayed prefix and the
    /// inner stream.
    pub fn into_parts(self) -> (Bytes, S) {
        (self.prefix, self.inner)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ReplayStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.remaining());
            let chunk = self.prefix.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ReplayStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
