//! Server-stream driver: one request in, many pushed chunks out.
//!
//! The producer runs in its own task and pushes through a [`ChunkSink`]
//! whose capacity is one, so at most a single chunk is ever buffered
//! ahead of the wire. Peer disconnect cancels the sink within one
//! scheduling step; a producer that stalls past the chunk deadline gets
//! the stream torn down with one final error frame.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::call::Call;
use crate::driver::session::StreamSession;
use crate::encode::sse_error_frame;
use crate::error::{GatewayError, Result};
use crate::handler::ChunkSink;
use crate::registry::MethodDescriptor;
use crate::wire::sse;

/// Drives one server-stream session to completion over an event-stream
/// framed writer. Returns the number of chunks delivered.
pub async fn run<R, W>(
    descriptor: &MethodDescriptor,
    call: Call,
    chunk_deadline: Duration,
    reader: R,
    mut writer: W,
) -> Result<u64>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let producer = descriptor.stream_producer()?;

    let cancel = CancellationToken::new();
    let (sink, mut rx) = ChunkSink::channel(cancel.clone());
    let mut session = StreamSession::new();

    let producer_task = tokio::spawn(producer.produce(call, sink));

    // Consume-and-discard reader watch: the only inbound event that
    // matters mid-stream is the peer going away.
    let watch = tokio::spawn(watch_disconnect(reader, cancel.clone()));

    let result = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                break Ok(());
            }
            recv = tokio::time::timeout(chunk_deadline, rx.recv()) => match recv {
                Err(_) => {
                    let _ = writer.write_all(&sse_error_frame(&GatewayError::DeadlineExceeded)).await;
                    cancel.cancel();
                    break Err(GatewayError::DeadlineExceeded);
                }
                Ok(Some(chunk)) => {
                    session.next_seq();
                    let wrote = async {
                        writer.write_all(&sse::encode_chunk(&chunk)).await?;
                        writer.flush().await
                    }
                    .await;
                    if let Err(e) = wrote {
                        cancel.cancel();
                        let e = GatewayError::from(e);
                        // A peer that went away mid-stream is a normal end,
                        // not a failure.
                        break if e.is_transport_loss() { Ok(()) } else { Err(e) };
                    }
                }
                // Sink dropped: the producer is done.
                Ok(None) => {
                    session.begin_close();
                    break Ok(());
                }
            }
        }
    };
    watch.abort();

    if result.is_ok() && !cancel.is_cancelled() {
        match producer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = writer.write_all(&sse_error_frame(&e)).await;
                let _ = writer.flush().await;
                session.close();
                return Err(e);
            }
            Err(join) => {
                let e = GatewayError::Protocol(format!("stream producer panicked: {join}"));
                let _ = writer.write_all(&sse_error_frame(&e)).await;
                session.close();
                return Err(e);
            }
        }
    } else {
        producer_task.abort();
    }

    session.close();
    result.map(|_| session.sent())
}

async fn watch_disconnect<R>(mut reader: R, cancel: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut scratch = [0u8; 1024];
    loop {
        match reader.read(&mut scratch).await {
            Ok(0) | Err(_) => {
                cancel.cancel();
                return;
            }
            Ok(_) => {}
        }
    }
}
