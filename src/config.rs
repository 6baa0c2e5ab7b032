//! Gateway configuration.
//!
//! All values are consumed at startup and never mutated at runtime.
//! Deadlines and capacities are per-shape rather than global because the
//! lifecycle models have very different latency envelopes: a webhook must
//! answer quickly, a server stream may legitimately idle between chunks.

use std::time::Duration;

/// Default maximum bytes buffered during classification (head + body
/// preview). Connections whose envelope prefix exceeds this are rejected
/// as unclassifiable.
pub const DEFAULT_MAX_PREVIEW_BYTES: usize = 64 * 1024;

/// Default deadline for classifying a freshly accepted connection.
pub const DEFAULT_CLASSIFY_DEADLINE: Duration = Duration::from_secs(10);

/// Default deadline for unary and call-dispatch handler invocations.
pub const DEFAULT_CALL_DEADLINE: Duration = Duration::from_secs(10);

/// Default per-chunk deadline for server-stream producers.
pub const DEFAULT_CHUNK_DEADLINE: Duration = Duration::from_secs(30);

/// Default per-message deadline for duplex handlers.
pub const DEFAULT_DUPLEX_DEADLINE: Duration = Duration::from_secs(10);

/// Default duplex outbound queue capacity.
pub const DEFAULT_DUPLEX_BUFFER: usize = 64;

/// Immutable gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Maximum bytes the classifier may buffer before giving up.
    pub max_preview_bytes: usize,
    /// Deadline for the envelope prefix to arrive. A peer that connects
    /// and then stalls mid-head is cut off rather than pinned open.
    pub classify_deadline: Duration,
    /// Deadline for one unary handler invocation.
    pub unary_deadline: Duration,
    /// Deadline for one call-dispatch handler invocation.
    pub call_deadline: Duration,
    /// Deadline for a server-stream producer to yield its next chunk.
    pub stream_chunk_deadline: Duration,
    /// Deadline for one duplex per-message handler invocation.
    pub duplex_deadline: Duration,
    /// Bounded capacity of the duplex outbound queue. Overflow fails the
    /// session with `BackpressureExceeded`.
    pub duplex_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_preview_bytes: DEFAULT_MAX_PREVIEW_BYTES,
            classify_deadline: DEFAULT_CLASSIFY_DEADLINE,
            unary_deadline: DEFAULT_CALL_DEADLINE,
            call_deadline: DEFAULT_CALL_DEADLINE,
            stream_chunk_deadline: DEFAULT_CHUNK_DEADLINE,
            duplex_deadline: DEFAULT_DUPLEX_DEADLINE,
            duplex_buffer: DEFAULT_DUPLEX_BUFFER,
        }
    }
}
