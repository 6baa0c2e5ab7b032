//! Lifecycle drivers: the four state machines a connection can run.
//!
//! One driver is instantiated per connection according to its resolved
//! descriptor's shape. Drivers own all per-connection mutable state; the
//! only thing they share is the frozen registry.

pub mod call_dispatch;
pub mod duplex;
pub mod server_stream;
pub mod session;
pub mod unary;
