//! Unary driver: one request, one response, close.
//!
//! States: `AwaitingRequest -> Dispatching -> Responded -> Closed`.
//! The handler runs exactly once under the configured deadline; any
//! failure still produces exactly one response before the transition to
//! `Closed`.

use std::time::Duration;

use crate::call::Call;
use crate::error::GatewayError;
use crate::handler::Outcome;
use crate::registry::MethodDescriptor;

/// Driver state, advanced strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryState {
    AwaitingRequest,
    Dispatching,
    Responded,
    Closed,
}

/// One-shot request driver.
#[derive(Debug)]
pub struct UnaryDriver {
    state: UnaryState,
}

impl UnaryDriver {
    pub fn new() -> Self {
        Self {
            state: UnaryState::AwaitingRequest,
        }
    }

    pub fn state(&self) -> UnaryState {
        self.state
    }

    /// Invoke the handler exactly once. Always yields exactly one
    /// outcome; a deadline overrun abandons the handler future and
    /// reports `DeadlineExceeded`.
    pub async fn run(
        &mut self,
        descriptor: &MethodDescriptor,
        call: Call,
        deadline: Duration,
    ) -> Outcome {
        self.state = UnaryState::Dispatching;

        let outcome = match descriptor.call_handler() {
            Ok(handler) => match tokio::time::timeout(deadline, handler.call(call)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(GatewayError::DeadlineExceeded),
            },
            Err(e) => Err(e),
        };

        self.state = UnaryState::Responded;
        outcome
    }

    /// Mark the connection closed after the response has been written
    /// (or after a transport failure made writing impossible).
    pub fn close(&mut self) {
        self.state = UnaryState::Closed;
    }
}

impl Default for UnaryDriver {
    fn default() -> Self {
        Self::new()
    }
}
