//! Per-connection stream session state.

/// Status of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

/// Mutable state scoped to one streaming connection. Owned exclusively by
/// the lifecycle driver instance and dropped with the connection.
#[derive(Debug)]
pub struct StreamSession {
    seq: u64,
    state: SessionState,
}

impl StreamSession {
    pub fn new() -> Self {
        Self {
            seq: 0,
            state: SessionState::Open,
        }
    }

    /// Advance and return the sequence number for the next sent chunk.
    pub fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Number of chunks sent so far.
    pub fn sent(&self) -> u64 {
        self.seq
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Begin an orderly close (no further chunks accepted).
    pub fn begin_close(&mut self) {
        if self.state == SessionState::Open {
            self.state = SessionState::Closing;
        }
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_monotonic() {
        let mut session = StreamSession::new();
        assert_eq!(session.next_seq(), 1);
        assert_eq!(session.next_seq(), 2);
        assert_eq!(session.sent(), 2);
    }

    #[test]
    fn test_state_transitions() {
        let mut session = StreamSession::new();
        assert!(session.is_open());

        session.begin_close();
        assert_eq!(session.state(), SessionState::Closing);

        session.close();
        assert_eq!(session.state(), SessionState::Closed);

        // Closing a closed session stays closed.
        session.begin_close();
        assert_eq!(session.state(), SessionState::Closed);
    }
}
