use thiserror::Error;
use tracing::debug;

use crate::{auth::AuthRejection, store::StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Matching,
    Replaying,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticating)
                | (Authenticating, Matching)
                | (Authenticating, Closing)
                | (Matching, Replaying)
                | (Replaying, Active)
                | (Replaying, Closing)
                | (Active, Closing)
                | (Closing, Closed)
        )
    }
}

/// Why a session left `Active` (or never reached it).
#[derive(Debug, Error)]
pub enum SessionEnd {
    #[error("rejected: {0}")]
    Rejected(AuthRejection),

    #[error("peer closed")]
    PeerClosed,

    #[error("transport: {0}")]
    Transport(#[from] axum::Error),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("outbound delivery failed")]
    DeliveryFailed,

    #[error("history unavailable: {0}")]
    History(StoreError),

    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Tracks where a connection is in its lifecycle.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
}

impl Session {
    pub fn new() -> Self {
        Session { state: SessionState::Connecting }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal session transition {:?} -> {next:?}",
            self.state
        );
        debug!(from = ?self.state, to = ?next, "session");
        self.state = next;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
