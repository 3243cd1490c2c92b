use thiserror::Error;

use crate::role::Role;
use crate::transport::CloseReason;

/// Errors produced by the relay core.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("role {0} is already claimed by another peer")]
    RoleConflict(Role),

    #[error("access token mismatch")]
    TokenMismatch,

    #[error("transport already attached for role {0}")]
    TransportAlreadyAttached(Role),

    #[error("peer not recognized: {0}")]
    PeerNotRecognized(String),

    #[error("partner transport not attached for role {0}")]
    PartnerTransportNotAttached(Role),

    #[error("timed out waiting for partner")]
    HandshakeTimeout,

    #[error("transport closed")]
    TransportClosed,

    #[error("session closed")]
    SessionClosed,

    #[error("session limit reached ({0})")]
    SessionLimitReached(usize),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("closed by peer ({code}): {reason}")]
    ClosedByPeer { code: u16, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Whether the caller broke the rendezvous contract.
    ///
    /// Protocol violations are reported to the immediate caller and never
    /// retried; they leave the session untouched.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            RelayError::RoleConflict(_)
                | RelayError::TokenMismatch
                | RelayError::TransportAlreadyAttached(_)
                | RelayError::PeerNotRecognized(_)
                | RelayError::SessionNotFound(_)
                | RelayError::InvalidRequest(_)
        )
    }

    /// Close reason to send on a transport rejected with this error.
    pub fn close_reason(&self) -> CloseReason {
        match self {
            RelayError::HandshakeTimeout
            | RelayError::SessionClosed
            | RelayError::SessionLimitReached(_) => CloseReason::TryAgain(self.to_string()),
            RelayError::TransportClosed
            | RelayError::Transport(_)
            | RelayError::ClosedByPeer { .. }
            | RelayError::Io(_) => CloseReason::SessionEnded,
            _ => CloseReason::Rejected(self.to_string()),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => RelayError::TransportClosed,
            other => RelayError::Transport(other.to_string()),
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
