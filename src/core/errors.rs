use crate::core::kernel::state::ConnectionState;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Connection failed: {0}")]
    Connect(#[from] ConnectFailure),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid state transition: {event} while {from}")]
    InvalidTransition {
        from: ConnectionState,
        event: &'static str,
    },

    #[error("Session already started")]
    AlreadyStarted,

    #[error("Access token not set, authenticate first")]
    NotAuthenticated,

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Session closed")]
    Closed,
}

/// Connection step that produced a [`ConnectFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectPhase {
    Resolve,
    Connect,
    TlsHandshake,
    Handshake,
}

impl ConnectPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Connect => "connect",
            Self::TlsHandshake => "tls_handshake",
            Self::Handshake => "handshake",
        }
    }
}

impl fmt::Display for ConnectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged connection-phase failure carrying the transport error text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{phase}: {reason}")]
pub struct ConnectFailure {
    pub phase: ConnectPhase,
    pub reason: String,
}

impl ConnectFailure {
    pub fn new(phase: ConnectPhase, reason: impl fmt::Display) -> Self {
        Self {
            phase,
            reason: reason.to_string(),
        }
    }

    /// The resolve+connect deadline elapsed while in `phase`.
    pub fn timed_out(phase: ConnectPhase, deadline: Duration) -> Self {
        Self::new(phase, format!("operation timed out after {:?}", deadline))
    }

    /// The session was closed before the connection completed.
    pub fn cancelled(phase: ConnectPhase) -> Self {
        Self::new(phase, "operation cancelled")
    }
}
