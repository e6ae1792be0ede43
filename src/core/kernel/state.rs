use crate::core::errors::{ConnectFailure, ConnectPhase, SessionError};
use std::fmt;

/// Lifecycle of one physical connection.
///
/// `Idle → Resolving → Connecting → TlsHandshaking → ProtocolHandshaking →
/// Ready → Closing → Closed`. A failure in any connecting phase jumps
/// straight to `Closed`. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Resolving,
    Connecting,
    TlsHandshaking,
    ProtocolHandshaking,
    Ready,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Connection step in progress for this state, if any
    pub const fn phase(self) -> Option<ConnectPhase> {
        match self {
            Self::Resolving => Some(ConnectPhase::Resolve),
            Self::Connecting => Some(ConnectPhase::Connect),
            Self::TlsHandshaking => Some(ConnectPhase::TlsHandshake),
            Self::ProtocolHandshaking => Some(ConnectPhase::Handshake),
            Self::Idle | Self::Ready | Self::Closing | Self::Closed => None,
        }
    }

    pub const fn is_connecting(self) -> bool {
        self.phase().is_some()
    }

    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::Connecting => "connecting",
            Self::TlsHandshaking => "tls_handshaking",
            Self::ProtocolHandshaking => "protocol_handshaking",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition table for [`ConnectionState`], one method per completed step.
///
/// Holds no I/O. The session's connection task calls the step methods as each
/// asynchronous operation completes and publishes the returned state.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    failure: Option<ConnectFailure>,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    pub const fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            failure: None,
        }
    }

    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Failure that closed the machine, if it closed from a connecting phase
    pub const fn failure(&self) -> Option<&ConnectFailure> {
        self.failure.as_ref()
    }

    /// `run` was called: start resolving
    pub fn start(&mut self) -> Result<ConnectionState, SessionError> {
        self.advance(ConnectionState::Idle, ConnectionState::Resolving, "start")
    }

    pub fn resolved(&mut self) -> Result<ConnectionState, SessionError> {
        self.advance(
            ConnectionState::Resolving,
            ConnectionState::Connecting,
            "resolved",
        )
    }

    pub fn connected(&mut self) -> Result<ConnectionState, SessionError> {
        self.advance(
            ConnectionState::Connecting,
            ConnectionState::TlsHandshaking,
            "connected",
        )
    }

    pub fn tls_established(&mut self) -> Result<ConnectionState, SessionError> {
        self.advance(
            ConnectionState::TlsHandshaking,
            ConnectionState::ProtocolHandshaking,
            "tls_established",
        )
    }

    pub fn handshake_complete(&mut self) -> Result<ConnectionState, SessionError> {
        self.advance(
            ConnectionState::ProtocolHandshaking,
            ConnectionState::Ready,
            "handshake_complete",
        )
    }

    /// A connecting step failed: terminal, no retry
    pub fn fail(&mut self, failure: ConnectFailure) -> Result<ConnectionState, SessionError> {
        if !self.state.is_connecting() {
            return Err(self.invalid("fail"));
        }
        self.failure = Some(failure);
        self.state = ConnectionState::Closed;
        Ok(self.state)
    }

    /// Close requested. Idempotent while closing; a no-op once closed.
    pub fn begin_close(&mut self) -> ConnectionState {
        match self.state {
            ConnectionState::Closed | ConnectionState::Closing => {}
            ConnectionState::Idle => self.state = ConnectionState::Closed,
            _ => self.state = ConnectionState::Closing,
        }
        self.state
    }

    /// Transport torn down after `begin_close`
    pub fn closed(&mut self) -> Result<ConnectionState, SessionError> {
        self.advance(ConnectionState::Closing, ConnectionState::Closed, "closed")
    }

    fn advance(
        &mut self,
        expected: ConnectionState,
        next: ConnectionState,
        event: &'static str,
    ) -> Result<ConnectionState, SessionError> {
        if self.state != expected {
            return Err(self.invalid(event));
        }
        self.state = next;
        Ok(next)
    }

    fn invalid(&self, event: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            from: self.state,
            event,
        }
    }
}
