//! Connection identity and the per-connection lifecycle state machine.
//!
//! # Lifecycle
//!
//! ```text
//! Accepted ─► TlsHandshaking ─► WsHandshaking ─► Idle ─► Reading ─► Dispatching
//!                                                 ▲         │              │
//!                                                 │         ▼              ▼
//!                                                 └──────── Writing ◄──────┘
//!
//! any non-terminal state ─► Closed   (close request, peer close, idle timeout)
//! any non-terminal state ─► Failed   (handshake or I/O error)
//! ```
//!
//! `Reading → Writing` happens when another connection's dispatch queues an
//! outbound frame for this one: the pending read is disarmed, the frame is
//! written, and the read is re-armed from `Idle`.

use std::fmt;

use thiserror::Error;

// ── ConnectionId ──────────────────────────────────────────────────────────────

/// Stable identity of a connection.
///
/// The `index` addresses a slot in the [`Registry`](super::registry::Registry);
/// the `generation` distinguishes successive occupants of the same slot.  An id
/// therefore resolves to exactly one connection for that connection's whole
/// lifetime, and to nothing once it has been removed, even if the slot has since
/// been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId {
    index: u32,
    generation: u32,
}

impl ConnectionId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index inside the registry.
    pub fn index(self) -> u32 {
        self.index
    }

    /// Generation counter of the slot at the time of insertion.
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

// ── ConnectionState ───────────────────────────────────────────────────────────

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// TCP socket accepted and wrapped; no bytes exchanged yet.
    Accepted,
    /// TLS server handshake in progress.
    TlsHandshaking,
    /// TLS established; waiting for the HTTP Upgrade request.
    WsHandshaking,
    /// Upgraded and quiescent; no read or write pending.
    Idle,
    /// A read is armed and waiting for the next frame.
    Reading,
    /// A complete frame has been handed to the dispatcher.
    Dispatching,
    /// Outbound frames are being written.
    Writing,
    /// Closed cleanly (local request, peer close frame, or idle timeout).
    Closed,
    /// Closed because of a handshake or I/O error.
    Failed,
}

impl ConnectionState {
    /// `true` for `Closed` and `Failed`; no event leaves a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// `true` once the WebSocket upgrade has completed and until the
    /// connection terminates.
    pub fn is_established(self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Reading | Self::Dispatching | Self::Writing
        )
    }

    /// `true` for the states a broadcast should target: upgraded connections
    /// that are not in the middle of their own exchange.
    pub fn is_listening(self) -> bool {
        matches!(self, Self::Idle | Self::Reading)
    }

    /// Applies `event` and returns the next state.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::Terminal`] if the connection has already
    /// terminated, or [`TransitionError::Invalid`] if `event` cannot happen in
    /// the current state.
    pub fn next(self, event: LifecycleEvent) -> Result<Self, TransitionError> {
        use ConnectionState::*;
        use LifecycleEvent::*;

        if self.is_terminal() {
            return Err(TransitionError::Terminal { state: self, event });
        }

        let next = match (self, event) {
            (_, CloseRequested | PeerClosed | IdleTimeout) => Closed,
            (_, LifecycleEvent::Error) => Failed,
            (Accepted, TlsStarted) => TlsHandshaking,
            (TlsHandshaking, TlsEstablished) => WsHandshaking,
            (WsHandshaking, Upgraded) => Idle,
            (Idle, ReadArmed) => Reading,
            (Reading, MessageReceived) => Dispatching,
            (Dispatching, Dispatched) => Writing,
            (Idle | Reading, OutboundQueued) => Writing,
            (Writing, WriteCompleted) => Idle,
            (state, event) => return Err(TransitionError::Invalid { state, event }),
        };
        Ok(next)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accepted => "accepted",
            Self::TlsHandshaking => "tls-handshaking",
            Self::WsHandshaking => "ws-handshaking",
            Self::Idle => "idle",
            Self::Reading => "reading",
            Self::Dispatching => "dispatching",
            Self::Writing => "writing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ── LifecycleEvent ────────────────────────────────────────────────────────────

/// Something that happened to a connection's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// The raw socket was wrapped and the TLS server handshake began.
    TlsStarted,
    /// The TLS handshake succeeded.
    TlsEstablished,
    /// The HTTP Upgrade was validated and the 101 response sent.
    Upgraded,
    /// A read was issued.
    ReadArmed,
    /// A complete text or binary frame arrived.
    MessageReceived,
    /// The dispatcher returned its outbound frames.
    Dispatched,
    /// A frame routed from another connection is ready to be written.
    OutboundQueued,
    /// All pending outbound frames were written.
    WriteCompleted,
    /// The server decided to close the connection.
    CloseRequested,
    /// The peer sent a close frame or hung up.
    PeerClosed,
    /// No frame was exchanged within the idle window.
    IdleTimeout,
    /// A handshake or I/O operation failed.
    Error,
}

// ── TransitionError ───────────────────────────────────────────────────────────

/// A lifecycle event arrived that the current state does not accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("connection already {state}; cannot apply {event:?}")]
    Terminal {
        state: ConnectionState,
        event: LifecycleEvent,
    },
    #[error("event {event:?} is not valid in state {state}")]
    Invalid {
        state: ConnectionState,
        event: LifecycleEvent,
    },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
