//! Session Module
//!
//! One logical connection (TCP) or socket instance (UDP), tracked by id.
//!
//! ## State Machine
//! ```text
//! TCP:  Disconnected ──connect──▶ Connecting ──success──▶ Connected
//!            ▲                        │                       │
//!            └──────── failure ───────┘                       │
//!            └──── disconnect / peer close / I/O error ───────┘
//!
//! UDP:  Disconnected ──create──▶ Ready ──stop──▶ Disconnected
//! ```
//!
//! ## Events
//! Sessions never talk to the UI directly. Every transition is reported as a
//! `NetEvent` pushed into the caller's outbox, which the engine forwards in order.

mod client;

pub use client::ClientSession;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use mio::Token;

use crate::error::{NetError, NetErrorKind, Result};
use crate::notifier::LISTENER_TOKEN;
use crate::socket::Transport;

// =============================================================================
// Identity
// =============================================================================

/// Unique, monotonic session identity
///
/// The UI layer holds sessions only by id, never by reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(raw: u64) -> Self {
        SessionId(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// Poll token for this id
    ///
    /// Fails for ids that do not fit in a `usize` or that fall on the
    /// reserved listener/waker tokens.
    pub fn token(self) -> Result<Token> {
        match usize::try_from(self.0) {
            Ok(raw) if raw < LISTENER_TOKEN.0 => Ok(Token(raw)),
            _ => Err(NetError::Creation(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("session id {} has no usable poll token", self.0),
            ))),
        }
    }

    pub(crate) fn from_token(token: Token) -> Self {
        SessionId(token.0 as u64)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out session ids starting at 1
#[derive(Debug)]
pub struct SessionIdAllocator {
    next: AtomicU64,
}

impl SessionIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> SessionId {
        SessionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SessionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// State
// =============================================================================

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Initial and terminal state
    Disconnected,
    /// TCP connect in flight
    Connecting,
    /// TCP connection established
    Connected,
    /// UDP socket bound and usable
    Ready,
}

impl SessionState {
    /// Send/receive are legal only here
    pub fn is_transfer_ready(self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Ready)
    }
}

/// Session variant, chosen when the session is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Outbound TCP connection started by `start_client`
    TcpClient,
    /// Inbound TCP connection accepted by a listener
    TcpServer,
    /// Connectionless UDP socket
    Udp,
}

impl SessionKind {
    pub fn transport(self) -> Transport {
        match self {
            SessionKind::TcpClient | SessionKind::TcpServer => Transport::Tcp,
            SessionKind::Udp => Transport::Udp,
        }
    }
}

/// Point-in-time view of a session for the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub kind: SessionKind,
    pub state: SessionState,
    pub remote: Option<SocketAddr>,
    pub local: Option<SocketAddr>,
    pub created_at: Instant,
}

// =============================================================================
// Events
// =============================================================================

/// Where an error happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    Listener,
    Session(SessionId),
    Engine,
}

/// Events emitted to the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    /// A TCP connection was established (connect or accept)
    Connected { id: SessionId, remote: SocketAddr },

    /// A TCP session ended. Never followed by another event for `id`.
    Disconnected { id: SessionId },

    /// One bounded read. `source` is set for UDP.
    DataReceived {
        id: SessionId,
        bytes: Bytes,
        source: Option<SocketAddr>,
    },

    Error {
        scope: ErrorScope,
        kind: NetErrorKind,
        detail: String,
    },
}

impl NetEvent {
    pub(crate) fn error(scope: ErrorScope, err: &NetError) -> Self {
        NetEvent::Error {
            scope,
            kind: err.kind(),
            detail: err.to_string(),
        }
    }

    /// Session the event refers to, if any
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            NetEvent::Connected { id, .. }
            | NetEvent::Disconnected { id }
            | NetEvent::DataReceived { id, .. } => Some(*id),
            NetEvent::Error {
                scope: ErrorScope::Session(id),
                ..
            } => Some(*id),
            NetEvent::Error { .. } => None,
        }
    }
}
