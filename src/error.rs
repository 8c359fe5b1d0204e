//! Error types for netsession
//!
//! Provides a unified error type for all socket and session operations.

use std::io;

use thiserror::Error;

use crate::session::SessionId;

/// Result type alias using NetError
pub type Result<T> = std::result::Result<T, NetError>;

/// Unified error type for netsession operations
#[derive(Debug, Error)]
pub enum NetError {
    // -------------------------------------------------------------------------
    // Socket Setup Errors
    // -------------------------------------------------------------------------
    /// Socket creation, bind or listen failed. Any partial socket is released.
    #[error("Socket creation failed: {0}")]
    Creation(#[source] io::Error),

    /// Remote refused, unreachable or timed out.
    #[error("Connect failed: {0}")]
    Connect(#[source] io::Error),

    #[error("Address resolution failed: {0}")]
    AddressResolution(String),

    // -------------------------------------------------------------------------
    // Listener Errors
    // -------------------------------------------------------------------------
    /// Accepting an inbound connection failed. `fatal` is set on resource exhaustion.
    #[error("Accept failed (fatal: {fatal}): {source}")]
    Accept {
        fatal: bool,
        #[source]
        source: io::Error,
    },

    // -------------------------------------------------------------------------
    // Transfer Errors
    // -------------------------------------------------------------------------
    #[error("Send failed: {0}")]
    Send(#[source] io::Error),

    #[error("Receive failed: {0}")]
    Receive(#[source] io::Error),

    // -------------------------------------------------------------------------
    // Usage Errors
    // -------------------------------------------------------------------------
    /// Operation invoked in a state that does not allow it. No side effect occurred.
    #[error("Invalid operation: {0}")]
    Misuse(String),

    #[error("Session {0} already registered")]
    DuplicateSession(SessionId),

    #[error("Session {0} not found")]
    SessionNotFound(SessionId),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Error category reported to the UI layer in `NetEvent::Error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetErrorKind {
    Creation,
    Connect,
    Accept,
    Send,
    Receive,
    Misuse,
}

impl NetError {
    /// Classify an accept failure: resource exhaustion is fatal to the listener.
    pub fn accept(source: io::Error) -> Self {
        let fatal = is_resource_exhaustion(&source);
        NetError::Accept { fatal, source }
    }

    /// Category reported alongside this error
    pub fn kind(&self) -> NetErrorKind {
        match self {
            NetError::Creation(_) | NetError::Config(_) | NetError::Io(_) => NetErrorKind::Creation,
            NetError::Connect(_) | NetError::AddressResolution(_) => NetErrorKind::Connect,
            NetError::Accept { .. } => NetErrorKind::Accept,
            NetError::Send(_) => NetErrorKind::Send,
            NetError::Receive(_) => NetErrorKind::Receive,
            NetError::Misuse(_)
            | NetError::DuplicateSession(_)
            | NetError::SessionNotFound(_) => NetErrorKind::Misuse,
        }
    }

    /// True for accept failures that must stop the listener
    pub fn is_fatal(&self) -> bool {
        matches!(self, NetError::Accept { fatal: true, .. })
    }
}

/// Out of descriptors or buffer memory.
pub(crate) fn is_resource_exhaustion(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::OutOfMemory || is_descriptor_exhaustion(err)
}

#[cfg(unix)]
fn is_descriptor_exhaustion(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOBUFS) | Some(libc::ENOMEM)
    )
}

#[cfg(not(unix))]
fn is_descriptor_exhaustion(_err: &io::Error) -> bool {
    false
}
