//! # netsession
//!
//! A socket session lifecycle manager for TCP and UDP with:
//! - One readiness-driven event loop multiplexing every session
//! - Per-session state machines (Disconnected / Connecting / Connected / Ready)
//! - Concurrent tracking of accepted connections by session id
//! - Optional worker-thread sessions with blocking receive loops
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   UI / Command Layer                         │
//! │          (Engine methods, EngineHandle, events)              │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                       Engine                                 │
//! │        (event loop, command queue, event channel)            │
//! └──────────┬──────────────────┬───────────────────┬───────────┘
//!            │                  │                   │
//!            ▼                  ▼                   ▼
//!   ┌────────────────┐  ┌───────────────┐  ┌─────────────────┐
//!   │ ServerListener │  │ EventNotifier │  │ Worker threads  │
//!   │ (accept/recv)  │  │  (mio Poll)   │  │ (blocking recv) │
//!   └───────┬────────┘  └───────────────┘  └─────────────────┘
//!           │
//!           ▼
//!   ┌────────────────┐      ┌───────────────┐
//!   │SessionRegistry │─────▶│ ClientSession │──▶ SocketHandle
//!   │ (id → session) │      │ (state mach.) │
//!   └────────────────┘      └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod socket;
pub mod notifier;
pub mod session;
pub mod registry;
pub mod network;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{NetError, NetErrorKind, Result};
pub use config::{Config, ExecutionMode};
pub use engine::{Engine, EngineHandle};
pub use network::{ListenerState, ServerListener};
pub use registry::SessionRegistry;
pub use session::{ClientSession, ErrorScope, NetEvent, SessionId, SessionInfo, SessionKind, SessionState};
pub use socket::{parse_socket_addr, AddressFamily, SocketHandle, Transport};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of netsession
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
