//! Network Module
//!
//! Server-side listening and worker-thread receive loops.
//!
//! ## Architecture
//! - `ServerListener` accepts on the event-loop thread and owns accepted sessions
//! - `Connection` runs one blocking receive loop per worker-thread session
//! - Everything reports back to the `Engine` as `NetEvent`s

mod connection;
mod server;

pub use connection::{Connection, WorkerMessage};
pub use server::{ListenerState, ServerListener};
