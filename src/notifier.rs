//! Event Notifier
//!
//! Bridges socket readiness into the single-threaded event loop.
//!
//! ## Delivery Contract
//! - One `Readiness` per readiness transition of a registered socket
//! - The consumer performs one bounded I/O operation per notification, then
//!   calls `rearm()`; if the condition still holds, a fresh notification is
//!   delivered on the next poll (level-triggered, never accumulated)
//! - Notifications for a token are dropped once it has been deregistered,
//!   including ones already fetched in the current batch
//!
//! ## Reserved Tokens
//! ```text
//! ┌────────────────────┬───────────────────────────────┐
//! │ Token              │ Source                        │
//! ├────────────────────┼───────────────────────────────┤
//! │ usize::MAX         │ Waker (commands, worker msgs) │
//! │ usize::MAX - 1     │ Server listen socket          │
//! │ 1 ..               │ Session id                    │
//! └────────────────────┴───────────────────────────────┘
//! ```

use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use mio::event::Event;
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::Mutex;

use crate::error::{NetError, Result};
use crate::socket::SocketHandle;

/// Token of the waker used by other threads to interrupt `poll()`
pub const WAKE_TOKEN: Token = Token(usize::MAX);

/// Token of the server's listen (or bound datagram) socket
pub const LISTENER_TOKEN: Token = Token(usize::MAX - 1);

/// One readiness notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    pub read_closed: bool,
    pub write_closed: bool,
    pub error: bool,
}

impl Readiness {
    fn from_event(event: &Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable(),
            writable: event.is_writable(),
            read_closed: event.is_read_closed(),
            write_closed: event.is_write_closed(),
            error: event.is_error(),
        }
    }

    /// Peer closed at least one direction
    pub fn is_closed(&self) -> bool {
        self.read_closed || self.write_closed
    }
}

/// Readiness poller shared by the listener and every session
#[derive(Debug)]
pub struct EventNotifier {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,

    /// Tokens currently registered; anything else is stale
    live: Mutex<HashSet<Token>>,
}

impl EventNotifier {
    /// Create a notifier fetching at most `capacity` events per poll
    pub fn new(capacity: usize) -> Result<Self> {
        let poll = Poll::new().map_err(NetError::Creation)?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN).map_err(NetError::Creation)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(capacity),
            waker: Arc::new(waker),
            live: Mutex::new(HashSet::new()),
        })
    }

    /// Start delivering notifications for `handle` under `token`
    pub fn register(&self, handle: &mut SocketHandle, token: Token, interest: Interest) -> Result<()> {
        self.poll
            .registry()
            .register(handle, token, interest)
            .map_err(NetError::Creation)?;
        self.live.lock().insert(token);
        Ok(())
    }

    /// Change the interest set of a registered handle
    pub fn reregister(&self, handle: &mut SocketHandle, token: Token, interest: Interest) -> Result<()> {
        self.poll.registry().reregister(handle, token, interest)?;
        Ok(())
    }

    /// Re-enable delivery after one bounded operation
    pub fn rearm(&self, handle: &mut SocketHandle, token: Token, interest: Interest) {
        if !self.is_registered(token) {
            return;
        }
        if let Err(e) = self.poll.registry().reregister(handle, token, interest) {
            tracing::warn!(token = token.0, error = %e, "Failed to rearm socket");
        }
    }

    /// Stop delivering notifications for `token`. Safe to call more than once.
    pub fn deregister(&self, handle: &mut SocketHandle, token: Token) {
        if !self.live.lock().remove(&token) {
            return;
        }
        if handle.is_pollable() {
            if let Err(e) = self.poll.registry().deregister(handle) {
                tracing::debug!(token = token.0, error = %e, "Deregister failed");
            }
        }
    }

    pub fn is_registered(&self, token: Token) -> bool {
        self.live.lock().contains(&token)
    }

    /// Waker for other threads
    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    /// Wait for readiness, up to `timeout` (None = indefinitely)
    ///
    /// Wake-ups are consumed here; only socket notifications are returned.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<Readiness>> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        }

        let live = self.live.lock();
        let ready: Vec<Readiness> = self
            .events
            .iter()
            .filter(|event| event.token() != WAKE_TOKEN && live.contains(&event.token()))
            .map(Readiness::from_event)
            .collect();

        tracing::trace!(count = ready.len(), "Fetched readiness");
        Ok(ready)
    }
}
