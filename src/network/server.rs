//! Server Listener
//!
//! Accepts TCP connections (or receives UDP datagrams) and owns the
//! sessions it creates.
//!
//! ## Accept Flow
//! ```text
//! LISTENER_TOKEN readable
//!        │
//!        ▼
//!   accept() ──none──▶ rearm
//!        │
//!        ├── ok ──▶ limit reached? ──yes──▶ close peer, Error(Listener)
//!        │                │no
//!        │                ▼
//!        │          ClientSession::accepted ─▶ registry.add ─▶ Connected
//!        │
//!        ├── transient error ──▶ warn, Error(Listener), rearm
//!        └── fatal error ──────▶ Error(Listener), stop()
//! ```

use std::net::SocketAddr;

use bytes::Bytes;
use mio::Interest;

use crate::config::Config;
use crate::error::{NetError, NetErrorKind, Result};
use crate::notifier::{EventNotifier, Readiness, LISTENER_TOKEN};
use crate::registry::SessionRegistry;
use crate::session::{
    ClientSession, ErrorScope, NetEvent, SessionId, SessionIdAllocator, SessionState,
};
use crate::socket::{AddressFamily, SocketHandle, Transport};

/// Listener lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Listening,
}

/// A listening (TCP) or bound (UDP) socket plus the sessions it accepted
///
/// A UDP listener plays the session role itself: it is assigned one session
/// id at start, every datagram is reported under that id with its source
/// address, and the most recent source is kept for `reply()`.
#[derive(Debug)]
pub struct ServerListener {
    config: Config,
    socket: Option<SocketHandle>,
    state: ListenerState,
    transport: Transport,

    /// Accepted TCP sessions
    sessions: SessionRegistry<ClientSession>,

    /// Id reported for datagrams while listening on UDP
    datagram_id: Option<SessionId>,

    /// Source of the most recent datagram
    last_peer: Option<SocketAddr>,
}

impl ServerListener {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            socket: None,
            state: ListenerState::Stopped,
            transport: Transport::Tcp,
            sessions: SessionRegistry::new(),
            datagram_id: None,
            last_peer: None,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Bind and listen (TCP) or bind for datagrams (UDP)
    ///
    /// On failure the partial socket is released and the state stays Stopped.
    pub fn start(
        &mut self,
        family: AddressFamily,
        transport: Transport,
        port: u16,
        notifier: &EventNotifier,
        ids: &SessionIdAllocator,
    ) -> Result<()> {
        if self.state == ListenerState::Listening {
            return Err(NetError::Misuse("server is already listening".into()));
        }

        let ip = self.config.bind_addr.unwrap_or_else(|| family.unspecified());
        let addr = SocketAddr::new(ip, port);

        let mut socket = SocketHandle::create(family, transport)?;
        socket.bind(addr, self.config.reuse_address)?;
        if transport == Transport::Tcp {
            socket.listen(self.config.backlog)?;
        }
        notifier.register(&mut socket, LISTENER_TOKEN, Interest::READABLE)?;

        tracing::info!(local = ?socket.local_addr(), %transport, "Server listening");

        self.socket = Some(socket);
        self.transport = transport;
        self.state = ListenerState::Listening;
        self.last_peer = None;
        self.datagram_id = (transport == Transport::Udp).then(|| ids.next_id());
        Ok(())
    }

    /// Close the listen socket and disconnect every owned session. Idempotent.
    ///
    /// The session registry is empty when this returns.
    pub fn stop(&mut self, notifier: &EventNotifier, out: &mut Vec<NetEvent>) {
        if let Some(mut socket) = self.socket.take() {
            notifier.deregister(&mut socket, LISTENER_TOKEN);
            socket.close();
        }

        for (_, mut session) in self.sessions.drain() {
            session.disconnect(notifier, out);
        }

        if self.state == ListenerState::Listening {
            tracing::info!(transport = %self.transport, "Server stopped");
        }
        self.state = ListenerState::Stopped;
        self.datagram_id = None;
        self.last_peer = None;
    }

    // =========================================================================
    // Readiness
    // =========================================================================

    /// Handle a notification on the listen socket
    pub fn on_listener_ready(
        &mut self,
        notifier: &EventNotifier,
        ids: &SessionIdAllocator,
        buf: &mut [u8],
        out: &mut Vec<NetEvent>,
    ) {
        match self.transport {
            Transport::Tcp => self.accept_once(notifier, ids, out),
            Transport::Udp => self.receive_datagram(notifier, buf, out),
        }
    }

    fn accept_once(
        &mut self,
        notifier: &EventNotifier,
        ids: &SessionIdAllocator,
        out: &mut Vec<NetEvent>,
    ) {
        let accepted = match &self.socket {
            Some(socket) => socket.accept(),
            None => return,
        };

        match accepted {
            Ok(Some((peer_socket, peer))) => self.admit(peer_socket, peer, notifier, ids, out),
            Ok(None) => {}
            Err(e) if e.is_fatal() => {
                tracing::error!(error = %e, "Accept failed fatally, stopping listener");
                out.push(NetEvent::error(ErrorScope::Listener, &e));
                self.stop(notifier, out);
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                out.push(NetEvent::error(ErrorScope::Listener, &e));
            }
        }

        self.rearm(notifier);
    }

    fn admit(
        &mut self,
        peer_socket: SocketHandle,
        peer: SocketAddr,
        notifier: &EventNotifier,
        ids: &SessionIdAllocator,
        out: &mut Vec<NetEvent>,
    ) {
        if self.sessions.len() >= self.config.max_connections {
            tracing::warn!(%peer, limit = self.config.max_connections, "Connection limit reached, rejecting peer");
            drop(peer_socket);
            out.push(NetEvent::Error {
                scope: ErrorScope::Listener,
                kind: NetErrorKind::Accept,
                detail: format!(
                    "connection limit {} reached, rejected {}",
                    self.config.max_connections, peer
                ),
            });
            return;
        }

        let id = ids.next_id();
        let (session, event) =
            match ClientSession::accepted(id, peer_socket, peer, &self.config, notifier) {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(%peer, error = %e, "Failed to set up accepted connection");
                    out.push(NetEvent::error(ErrorScope::Listener, &e));
                    return;
                }
            };

        match self.sessions.add(id, session) {
            Ok(()) => {
                tracing::info!(%id, %peer, "Accepted connection");
                out.push(event);
            }
            Err(e) => {
                tracing::error!(%id, error = %e, "Session id collision");
                out.push(NetEvent::error(ErrorScope::Listener, &e));
            }
        }
    }

    fn receive_datagram(&mut self, notifier: &EventNotifier, buf: &mut [u8], out: &mut Vec<NetEvent>) {
        let (Some(socket), Some(id)) = (&self.socket, self.datagram_id) else {
            return;
        };

        match socket.receive_from(buf) {
            Ok(Some((n, source))) => {
                tracing::trace!(%id, len = n, %source, "Received datagram");
                self.last_peer = Some(source);
                out.push(NetEvent::DataReceived {
                    id,
                    bytes: Bytes::copy_from_slice(&buf[..n]),
                    source: Some(source),
                });
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Datagram receive failed");
                out.push(NetEvent::error(ErrorScope::Listener, &e));
            }
        }

        self.rearm(notifier);
    }

    /// Dispatch a notification to an accepted session
    ///
    /// Returns false if `id` is not one of this listener's sessions.
    pub fn on_session_ready(
        &mut self,
        id: SessionId,
        readiness: &Readiness,
        notifier: &EventNotifier,
        buf: &mut [u8],
        out: &mut Vec<NetEvent>,
    ) -> bool {
        let state = self.sessions.with_mut(id, |session| {
            session.on_readiness(readiness, notifier, buf, out);
            session.state()
        });

        match state {
            None => false,
            Some(SessionState::Disconnected) => {
                self.sessions.discard(id);
                true
            }
            Some(_) => true,
        }
    }

    fn rearm(&mut self, notifier: &EventNotifier) {
        if let Some(socket) = self.socket.as_mut() {
            notifier.rearm(socket, LISTENER_TOKEN, Interest::READABLE);
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Send to an accepted session, or reply to the last peer for the UDP id
    pub fn send(
        &mut self,
        id: SessionId,
        bytes: &[u8],
        notifier: &EventNotifier,
        out: &mut Vec<NetEvent>,
    ) -> Result<usize> {
        if self.datagram_id == Some(id) {
            return self.reply(bytes);
        }

        let (result, state) = self
            .sessions
            .with_mut(id, |session| (session.send(bytes, notifier, out), session.state()))
            .ok_or(NetError::SessionNotFound(id))?;

        if state == SessionState::Disconnected {
            self.sessions.discard(id);
        }
        result
    }

    /// Send a datagram from the bound UDP socket
    pub fn send_to(&self, remote: SocketAddr, bytes: &[u8]) -> Result<usize> {
        match (&self.socket, self.transport) {
            (Some(socket), Transport::Udp) => socket.send_to(bytes, remote),
            _ => Err(NetError::Misuse("send_to requires a listening UDP server".into())),
        }
    }

    /// Send a datagram to the most recent sender
    pub fn reply(&self, bytes: &[u8]) -> Result<usize> {
        let peer = self
            .last_peer
            .ok_or_else(|| NetError::Misuse("no datagram received yet".into()))?;
        self.send_to(peer, bytes)
    }

    /// Disconnect one accepted session. Returns whether it belonged to this listener.
    pub fn disconnect(&mut self, id: SessionId, notifier: &EventNotifier, out: &mut Vec<NetEvent>) -> bool {
        // Removed before teardown so no later dispatch can reach it
        match self.sessions.remove(id) {
            Some(mut session) => {
                session.disconnect(notifier, out);
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> ListenerState {
        self.state
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(SocketHandle::local_addr)
    }

    /// Whether `id` is an accepted session or the UDP listener itself
    pub fn owns(&self, id: SessionId) -> bool {
        self.datagram_id == Some(id) || self.sessions.contains(id)
    }

    pub fn sessions(&self) -> &SessionRegistry<ClientSession> {
        &self.sessions
    }

    /// Session id datagrams are reported under, while listening on UDP
    pub fn datagram_id(&self) -> Option<SessionId> {
        self.datagram_id
    }

    pub fn last_peer(&self) -> Option<SocketAddr> {
        self.last_peer
    }
}
