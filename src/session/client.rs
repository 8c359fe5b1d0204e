//! Client Session
//!
//! One logical connection: wraps a SocketHandle and runs its
//! connect/disconnect/send/receive state machine.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel::Sender;
use mio::{Interest, Token, Waker};

use crate::config::Config;
use crate::error::{NetError, Result};
use crate::network::{Connection, WorkerMessage};
use crate::notifier::{EventNotifier, Readiness};
use crate::socket::{AddressFamily, SocketHandle, Transport};

use super::{ErrorScope, NetEvent, SessionId, SessionInfo, SessionKind, SessionState};

/// A single TCP connection or UDP socket instance
///
/// ## Threading
/// Event-loop sessions are touched only on the loop thread. Worker-thread
/// sessions additionally own a thread blocked on receive, which reports back
/// through `WorkerMessage`s and never touches this struct.
#[derive(Debug)]
pub struct ClientSession {
    id: SessionId,
    token: Token,
    kind: SessionKind,
    socket: SocketHandle,
    state: SessionState,

    /// Peer for TCP, default destination for UDP
    remote: Option<SocketAddr>,

    created_at: Instant,

    /// Receive thread in worker-thread mode
    worker: Option<JoinHandle<()>>,

    /// Teardown was requested locally; the worker's closing error is expected
    closing: bool,
}

impl ClientSession {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Start a non-blocking TCP connect driven by the event loop
    ///
    /// Returns the `Connected` event if the connect completed immediately.
    pub fn connect(
        id: SessionId,
        remote: SocketAddr,
        config: &Config,
        notifier: &EventNotifier,
    ) -> Result<(Self, Option<NetEvent>)> {
        let token = id.token()?;
        let mut socket = SocketHandle::create(AddressFamily::of(&remote), Transport::Tcp)?;
        let completed = socket.connect(remote)?;

        if config.nodelay {
            socket.set_nodelay(true)?;
        }

        let (state, interest) = if completed {
            (SessionState::Connected, Interest::READABLE)
        } else {
            (SessionState::Connecting, Interest::WRITABLE)
        };

        // On failure `socket` is dropped, closing the descriptor
        notifier.register(&mut socket, token, interest)?;

        let session = Self::with_socket(id, token, SessionKind::TcpClient, socket, state, Some(remote));
        let event = completed.then_some(NetEvent::Connected { id, remote });

        tracing::debug!(%id, peer = %remote, ?state, "Client session created");
        Ok((session, event))
    }

    /// Connect in blocking mode and hand the receive path to a worker thread
    pub fn connect_worker(
        id: SessionId,
        remote: SocketAddr,
        config: &Config,
        sender: Sender<WorkerMessage>,
        waker: Arc<Waker>,
    ) -> Result<(Self, NetEvent)> {
        let token = id.token()?;
        let mut socket = SocketHandle::create(AddressFamily::of(&remote), Transport::Tcp)?;

        let connect_timeout =
            (config.connect_timeout_ms > 0).then(|| Duration::from_millis(config.connect_timeout_ms));
        socket.connect_blocking(remote, connect_timeout)?;

        if config.nodelay {
            socket.set_nodelay(true)?;
        }
        let write_timeout =
            (config.write_timeout_ms > 0).then(|| Duration::from_millis(config.write_timeout_ms));
        socket.set_write_timeout(write_timeout)?;

        let reader = socket.try_clone_blocking()?;
        let worker = Connection::new(id, reader, sender, waker, config.recv_buffer_size).spawn()?;

        let mut session = Self::with_socket(
            id,
            token,
            SessionKind::TcpClient,
            socket,
            SessionState::Connected,
            Some(remote),
        );
        session.worker = Some(worker);

        tracing::debug!(%id, peer = %remote, "Worker session connected");
        Ok((session, NetEvent::Connected { id, remote }))
    }

    /// Create a UDP session, ready immediately (no handshake)
    ///
    /// `remote` is the default destination for `send()`.
    pub fn datagram(
        id: SessionId,
        family: AddressFamily,
        remote: SocketAddr,
        notifier: &EventNotifier,
    ) -> Result<Self> {
        let token = id.token()?;
        let mut socket = SocketHandle::create(family, Transport::Udp)?;
        socket.bind(SocketAddr::new(family.unspecified(), 0), false)?;
        notifier.register(&mut socket, token, Interest::READABLE)?;

        tracing::debug!(%id, local = ?socket.local_addr(), "UDP session ready");
        Ok(Self::with_socket(
            id,
            token,
            SessionKind::Udp,
            socket,
            SessionState::Ready,
            Some(remote),
        ))
    }

    /// Wrap a socket returned by a listener's accept
    pub fn accepted(
        id: SessionId,
        mut socket: SocketHandle,
        remote: SocketAddr,
        config: &Config,
        notifier: &EventNotifier,
    ) -> Result<(Self, NetEvent)> {
        let token = id.token()?;
        if config.nodelay {
            socket.set_nodelay(true)?;
        }
        notifier.register(&mut socket, token, Interest::READABLE)?;

        let session = Self::with_socket(
            id,
            token,
            SessionKind::TcpServer,
            socket,
            SessionState::Connected,
            Some(remote),
        );
        Ok((session, NetEvent::Connected { id, remote }))
    }

    fn with_socket(
        id: SessionId,
        token: Token,
        kind: SessionKind,
        socket: SocketHandle,
        state: SessionState,
        remote: Option<SocketAddr>,
    ) -> Self {
        Self {
            id,
            token,
            kind,
            socket,
            state,
            remote,
            created_at: Instant::now(),
            worker: None,
            closing: false,
        }
    }

    // =========================================================================
    // Readiness
    // =========================================================================

    /// Handle one readiness notification with at most one bounded I/O operation
    pub fn on_readiness(
        &mut self,
        readiness: &Readiness,
        notifier: &EventNotifier,
        buf: &mut [u8],
        out: &mut Vec<NetEvent>,
    ) {
        match self.state {
            SessionState::Connecting => self.finish_connect(notifier, out),
            SessionState::Connected | SessionState::Ready => {
                if readiness.readable || readiness.is_closed() || readiness.error {
                    self.receive_once(notifier, buf, out);
                }
            }
            SessionState::Disconnected => {}
        }
    }

    fn finish_connect(&mut self, notifier: &EventNotifier, out: &mut Vec<NetEvent>) {
        let outcome = self.socket.finish_connect().and_then(|peer| match peer {
            Some(peer) => notifier
                .reregister(&mut self.socket, self.token, Interest::READABLE)
                .map(|_| Some(peer)),
            None => Ok(None),
        });

        match outcome {
            Ok(Some(peer)) => {
                tracing::info!(id = %self.id, peer = %peer, "Connection established");
                self.state = SessionState::Connected;
                self.remote = Some(peer);
                out.push(NetEvent::Connected {
                    id: self.id,
                    remote: peer,
                });
            }
            Ok(None) => {
                // Still in progress
                notifier.rearm(&mut self.socket, self.token, Interest::WRITABLE);
            }
            Err(e) => {
                tracing::info!(id = %self.id, peer = ?self.remote, error = %e, "Connection failed");
                self.release(notifier);
                self.state = SessionState::Disconnected;
                out.push(NetEvent::error(ErrorScope::Session(self.id), &e));
            }
        }
    }

    fn receive_once(&mut self, notifier: &EventNotifier, buf: &mut [u8], out: &mut Vec<NetEvent>) {
        match self.kind.transport() {
            Transport::Tcp => match self.socket.receive(buf) {
                Ok(Some(0)) => {
                    tracing::debug!(id = %self.id, peer = ?self.remote, "Peer closed connection");
                    self.drop_connection(notifier, out);
                }
                Ok(Some(n)) => {
                    tracing::trace!(id = %self.id, len = n, "Received data");
                    out.push(NetEvent::DataReceived {
                        id: self.id,
                        bytes: Bytes::copy_from_slice(&buf[..n]),
                        source: None,
                    });
                    notifier.rearm(&mut self.socket, self.token, Interest::READABLE);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(id = %self.id, peer = ?self.remote, error = %e, "Receive failed");
                    out.push(NetEvent::error(ErrorScope::Session(self.id), &e));
                    self.drop_connection(notifier, out);
                }
            },
            Transport::Udp => match self.socket.receive_from(buf) {
                Ok(Some((n, source))) => {
                    tracing::trace!(id = %self.id, len = n, %source, "Received datagram");
                    out.push(NetEvent::DataReceived {
                        id: self.id,
                        bytes: Bytes::copy_from_slice(&buf[..n]),
                        source: Some(source),
                    });
                    notifier.rearm(&mut self.socket, self.token, Interest::READABLE);
                }
                Ok(None) => {}
                Err(e) => {
                    // Datagram errors do not end a connectionless session
                    tracing::warn!(id = %self.id, error = %e, "Datagram receive failed");
                    out.push(NetEvent::error(ErrorScope::Session(self.id), &e));
                    notifier.rearm(&mut self.socket, self.token, Interest::READABLE);
                }
            },
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Single send to the peer (TCP) or the default destination (UDP)
    ///
    /// Rejected with `Misuse` and no side effect unless Connected/Ready. A
    /// TCP send failure is pushed as `Error` and drives the session to
    /// Disconnected; the error is also returned.
    pub fn send(
        &mut self,
        bytes: &[u8],
        notifier: &EventNotifier,
        out: &mut Vec<NetEvent>,
    ) -> Result<usize> {
        self.check_transfer_ready("send")?;

        match self.kind.transport() {
            Transport::Tcp => match self.socket.send(bytes) {
                Ok(n) => {
                    tracing::trace!(id = %self.id, len = n, "Sent data");
                    Ok(n)
                }
                Err(e) => {
                    tracing::warn!(id = %self.id, peer = ?self.remote, error = %e, "Send failed");
                    // Reported ahead of the Disconnected it causes
                    out.push(NetEvent::error(ErrorScope::Session(self.id), &e));
                    self.closing = true;
                    self.drop_connection(notifier, out);
                    Err(e)
                }
            },
            Transport::Udp => {
                let remote = self
                    .remote
                    .ok_or_else(|| NetError::Misuse("UDP session has no default destination".into()))?;
                self.socket.send_to(bytes, remote)
            }
        }
    }

    /// Single datagram to an explicit address
    pub fn send_to(&mut self, remote: SocketAddr, bytes: &[u8]) -> Result<usize> {
        if self.kind != SessionKind::Udp {
            return Err(NetError::Misuse(format!(
                "send_to on TCP session {}",
                self.id
            )));
        }
        self.check_transfer_ready("send_to")?;
        self.socket.send_to(bytes, remote)
    }

    /// Tear the session down. Idempotent.
    ///
    /// Emits `Disconnected` exactly once, and only for a TCP session that
    /// reached Connected.
    pub fn disconnect(&mut self, notifier: &EventNotifier, out: &mut Vec<NetEvent>) {
        self.stop_worker();
        self.drop_connection(notifier, out);
    }

    /// Shut the socket down and wait for the receive thread to exit
    ///
    /// The worker's final `Closed` message is already queued when this returns.
    pub fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.closing = true;
            self.socket.shutdown();
            if worker.join().is_err() {
                tracing::error!(id = %self.id, "Worker thread panicked");
            }
        }
    }

    fn drop_connection(&mut self, notifier: &EventNotifier, out: &mut Vec<NetEvent>) {
        if self.worker.is_some() {
            // The blocked read returns and the worker posts `Closed`; teardown continues from there
            self.socket.shutdown();
            return;
        }

        let was_connected = self.state == SessionState::Connected;
        self.release(notifier);
        self.state = SessionState::Disconnected;

        if was_connected && self.kind.transport() == Transport::Tcp {
            tracing::debug!(id = %self.id, peer = ?self.remote, "Session disconnected");
            out.push(NetEvent::Disconnected { id: self.id });
        }
    }

    fn release(&mut self, notifier: &EventNotifier) {
        notifier.deregister(&mut self.socket, self.token);
        self.socket.close();
    }

    fn check_transfer_ready(&self, op: &str) -> Result<()> {
        if self.state.is_transfer_ready() {
            Ok(())
        } else {
            Err(NetError::Misuse(format!(
                "{} on session {} while {:?}",
                op, self.id, self.state
            )))
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            kind: self.kind,
            state: self.state,
            remote: self.remote,
            local: self.socket.local_addr(),
            created_at: self.created_at,
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.stop_worker();
    }
}
