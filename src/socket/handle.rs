//! Socket Handle
//!
//! Exclusive owner of one OS socket descriptor.

use std::io::{self, Read, Write};
use std::net::{self, Shutdown, SocketAddr};
use std::time::Duration;

use mio::event::Source;
use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Interest, Registry, Token};
use socket2::{SockAddr, Socket};

use crate::error::{NetError, Result};

use super::{AddressFamily, Transport};

/// The descriptor in whichever shape its lifecycle has reached
#[derive(Debug)]
enum Descriptor {
    /// Created, not yet bound/listening/connected
    Unbound(Socket),

    /// Listening TCP socket (non-blocking)
    Listener(TcpListener),

    /// Connected or connecting TCP stream (non-blocking)
    Stream(TcpStream),

    /// Bound UDP socket (non-blocking)
    Datagram(UdpSocket),

    /// Connected TCP stream in blocking mode, for worker-thread sessions
    Blocking(net::TcpStream),
}

/// Owns one socket descriptor
///
/// Exactly one `ClientSession` or `ServerListener` owns a handle. The
/// descriptor is released exactly once: by `close()`, by a failed setup
/// step, or on drop. Closing twice is a no-op.
#[derive(Debug)]
pub struct SocketHandle {
    family: AddressFamily,
    transport: Transport,
    local_addr: Option<SocketAddr>,
    descriptor: Option<Descriptor>,
}

impl SocketHandle {
    // =========================================================================
    // Creation
    // =========================================================================

    /// Create a non-blocking socket for the family and transport
    pub fn create(family: AddressFamily, transport: Transport) -> Result<Self> {
        let socket = Socket::new(
            family.domain(),
            transport.socket_type(),
            Some(transport.protocol()),
        )
        .map_err(NetError::Creation)?;

        // On failure `socket` is dropped here, releasing the descriptor
        socket.set_nonblocking(true).map_err(NetError::Creation)?;

        tracing::trace!(%family, %transport, "Socket created");

        Ok(Self {
            family,
            transport,
            local_addr: None,
            descriptor: Some(Descriptor::Unbound(socket)),
        })
    }

    /// Wrap a stream returned by `accept()`
    fn from_accepted(stream: TcpStream) -> Result<Self> {
        let local_addr = stream.local_addr()?;

        Ok(Self {
            family: AddressFamily::of(&local_addr),
            transport: Transport::Tcp,
            local_addr: Some(local_addr),
            descriptor: Some(Descriptor::Stream(stream)),
        })
    }

    // =========================================================================
    // Server Setup
    // =========================================================================

    /// Bind to a local address
    ///
    /// UDP sockets are ready for datagrams once bound. TCP sockets still need `listen()`.
    pub fn bind(&mut self, addr: SocketAddr, reuse_address: bool) -> Result<()> {
        let socket = self.take_unbound("bind")?;

        // Dropping `socket` releases the descriptor
        if !self.family.matches(&addr) {
            return Err(NetError::Creation(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot bind {} socket to {}", self.family, addr),
            )));
        }

        let bound = (|| -> io::Result<SocketAddr> {
            if reuse_address {
                socket.set_reuse_address(true)?;
            }
            socket.bind(&SockAddr::from(addr))?;
            socket
                .local_addr()?
                .as_socket()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "not an IP address"))
        })();

        let local_addr = match bound {
            Ok(local_addr) => local_addr,
            Err(e) => return Err(NetError::Creation(e)),
        };

        self.local_addr = Some(local_addr);
        self.descriptor = Some(match self.transport {
            Transport::Tcp => Descriptor::Unbound(socket),
            Transport::Udp => Descriptor::Datagram(UdpSocket::from_std(socket.into())),
        });

        tracing::debug!(local = %local_addr, transport = %self.transport, "Socket bound");
        Ok(())
    }

    /// Start listening on a bound TCP socket
    pub fn listen(&mut self, backlog: i32) -> Result<()> {
        if self.transport != Transport::Tcp {
            return Err(NetError::Misuse("listen requires a TCP socket".into()));
        }

        let socket = self.take_unbound("listen")?;
        socket.listen(backlog).map_err(NetError::Creation)?;

        self.descriptor = Some(Descriptor::Listener(TcpListener::from_std(socket.into())));
        Ok(())
    }

    // =========================================================================
    // Client Setup
    // =========================================================================

    /// Begin a non-blocking connect
    ///
    /// Returns `true` if the connection completed immediately. Otherwise the
    /// outcome is reported by `finish_connect()` once the socket turns writable.
    /// On failure the handle is closed.
    pub fn connect(&mut self, remote: SocketAddr) -> Result<bool> {
        self.check_connectable(&remote)?;
        let socket = self.take_unbound("connect")?;

        let completed = match socket.connect(&SockAddr::from(remote)) {
            Ok(()) => true,
            Err(e) if connect_in_progress(&e) => false,
            Err(e) => return Err(NetError::Connect(e)),
        };

        let stream = TcpStream::from_std(socket.into());
        self.local_addr = stream.local_addr().ok();
        self.descriptor = Some(Descriptor::Stream(stream));

        tracing::debug!(peer = %remote, completed, "Connect started");
        Ok(completed)
    }

    /// Check the outcome of a pending connect
    ///
    /// `Ok(Some(peer))` once established, `Ok(None)` while still in progress.
    pub fn finish_connect(&mut self) -> Result<Option<SocketAddr>> {
        let Some(Descriptor::Stream(stream)) = &self.descriptor else {
            return Err(NetError::Misuse("no connecting stream".into()));
        };

        if let Some(err) = stream.take_error().map_err(NetError::Connect)? {
            return Err(NetError::Connect(err));
        }

        match stream.peer_addr() {
            Ok(peer) => {
                self.local_addr = stream.local_addr().ok();
                Ok(Some(peer))
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(None),
            Err(e) if connect_in_progress(&e) => Ok(None),
            Err(e) => Err(NetError::Connect(e)),
        }
    }

    /// Connect in blocking mode, for sessions driven by a worker thread
    pub fn connect_blocking(&mut self, remote: SocketAddr, timeout: Option<Duration>) -> Result<()> {
        self.check_connectable(&remote)?;
        let socket = self.take_unbound("connect")?;

        socket.set_nonblocking(false).map_err(NetError::Creation)?;

        let addr = SockAddr::from(remote);
        let connected = match timeout {
            Some(timeout) => socket.connect_timeout(&addr, timeout),
            None => socket.connect(&addr),
        };
        connected.map_err(NetError::Connect)?;

        let stream: net::TcpStream = socket.into();
        self.local_addr = stream.local_addr().ok();
        self.descriptor = Some(Descriptor::Blocking(stream));
        Ok(())
    }

    /// Second handle onto a blocking stream, moved into the worker thread
    pub fn try_clone_blocking(&self) -> Result<net::TcpStream> {
        match &self.descriptor {
            Some(Descriptor::Blocking(stream)) => Ok(stream.try_clone()?),
            _ => Err(NetError::Misuse("not a blocking stream".into())),
        }
    }

    // =========================================================================
    // Accept
    // =========================================================================

    /// Accept one pending inbound connection
    ///
    /// `Ok(None)` when nothing is pending.
    pub fn accept(&self) -> Result<Option<(SocketHandle, SocketAddr)>> {
        let Some(Descriptor::Listener(listener)) = &self.descriptor else {
            return Err(NetError::Misuse("accept requires a listening socket".into()));
        };

        match listener.accept() {
            Ok((stream, peer)) => Ok(Some((SocketHandle::from_accepted(stream)?, peer))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(NetError::accept(e)),
        }
    }

    // =========================================================================
    // Data Transfer
    // =========================================================================

    /// Single send on a connected stream
    ///
    /// Returns the number of bytes written; 0 if the socket would block.
    pub fn send(&self, bytes: &[u8]) -> Result<usize> {
        let written = match &self.descriptor {
            Some(Descriptor::Stream(stream)) => (&*stream).write(bytes),
            Some(Descriptor::Blocking(stream)) => (&*stream).write(bytes),
            Some(_) => return Err(NetError::Misuse("send requires a connected stream".into())),
            None => return Err(NetError::Misuse("socket is closed".into())),
        };

        match written {
            Ok(n) => Ok(n),
            Err(e) if is_retryable(&e) => Ok(0),
            Err(e) => Err(NetError::Send(e)),
        }
    }

    /// Single datagram send
    pub fn send_to(&self, bytes: &[u8], remote: SocketAddr) -> Result<usize> {
        let Some(Descriptor::Datagram(socket)) = &self.descriptor else {
            return Err(NetError::Misuse("send_to requires a bound UDP socket".into()));
        };

        match socket.send_to(bytes, remote) {
            Ok(n) => Ok(n),
            Err(e) if is_retryable(&e) => Ok(0),
            Err(e) => Err(NetError::Send(e)),
        }
    }

    /// Single bounded read from a stream
    ///
    /// `Ok(Some(0))` signals orderly peer close, `Ok(None)` that nothing is available.
    pub fn receive(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        let read = match &self.descriptor {
            Some(Descriptor::Stream(stream)) => (&*stream).read(buf),
            Some(Descriptor::Blocking(stream)) => (&*stream).read(buf),
            Some(_) => return Err(NetError::Misuse("receive requires a connected stream".into())),
            None => return Err(NetError::Misuse("socket is closed".into())),
        };

        match read {
            Ok(n) => Ok(Some(n)),
            Err(e) if is_retryable(&e) => Ok(None),
            Err(e) => Err(NetError::Receive(e)),
        }
    }

    /// Single bounded datagram read
    pub fn receive_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        let Some(Descriptor::Datagram(socket)) = &self.descriptor else {
            return Err(NetError::Misuse("receive_from requires a bound UDP socket".into()));
        };

        match socket.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(e) if is_retryable(&e) => Ok(None),
            Err(e) => Err(NetError::Receive(e)),
        }
    }

    // =========================================================================
    // Options
    // =========================================================================

    pub fn set_nodelay(&self, enabled: bool) -> Result<()> {
        match &self.descriptor {
            Some(Descriptor::Stream(stream)) => stream.set_nodelay(enabled)?,
            Some(Descriptor::Blocking(stream)) => stream.set_nodelay(enabled)?,
            _ => {}
        }
        Ok(())
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        if let Some(Descriptor::Blocking(stream)) = &self.descriptor {
            stream.set_write_timeout(timeout)?;
        }
        Ok(())
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Shut down both directions, forcing blocked calls on other handles to return
    pub fn shutdown(&self) {
        let result = match &self.descriptor {
            Some(Descriptor::Stream(stream)) => stream.shutdown(Shutdown::Both),
            Some(Descriptor::Blocking(stream)) => stream.shutdown(Shutdown::Both),
            _ => Ok(()),
        };

        if let Err(e) = result {
            if e.kind() != io::ErrorKind::NotConnected {
                tracing::debug!(error = %e, "Shutdown failed");
            }
        }
    }

    /// Release the descriptor. Returns whether it was still open.
    pub fn close(&mut self) -> bool {
        match self.descriptor.take() {
            Some(descriptor) => {
                drop(descriptor);
                tracing::trace!(local = ?self.local_addr, "Socket closed");
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_open(&self) -> bool {
        self.descriptor.is_some()
    }

    /// Whether the handle can be registered with an `EventNotifier`
    pub fn is_pollable(&self) -> bool {
        matches!(
            self.descriptor,
            Some(Descriptor::Listener(_) | Descriptor::Stream(_) | Descriptor::Datagram(_))
        )
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    /// Take the unbound socket out, leaving the handle closed until the caller stores the next shape
    fn take_unbound(&mut self, op: &str) -> Result<Socket> {
        match self.descriptor.take() {
            Some(Descriptor::Unbound(socket)) => Ok(socket),
            Some(other) => {
                self.descriptor = Some(other);
                Err(NetError::Misuse(format!("{} on a socket already in use", op)))
            }
            None => Err(NetError::Misuse(format!("{} on a closed socket", op))),
        }
    }

    fn check_connectable(&self, remote: &SocketAddr) -> Result<()> {
        if self.transport != Transport::Tcp {
            return Err(NetError::Misuse("connect requires a TCP socket".into()));
        }
        if !self.family.matches(remote) {
            return Err(NetError::Misuse(format!(
                "cannot connect {} socket to {}",
                self.family, remote
            )));
        }
        Ok(())
    }

    fn source(&mut self) -> io::Result<&mut dyn Source> {
        match &mut self.descriptor {
            Some(Descriptor::Listener(listener)) => Ok(listener),
            Some(Descriptor::Stream(stream)) => Ok(stream),
            Some(Descriptor::Datagram(socket)) => Ok(socket),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "socket cannot be registered for readiness",
            )),
        }
    }
}

impl Source for SocketHandle {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.source()?.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.source()?.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.source()?.deregister(registry)
    }
}

/// A non-blocking connect that has not finished yet
fn connect_in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || is_einprogress(err)
}

#[cfg(unix)]
fn is_einprogress(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EINPROGRESS)
}

#[cfg(not(unix))]
fn is_einprogress(_err: &io::Error) -> bool {
    false
}

fn is_retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
