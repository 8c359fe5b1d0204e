//! Worker Connection
//!
//! Blocking receive loop for sessions in worker-thread mode.

use std::io::{self, Read};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use crossbeam::channel::Sender;
use mio::Waker;

use crate::error::{NetError, Result};
use crate::session::SessionId;

/// Message posted from a worker thread to the event loop, in receive order
#[derive(Debug)]
pub enum WorkerMessage {
    /// One bounded read
    Data { id: SessionId, bytes: Bytes },

    /// The loop ended. Always the last message for `id`.
    Closed { id: SessionId, error: Option<NetError> },
}

/// Handles a single connection on its own thread
///
/// Never touches session or registry state: every outcome is posted to the
/// event loop through `sender`, then the loop is woken.
pub struct Connection {
    id: SessionId,

    /// Read half (a clone of the session's stream)
    stream: TcpStream,

    /// Ordered channel into the event loop
    sender: Sender<WorkerMessage>,

    /// Wakes the event loop's poll
    waker: Arc<Waker>,

    /// Upper bound for a single read
    recv_buffer_size: usize,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    pub fn new(
        id: SessionId,
        stream: TcpStream,
        sender: Sender<WorkerMessage>,
        waker: Arc<Waker>,
        recv_buffer_size: usize,
    ) -> Self {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            id,
            stream,
            sender,
            waker,
            recv_buffer_size,
            peer_addr,
        }
    }

    /// Run `handle()` on a dedicated thread
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let name = format!("netsession-worker-{}", self.id);
        thread::Builder::new()
            .name(name)
            .spawn(move || self.handle())
            .map_err(NetError::Creation)
    }

    /// Receive until the peer closes, an error occurs, or the socket is shut down
    ///
    /// Shutting the socket down from the event loop is the cancellation signal.
    pub fn handle(mut self) {
        tracing::debug!(id = %self.id, peer = %self.peer_addr, "Worker started");

        let mut buf = vec![0u8; self.recv_buffer_size];

        let error = loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    // Orderly close by the peer, or our own shutdown
                    tracing::debug!(id = %self.id, peer = %self.peer_addr, "Stream closed");
                    break None;
                }
                Ok(n) => {
                    tracing::trace!(id = %self.id, len = n, "Worker received data");
                    self.post(WorkerMessage::Data {
                        id: self.id,
                        bytes: Bytes::copy_from_slice(&buf[..n]),
                    });
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    match e.kind() {
                        io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::BrokenPipe => {
                            tracing::debug!(id = %self.id, peer = %self.peer_addr, error = %e, "Connection dropped");
                        }
                        _ => {
                            tracing::warn!(id = %self.id, peer = %self.peer_addr, error = %e, "Error reading from socket");
                        }
                    }
                    break Some(NetError::Receive(e));
                }
            }
        };

        self.post(WorkerMessage::Closed { id: self.id, error });
        tracing::debug!(id = %self.id, "Worker finished");
    }

    fn post(&self, message: WorkerMessage) {
        if self.sender.send(message).is_err() {
            // Event loop is gone; nothing left to notify
            return;
        }
        if let Err(e) = self.waker.wake() {
            tracing::warn!(id = %self.id, error = %e, "Failed to wake event loop");
        }
    }
}
