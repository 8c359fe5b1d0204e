//! Engine Module
//!
//! The command layer and event loop that coordinates all components.
//!
//! ## Responsibilities
//! - Accept commands (start, connect, send, disconnect, stop) from the UI layer
//! - Drive the `EventNotifier` and dispatch readiness to the listener and sessions
//! - Pump worker-thread messages into the loop in arrival order
//! - Publish every `NetEvent` on a single ordered channel

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use mio::Waker;

use crate::config::{Config, ExecutionMode};
use crate::error::{NetError, NetErrorKind, Result};
use crate::network::{ListenerState, ServerListener, WorkerMessage};
use crate::notifier::{EventNotifier, Readiness, LISTENER_TOKEN};
use crate::registry::SessionRegistry;
use crate::session::{
    ClientSession, ErrorScope, NetEvent, SessionId, SessionIdAllocator, SessionInfo, SessionState,
};
use crate::socket::{resolve, AddressFamily, Transport};

/// Commands queued by an `EngineHandle`
#[derive(Debug)]
enum Command {
    Send { id: SessionId, bytes: Bytes },
    SendTo { id: SessionId, remote: SocketAddr, bytes: Bytes },
    Reply { bytes: Bytes },
    Disconnect { id: SessionId },
    Stop,
    Shutdown,
}

/// The session lifecycle engine
///
/// ## Threading Model
///
/// - The engine itself lives on the event-loop thread; every socket
///   operation and every registry mutation for event-loop sessions happens
///   inside its methods
/// - Other threads talk to it through an `EngineHandle` (command channel +
///   waker) and listen to it through `event_receiver()`
/// - Worker-thread sessions post `WorkerMessage`s; the engine turns them into
///   events and performs teardown on this thread
///
/// ## Event Ordering
///
/// Events for one session are published in the order they happened, and
/// `Disconnected { id }` is the last event ever published for `id`.
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Readiness source for every pollable socket
    notifier: EventNotifier,

    /// Shared by the listener and outbound sessions so ids never collide
    ids: SessionIdAllocator,

    /// Inbound side
    server: ServerListener,

    /// Outbound sessions (`start_client`)
    clients: SessionRegistry<ClientSession>,

    /// Scratch space for one bounded read
    recv_buffer: Vec<u8>,

    events_tx: Sender<NetEvent>,
    events_rx: Receiver<NetEvent>,

    commands_tx: Sender<Command>,
    commands_rx: Receiver<Command>,

    worker_tx: Sender<WorkerMessage>,
    worker_rx: Receiver<WorkerMessage>,

    shut_down: bool,
}

impl Engine {
    /// Create an engine with the given config
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let notifier = EventNotifier::new(config.poll_capacity)?;
        let (events_tx, events_rx) = channel::unbounded();
        let (commands_tx, commands_rx) = channel::unbounded();
        let (worker_tx, worker_rx) = channel::unbounded();

        Ok(Self {
            server: ServerListener::new(config.clone()),
            recv_buffer: vec![0u8; config.recv_buffer_size],
            config,
            notifier,
            ids: SessionIdAllocator::new(),
            clients: SessionRegistry::new(),
            events_tx,
            events_rx,
            commands_tx,
            commands_rx,
            worker_tx,
            worker_rx,
            shut_down: false,
        })
    }

    // =========================================================================
    // Server Commands
    // =========================================================================

    /// Start the server on the family, transport and port from the config
    pub fn start(&mut self) -> Result<()> {
        self.start_server(self.config.family, self.config.transport, self.config.port)
    }

    /// Bind/listen (TCP) or bind for datagrams (UDP)
    pub fn start_server(
        &mut self,
        family: AddressFamily,
        transport: Transport,
        port: u16,
    ) -> Result<()> {
        self.server
            .start(family, transport, port, &self.notifier, &self.ids)
            .inspect_err(|e| tracing::warn!(%family, %transport, port, error = %e, "Server start failed"))
    }

    /// Stop the server and disconnect every session it accepted. Always succeeds.
    pub fn stop(&mut self) {
        let mut out = Vec::new();
        self.server.stop(&self.notifier, &mut out);
        self.emit_all(out);
    }

    /// Reply to the most recent datagram sender on a UDP server
    pub fn reply(&mut self, bytes: &[u8]) -> Result<usize> {
        self.server.reply(bytes)
    }

    // =========================================================================
    // Client Commands
    // =========================================================================

    /// Open an outbound session to `host:port`
    ///
    /// TCP sessions follow the configured execution mode. A TCP connect that
    /// is still in flight reports its outcome later as `Connected` or
    /// `Error { kind: Connect }`.
    pub fn start_client(
        &mut self,
        family: AddressFamily,
        transport: Transport,
        host: &str,
        port: u16,
    ) -> Result<SessionId> {
        let remote = resolve(host, port, family)?;

        match (transport, self.config.execution_mode) {
            (Transport::Tcp, ExecutionMode::WorkerThread) => self.connect_worker(remote),
            (Transport::Tcp, ExecutionMode::EventLoop) => {
                let id = self.ids.next_id();
                let (session, event) =
                    ClientSession::connect(id, remote, &self.config, &self.notifier)?;
                self.clients.add(id, session)?;
                if let Some(event) = event {
                    self.emit(event);
                }
                Ok(id)
            }
            (Transport::Udp, _) => {
                let id = self.ids.next_id();
                let session = ClientSession::datagram(id, family, remote, &self.notifier)?;
                self.clients.add(id, session)?;
                Ok(id)
            }
        }
    }

    /// Open a TCP session whose receive path runs on its own thread
    ///
    /// Blocks until the connect completes or fails.
    pub fn start_client_worker(
        &mut self,
        family: AddressFamily,
        host: &str,
        port: u16,
    ) -> Result<SessionId> {
        let remote = resolve(host, port, family)?;
        self.connect_worker(remote)
    }

    fn connect_worker(&mut self, remote: SocketAddr) -> Result<SessionId> {
        let id = self.ids.next_id();
        let (session, event) = ClientSession::connect_worker(
            id,
            remote,
            &self.config,
            self.worker_tx.clone(),
            self.notifier.waker(),
        )?;
        self.clients.add(id, session)?;
        self.emit(event);
        Ok(id)
    }

    // =========================================================================
    // Session Commands
    // =========================================================================

    /// Single send on any session
    pub fn send(&mut self, id: SessionId, bytes: &[u8]) -> Result<usize> {
        let mut out = Vec::new();

        let result = if self.server.owns(id) {
            self.server.send(id, bytes, &self.notifier, &mut out)
        } else {
            self.send_client(id, bytes, &mut out)
        };

        self.emit_all(out);
        result
    }

    fn send_client(&mut self, id: SessionId, bytes: &[u8], out: &mut Vec<NetEvent>) -> Result<usize> {
        let notifier = &self.notifier;
        let (result, state, worker) = self
            .clients
            .with_mut(id, |session| {
                let result = session.send(bytes, notifier, out);
                (result, session.state(), session.has_worker())
            })
            .ok_or(NetError::SessionNotFound(id))?;

        // Worker sessions finish teardown when their `Closed` message arrives
        if state == SessionState::Disconnected && !worker {
            self.clients.discard(id);
        }
        result
    }

    /// Single datagram to an explicit address from a UDP session or UDP server
    pub fn send_to(&mut self, id: SessionId, remote: SocketAddr, bytes: &[u8]) -> Result<usize> {
        if self.server.owns(id) {
            return self.server.send_to(remote, bytes);
        }
        self.clients
            .with_mut(id, |session| session.send_to(remote, bytes))
            .ok_or(NetError::SessionNotFound(id))?
    }

    /// Tear a session down. Idempotent; unknown ids are ignored.
    pub fn disconnect(&mut self, id: SessionId) {
        let mut out = Vec::new();

        if !self.server.disconnect(id, &self.notifier, &mut out) {
            self.disconnect_client(id, &mut out);
        }

        self.emit_all(out);
    }

    fn disconnect_client(&mut self, id: SessionId, out: &mut Vec<NetEvent>) {
        let stopped_worker = self
            .clients
            .with_mut(id, |session| {
                let worker = session.has_worker();
                session.stop_worker();
                worker
            })
            .unwrap_or(false);

        if stopped_worker {
            // The worker has exited; its last messages are queued
            self.pump_workers(out);
        }

        if let Some(mut session) = self.clients.remove(id) {
            session.disconnect(&self.notifier, out);
        }
    }

    /// Stop the server, disconnect every client and end `run()`. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }

        let mut out = Vec::new();
        self.server.stop(&self.notifier, &mut out);

        for id in self.clients.ids() {
            self.disconnect_client(id, &mut out);
        }

        self.emit_all(out);
        self.shut_down = true;
        tracing::info!("Engine shut down");
    }

    // =========================================================================
    // Event Loop
    // =========================================================================

    /// Run one loop iteration: queued commands, worker messages, then readiness
    ///
    /// Blocks for at most `timeout` (None = until something happens).
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.process_commands();

        let mut out = Vec::new();
        self.pump_workers(&mut out);
        self.emit_all(out);

        if self.shut_down {
            return Ok(());
        }

        let ready = self.notifier.poll(timeout)?;

        let mut out = Vec::new();
        for readiness in &ready {
            // An earlier notification in this batch may have torn the owner down
            if !self.notifier.is_registered(readiness.token) {
                continue;
            }
            self.dispatch(readiness, &mut out);
        }
        self.pump_workers(&mut out);
        self.emit_all(out);

        self.process_commands();
        Ok(())
    }

    /// Loop until `shutdown()` is called (directly or through a handle)
    pub fn run(&mut self) -> Result<()> {
        let timeout = Duration::from_millis(self.config.poll_timeout_ms);
        tracing::info!("Event loop running");

        while !self.shut_down {
            self.poll_once(Some(timeout))?;
        }
        Ok(())
    }

    fn dispatch(&mut self, readiness: &Readiness, out: &mut Vec<NetEvent>) {
        if readiness.token == LISTENER_TOKEN {
            self.server
                .on_listener_ready(&self.notifier, &self.ids, &mut self.recv_buffer, out);
            return;
        }

        let id = SessionId::from_token(readiness.token);
        if self
            .server
            .on_session_ready(id, readiness, &self.notifier, &mut self.recv_buffer, out)
        {
            return;
        }

        let notifier = &self.notifier;
        let buf = &mut self.recv_buffer;
        let state = self.clients.with_mut(id, |session| {
            session.on_readiness(readiness, notifier, buf, out);
            session.state()
        });

        if state == Some(SessionState::Disconnected) {
            self.clients.discard(id);
        }
    }

    fn process_commands(&mut self) {
        while let Ok(command) = self.commands_rx.try_recv() {
            tracing::trace!(?command, "Processing command");

            match command {
                Command::Send { id, bytes } => {
                    let tcp = self.is_tcp_session(id);
                    let live = self.is_live(id);
                    match self.send(id, &bytes) {
                        // Pushed by the session before its Disconnected
                        Err(NetError::Send(_)) if tcp => {}
                        result => self.report_transfer(id, live, bytes.len(), result),
                    }
                }
                Command::SendTo { id, remote, bytes } => {
                    let live = self.is_live(id);
                    let result = self.send_to(id, remote, &bytes);
                    self.report_transfer(id, live, bytes.len(), result);
                }
                Command::Reply { bytes } => match self.reply(&bytes) {
                    Ok(n) if n < bytes.len() => {
                        self.emit(short_write(ErrorScope::Listener, n, bytes.len()))
                    }
                    Ok(_) => {}
                    Err(e) => self.emit(NetEvent::error(ErrorScope::Listener, &e)),
                },
                Command::Disconnect { id } => self.disconnect(id),
                Command::Stop => self.stop(),
                Command::Shutdown => self.shutdown(),
            }
        }
    }

    /// Publish the outcome of a queued send
    ///
    /// Failures on an id that is no longer registered are reported under
    /// `ErrorScope::Engine` so nothing follows that id's `Disconnected`.
    fn report_transfer(&self, id: SessionId, live: bool, len: usize, result: Result<usize>) {
        let scope = if live {
            ErrorScope::Session(id)
        } else {
            ErrorScope::Engine
        };

        match result {
            Ok(n) if n < len => {
                tracing::warn!(%id, sent = n, len, "Short write, remainder dropped");
                self.emit(short_write(scope, n, len));
            }
            Ok(_) => {}
            Err(e) => self.emit(NetEvent::error(scope, &e)),
        }
    }

    /// Whether `id` names the UDP listener or a registered session
    fn is_live(&self, id: SessionId) -> bool {
        self.server.owns(id) || self.clients.contains(id)
    }

    fn is_tcp_session(&self, id: SessionId) -> bool {
        self.session_info(id)
            .is_some_and(|info| info.kind.transport() == Transport::Tcp)
    }

    /// Turn queued worker messages into events and finish worker teardown
    fn pump_workers(&self, out: &mut Vec<NetEvent>) {
        while let Ok(message) = self.worker_rx.try_recv() {
            match message {
                WorkerMessage::Data { id, bytes } => {
                    if self.clients.contains(id) {
                        out.push(NetEvent::DataReceived {
                            id,
                            bytes,
                            source: None,
                        });
                    }
                }
                WorkerMessage::Closed { id, error } => {
                    let Some(mut session) = self.clients.remove(id) else {
                        continue;
                    };
                    if let Some(e) = error {
                        if !session.is_closing() {
                            out.push(NetEvent::error(ErrorScope::Session(id), &e));
                        }
                    }
                    session.disconnect(&self.notifier, out);
                }
            }
        }
    }

    fn emit(&self, event: NetEvent) {
        tracing::trace!(?event, "Emitting event");
        // The engine holds a receiver, so the channel is never disconnected
        let _ = self.events_tx.send(event);
    }

    fn emit_all(&self, events: Vec<NetEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Receiver for every event the engine publishes
    pub fn event_receiver(&self) -> Receiver<NetEvent> {
        self.events_rx.clone()
    }

    /// Handle for queueing commands from other threads
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            sender: self.commands_tx.clone(),
            waker: self.notifier.waker(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn server(&self) -> &ServerListener {
        &self.server
    }

    pub fn server_state(&self) -> ListenerState {
        self.server.state()
    }

    pub fn server_local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    /// Snapshot of one session, accepted or outbound
    pub fn session_info(&self, id: SessionId) -> Option<SessionInfo> {
        self.server
            .sessions()
            .lookup(id, ClientSession::info)
            .or_else(|| self.clients.lookup(id, ClientSession::info))
    }

    /// Snapshot of every live session, in ascending id order
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .server
            .sessions()
            .ids()
            .into_iter()
            .chain(self.clients.ids())
            .filter_map(|id| self.session_info(id))
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Number of live outbound sessions
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn short_write(scope: ErrorScope, sent: usize, len: usize) -> NetEvent {
    NetEvent::Error {
        scope,
        kind: NetErrorKind::Send,
        detail: format!("short write {}/{}", sent, len),
    }
}

// =============================================================================
// Cross-thread Handle
// =============================================================================

/// Queues commands for an `Engine` running on another thread
///
/// Every call returns once the command is queued; the outcome of a failed
/// command is published as an `Error` event.
#[derive(Clone)]
pub struct EngineHandle {
    sender: Sender<Command>,
    waker: Arc<Waker>,
}

impl EngineHandle {
    pub fn send(&self, id: SessionId, bytes: impl Into<Bytes>) -> Result<()> {
        self.submit(Command::Send {
            id,
            bytes: bytes.into(),
        })
    }

    pub fn send_to(&self, id: SessionId, remote: SocketAddr, bytes: impl Into<Bytes>) -> Result<()> {
        self.submit(Command::SendTo {
            id,
            remote,
            bytes: bytes.into(),
        })
    }

    pub fn reply(&self, bytes: impl Into<Bytes>) -> Result<()> {
        self.submit(Command::Reply {
            bytes: bytes.into(),
        })
    }

    pub fn disconnect(&self, id: SessionId) -> Result<()> {
        self.submit(Command::Disconnect { id })
    }

    pub fn stop(&self) -> Result<()> {
        self.submit(Command::Stop)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.submit(Command::Shutdown)
    }

    fn submit(&self, command: Command) -> Result<()> {
        self.sender
            .send(command)
            .map_err(|_| NetError::Misuse("engine is gone".into()))?;
        self.waker.wake()?;
        Ok(())
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}
