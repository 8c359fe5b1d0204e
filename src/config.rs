//! Configuration for netsession
//!
//! Centralized configuration with sensible defaults.

use std::net::IpAddr;

use crate::error::{NetError, Result};
use crate::socket::{AddressFamily, Transport};

/// How client sessions drive their receive path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// All socket operations run on the event-loop thread, driven by readiness
    #[default]
    EventLoop,

    /// Each session owns a thread blocked on receive; events are posted back
    WorkerThread,
}

/// Main configuration for a netsession engine
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Socket Configuration
    // -------------------------------------------------------------------------
    /// Address family used by `Engine::start` helpers
    pub family: AddressFamily,

    /// Transport used by `Engine::start` helpers
    pub transport: Transport,

    /// Local address a server binds to (None = unspecified address of the family)
    pub bind_addr: Option<IpAddr>,

    /// Local port a server binds to
    pub port: u16,

    /// Listen backlog for TCP servers
    pub backlog: i32,

    /// Set SO_REUSEADDR on server sockets
    pub reuse_address: bool,

    /// Disable Nagle's algorithm on TCP sessions
    pub nodelay: bool,

    // -------------------------------------------------------------------------
    // I/O Configuration
    // -------------------------------------------------------------------------
    /// Upper bound for a single receive (bytes)
    pub recv_buffer_size: usize,

    /// Max readiness events fetched per poll
    pub poll_capacity: usize,

    /// Poll timeout used by `Engine::run` (milliseconds)
    pub poll_timeout_ms: u64,

    /// Max concurrent accepted sessions per listener
    pub max_connections: usize,

    // -------------------------------------------------------------------------
    // Worker-Thread Configuration
    // -------------------------------------------------------------------------
    /// Default execution mode for `Engine::start`
    pub execution_mode: ExecutionMode,

    /// Blocking connect timeout (milliseconds, 0 = OS default)
    pub connect_timeout_ms: u64,

    /// Blocking write timeout (milliseconds, 0 = none)
    pub write_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            family: AddressFamily::V4,
            transport: Transport::Tcp,
            bind_addr: None,
            port: 3000,
            backlog: 128,
            reuse_address: true,
            nodelay: true,
            recv_buffer_size: 1024,
            poll_capacity: 256,
            poll_timeout_ms: 100,
            max_connections: 1024,
            execution_mode: ExecutionMode::EventLoop,
            connect_timeout_ms: 5000,
            write_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.recv_buffer_size == 0 {
            return Err(NetError::Config("recv_buffer_size must be non-zero".into()));
        }
        if self.poll_capacity == 0 {
            return Err(NetError::Config("poll_capacity must be non-zero".into()));
        }
        if self.backlog <= 0 {
            return Err(NetError::Config("backlog must be positive".into()));
        }
        if self.max_connections == 0 {
            return Err(NetError::Config("max_connections must be non-zero".into()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the address family
    pub fn family(mut self, family: AddressFamily) -> Self {
        self.config.family = family;
        self
    }

    /// Set the transport
    pub fn transport(mut self, transport: Transport) -> Self {
        self.config.transport = transport;
        self
    }

    /// Set the local address servers bind to
    pub fn bind_addr(mut self, addr: IpAddr) -> Self {
        self.config.bind_addr = Some(addr);
        self
    }

    /// Set the local port servers bind to
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the TCP listen backlog
    pub fn backlog(mut self, backlog: i32) -> Self {
        self.config.backlog = backlog;
        self
    }

    pub fn reuse_address(mut self, enabled: bool) -> Self {
        self.config.reuse_address = enabled;
        self
    }

    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.config.nodelay = enabled;
        self
    }

    /// Set the bounded receive size (in bytes)
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.config.recv_buffer_size = size;
        self
    }

    /// Set the number of readiness events fetched per poll
    pub fn poll_capacity(mut self, capacity: usize) -> Self {
        self.config.poll_capacity = capacity;
        self
    }

    /// Set the poll timeout (in milliseconds)
    pub fn poll_timeout_ms(mut self, ms: u64) -> Self {
        self.config.poll_timeout_ms = ms;
        self
    }

    /// Set the maximum number of concurrent accepted sessions
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.config.execution_mode = mode;
        self
    }

    /// Set the worker-mode connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Set the worker-mode write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
