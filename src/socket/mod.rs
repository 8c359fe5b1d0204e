//! Socket Module
//!
//! Owns OS socket descriptors and the address vocabulary around them.
//!
//! ## Responsibilities
//! - Create sockets for a given address family and transport
//! - Bind/listen for servers, connect for clients, accept inbound peers
//! - Single bounded, non-blocking send/receive per call
//! - Idempotent close
//!
//! ## Addresses
//! Addresses are IPv4 dotted-quad or IPv6 literal strings with a numeric port
//! (`127.0.0.1:3000`, `[::1]:3000`).

mod handle;

pub use handle::SocketHandle;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use socket2::{Domain, Protocol, Type};

use crate::error::{NetError, Result};

/// IP address family of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// Family of an existing address
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => AddressFamily::V4,
            SocketAddr::V6(_) => AddressFamily::V6,
        }
    }

    /// `0.0.0.0` or `::`
    pub fn unspecified(self) -> IpAddr {
        match self {
            AddressFamily::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    /// `127.0.0.1` or `::1`
    pub fn loopback(self) -> IpAddr {
        match self {
            AddressFamily::V4 => IpAddr::V4(Ipv4Addr::LOCALHOST),
            AddressFamily::V6 => IpAddr::V6(Ipv6Addr::LOCALHOST),
        }
    }

    pub fn matches(self, addr: &SocketAddr) -> bool {
        AddressFamily::of(addr) == self
    }

    pub(crate) fn domain(self) -> Domain {
        match self {
            AddressFamily::V4 => Domain::IPV4,
            AddressFamily::V6 => Domain::IPV6,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "ipv4"),
            AddressFamily::V6 => write!(f, "ipv6"),
        }
    }
}

impl FromStr for AddressFamily {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "4" | "v4" | "ipv4" | "inet" => Ok(AddressFamily::V4),
            "6" | "v6" | "ipv6" | "inet6" => Ok(AddressFamily::V6),
            other => Err(format!("unknown address family '{}'", other)),
        }
    }
}

/// Transport semantics of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Connection-oriented stream
    Tcp,
    /// Connectionless datagrams
    Udp,
}

impl Transport {
    pub(crate) fn socket_type(self) -> Type {
        match self {
            Transport::Tcp => Type::STREAM,
            Transport::Udp => Type::DGRAM,
        }
    }

    pub(crate) fn protocol(self) -> Protocol {
        match self {
            Transport::Tcp => Protocol::TCP,
            Transport::Udp => Protocol::UDP,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" | "stream" => Ok(Transport::Tcp),
            "udp" | "dgram" | "datagram" => Ok(Transport::Udp),
            other => Err(format!("unknown transport '{}'", other)),
        }
    }
}

/// Parse `127.0.0.1:3000` or `[::1]:3000`
pub fn parse_socket_addr(s: &str) -> Result<SocketAddr> {
    s.trim()
        .parse()
        .map_err(|e| NetError::AddressResolution(format!("'{}': {}", s, e)))
}

/// Resolve `host:port` to the first address of the requested family
pub fn resolve(host: &str, port: u16, family: AddressFamily) -> Result<SocketAddr> {
    // Bracketed IPv6 literals are accepted as typed by users
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');

    let candidates = (host, port)
        .to_socket_addrs()
        .map_err(|e| NetError::AddressResolution(format!("'{}': {}", host, e)))?;

    candidates
        .into_iter()
        .find(|addr| family.matches(addr))
        .ok_or_else(|| {
            NetError::AddressResolution(format!("'{}' has no {} address", host, family))
        })
}
