//! Identifying TCP connections through socket addresses.

use std::fmt;
use std::net::Ipv4Addr;

/// An IPv4 address and a port number.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct SocketAddr {
    /// IPv4 address.
    pub addr: Ipv4Addr,
    /// Port number.
    pub port: u16,
}

impl SocketAddr {
    /// Creates a socket address from an address and a port.
    pub fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self { addr, port }
    }
}

impl fmt::Display for SocketAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// Key of one TCP connection: the peer's and our own socket address.
///
/// At most one live connection exists per `ConnectionId`.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct ConnectionId {
    /// The remote socket address (peer IP and port).
    pub peer: SocketAddr,
    /// The local socket address (our IP and bound port).
    pub local: SocketAddr,
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.peer, self.local)
    }
}
