//! Parsing, serialization, and construction of IPv4, TCP, and ICMP headers.

mod ipv4;
pub use ipv4::{Ipv4Header, Protocol};

mod tcp;
pub use tcp::{TcpHeader, verify_checksum};

mod icmp;
pub use icmp::{IcmpHeader, IcmpType};
