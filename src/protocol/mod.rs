//! Wire formats shared by the network and transport layers.
//!
//! Headers are bit-exact renditions of [IPv4], [TCP], and [ICMP] without
//! options. All of them share the Internet checksum in [checksum].
//!
//! [IPv4]: https://www.rfc-editor.org/rfc/rfc791
//! [TCP]:  https://www.rfc-editor.org/rfc/rfc793
//! [ICMP]: https://www.rfc-editor.org/rfc/rfc792

pub mod checksum;
pub mod headers;

pub mod socket;
pub use socket::{ConnectionId, SocketAddr};

pub mod segment;
pub use segment::TcpSegment;
