//! Construction and serialization of TCP segments.

use std::io::Write;
use std::net::Ipv4Addr;

use crate::Result;
use crate::protocol::headers::TcpHeader;

/// Fully constructed TCP segment, addressed at the IP level.
///
/// The IPv4 header is added by the network layer, so only the addresses that
/// enter the pseudo header are carried here.
#[derive(Debug, Clone)]
pub struct TcpSegment {
    /// Source address of the enclosing datagram.
    pub src: Ipv4Addr,
    /// Destination address of the enclosing datagram.
    pub dst: Ipv4Addr,
    /// TCP header of the segment.
    pub tcp: TcpHeader,
    /// Payload of the segment.
    pub payload: Vec<u8>,
}

impl TcpSegment {
    /// Create a new TCP segment given the addresses, TCP header, and payload.
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, tcp: TcpHeader, payload: &[u8]) -> Self {
        Self {
            src,
            dst,
            tcp,
            payload: payload.into(),
        }
    }

    /// Returns the memory representation of the TCP segment (header and
    /// payload) as a vector of bytes in big-endian (network) byte order.
    ///
    /// The TCP checksum is computed over the pseudo header before writing.
    pub fn to_be_bytes(&self) -> Result<Vec<u8>> {
        let mut tcp = self.tcp;
        tcp.set_checksum(self.src, self.dst, &self.payload);

        let mut buf = Vec::with_capacity(TcpHeader::HEADER_LEN + self.payload.len());

        tcp.write(&mut buf)?;
        buf.write_all(&self.payload)?;

        Ok(buf)
    }
}
