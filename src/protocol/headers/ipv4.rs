use std::io;
use std::net::Ipv4Addr;

use crate::protocol::checksum;
use crate::{Error, HeaderError, ParseError, Result};

/// IPv4 header (RFC 791 3.1).
///
/// ```text
///   0                   1                   2                   3
///    0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///   |Version|  IHL  |   DSCP    |ECN|          Total Length         |
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///   |         Identification        |Flags|      Fragment Offset    |
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///   |  Time to Live |    Protocol   |         Header Checksum       |
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///   |                       Source Address                          |
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///   |                    Destination Address                        |
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Options and fragmentation are not supported: IHL is always 5, and the
/// identification, flags, and fragment offset of built headers are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Version (high nibble) and Internet Header Length in 32 bit words (low
    /// nibble).
    version_ihl: u8,
    /// Differentiated Services Code Point (high 6 bits) and Explicit
    /// Congestion Notification (low 2 bits).
    dscp_ecn: u8,
    /// Length of the datagram, including header and data, in octets.
    total_len: u16,
    /// Assigned by the sender to aid in assembling fragments.
    id: u16,
    /// Control flags (high 3 bits) and fragment offset in units of 8 octets.
    flags_and_offset: u16,
    /// Decremented by every router; the datagram is destroyed at zero.
    ttl: u8,
    /// Next level protocol used in the data portion of the datagram.
    protocol: Protocol,
    /// Checksum over the header only, recomputed at every hop since TTL
    /// changes.
    header_checksum: u16,
    src_addr: Ipv4Addr,
    dst_addr: Ipv4Addr,
}

impl Ipv4Header {
    /// Length of an IPv4 header without options, in bytes.
    pub const HEADER_LEN: usize = 20;

    /// Maximum payload length in bytes.
    pub const MAX_PAYLOAD_LEN: u16 = u16::MAX - Self::HEADER_LEN as u16;

    /// Creates a new [Ipv4Header] with the specified source and destination
    /// addresses, payload length, TTL, and protocol, while setting default
    /// values for other fields.
    ///
    /// The header checksum is left at zero, see [Ipv4Header::set_header_checksum].
    ///
    /// # Errors
    ///
    /// Returns an error if `payload_len` exceeds [Ipv4Header::MAX_PAYLOAD_LEN].
    pub fn new(
        src: Ipv4Addr,
        dst: Ipv4Addr,
        payload_len: usize,
        ttl: u8,
        protocol: Protocol,
    ) -> Result<Self> {
        if payload_len > Self::MAX_PAYLOAD_LEN as usize {
            return Err(Error::Header(HeaderError::PayloadTooLarge {
                provided: payload_len,
                max: Self::MAX_PAYLOAD_LEN,
            }));
        }

        Ok(Self {
            total_len: (Self::HEADER_LEN + payload_len) as u16,
            ttl,
            protocol,
            src_addr: src,
            dst_addr: dst,
            ..Default::default()
        })
    }

    /// Parses the header at the start of `datagram`, returning it together
    /// with the payload it covers.
    ///
    /// Bytes past the indicated total length are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is malformed or the total length is
    /// inconsistent with the bytes provided.
    pub fn parse(datagram: &[u8]) -> Result<(Self, &[u8])> {
        let header = Self::try_from(datagram)?;
        let total_len = header.total_len as usize;

        if total_len < Self::HEADER_LEN || total_len > datagram.len() {
            return Err(Error::Parse(ParseError::InvalidTotalLength {
                provided: header.total_len,
                available: datagram.len(),
            }));
        }

        Ok((header, &datagram[Self::HEADER_LEN..total_len]))
    }

    /// Returns the Version field.
    pub fn version(&self) -> u8 {
        // Stored in the higher 4 bits.
        self.version_ihl >> 4
    }

    /// Returns the IHL (Internet Header Length) field, in 32 bit words.
    pub fn ihl(&self) -> u8 {
        // Stored in the lower 4 bits.
        self.version_ihl & 0xF
    }

    /// Returns the DSCP field.
    pub fn dscp(&self) -> u8 {
        self.dscp_ecn >> 2
    }

    /// Returns the ECN field.
    pub fn ecn(&self) -> u8 {
        self.dscp_ecn & 0b11
    }

    /// Returns the Total Length field.
    pub fn total_len(&self) -> u16 {
        self.total_len
    }

    /// Returns the length of the payload indicated by the Total Length field.
    pub fn payload_len(&self) -> usize {
        (self.total_len as usize).saturating_sub(Self::HEADER_LEN)
    }

    /// Returns the Identification field.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Returns the Flags field (3 bits).
    pub fn flags(&self) -> u8 {
        (self.flags_and_offset >> 13) as u8
    }

    /// Returns the Fragment Offset field.
    pub fn fragment_offset(&self) -> u16 {
        // Stored in the lower 13 bits.
        self.flags_and_offset & 0x1FFF
    }

    /// Returns the Time to Live field.
    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    /// Returns the Protocol field.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Returns the Header Checksum field.
    pub fn header_checksum(&self) -> u16 {
        self.header_checksum
    }

    /// Computes and sets the Header Checksum field.
    pub fn set_header_checksum(&mut self) {
        self.header_checksum = self.compute_header_checksum();
    }

    /// Returns `true` if the Header Checksum field matches the header.
    pub fn is_valid_checksum(&self) -> bool {
        self.header_checksum == self.compute_header_checksum()
    }

    /// Returns the Source Address field.
    pub fn src(&self) -> Ipv4Addr {
        self.src_addr
    }

    /// Returns the Destination Address field.
    pub fn dst(&self) -> Ipv4Addr {
        self.dst_addr
    }

    /// Computes the header checksum.
    ///
    /// The checksum field is the 16 bit one's complement of the one's
    /// complement sum of all 16 bit words in the header. For purposes of
    /// computing the checksum, the value of the checksum field is zero.
    pub fn compute_header_checksum(&self) -> u16 {
        let mut header = *self;

        // Checksum field must be 0 for computation.
        header.header_checksum = 0;

        checksum::checksum(&[&header.to_be_bytes()])
    }

    /// Returns the memory representation of the header as a byte array in
    /// big-endian (network) byte order.
    pub fn to_be_bytes(&self) -> [u8; Self::HEADER_LEN] {
        let mut raw_header = [0u8; Self::HEADER_LEN];

        raw_header[0] = self.version_ihl;
        raw_header[1] = self.dscp_ecn;
        raw_header[2..4].copy_from_slice(&self.total_len.to_be_bytes());
        raw_header[4..6].copy_from_slice(&self.id.to_be_bytes());
        raw_header[6..8].copy_from_slice(&self.flags_and_offset.to_be_bytes());
        raw_header[8] = self.ttl;
        raw_header[9] = self.protocol.into();
        raw_header[10..12].copy_from_slice(&self.header_checksum.to_be_bytes());
        raw_header[12..16].copy_from_slice(&self.src_addr.octets());
        raw_header[16..20].copy_from_slice(&self.dst_addr.octets());

        raw_header
    }

    /// Writes the header to the given output stream.
    ///
    /// # Notes
    ///
    /// The checksum is NOT automatically computed. It is the callers
    /// responsibility to ensure the checksum is computed before writing to an
    /// output stream.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to the output stream fails.
    pub fn write<T: io::Write>(&self, output: &mut T) -> Result<()> {
        output.write_all(&self.to_be_bytes())?;
        Ok(())
    }
}

impl TryFrom<&[u8]> for Ipv4Header {
    type Error = Error;

    fn try_from(header_raw: &[u8]) -> Result<Self> {
        if header_raw.len() < Self::HEADER_LEN {
            return Err(Error::Parse(ParseError::InvalidBufferLength {
                provided: header_raw.len(),
                min: Self::HEADER_LEN as u16,
            }));
        }

        let version_ihl = header_raw[0];

        if (version_ihl >> 4) != 4 {
            return Err(Error::Parse(ParseError::InvalidVersion {
                provided: version_ihl >> 4,
                expected: 4,
            }));
        }

        if (version_ihl & 0xF) != 5 {
            return Err(Error::Parse(ParseError::InvalidIhl {
                provided: version_ihl & 0xF,
                expected: 5,
            }));
        }

        Ok(Self {
            version_ihl,
            dscp_ecn: header_raw[1],
            total_len: u16::from_be_bytes([header_raw[2], header_raw[3]]),
            id: u16::from_be_bytes([header_raw[4], header_raw[5]]),
            flags_and_offset: u16::from_be_bytes([header_raw[6], header_raw[7]]),
            ttl: header_raw[8],
            protocol: header_raw[9].into(),
            header_checksum: u16::from_be_bytes([header_raw[10], header_raw[11]]),
            src_addr: Ipv4Addr::new(
                header_raw[12],
                header_raw[13],
                header_raw[14],
                header_raw[15],
            ),
            dst_addr: Ipv4Addr::new(
                header_raw[16],
                header_raw[17],
                header_raw[18],
                header_raw[19],
            ),
        })
    }
}

impl Default for Ipv4Header {
    fn default() -> Self {
        Self {
            version_ihl: 0b01000101, // Version = 4, IHL = 5
            dscp_ecn: 0,
            total_len: Self::HEADER_LEN as u16,
            id: 0,
            flags_and_offset: 0,
            ttl: 0,
            protocol: Protocol::Tcp,
            header_checksum: 0,
            src_addr: Ipv4Addr::UNSPECIFIED,
            dst_addr: Ipv4Addr::UNSPECIFIED,
        }
    }
}

/// Assigned Internet Protocol Numbers (RFC 1700) this stack distinguishes.
///
/// Any other number is carried through unchanged so transit datagrams can be
/// forwarded regardless of what they contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Internet Control Message
    Icmp,
    /// Transmission Control
    Tcp,
    /// User Datagram
    Udp,
    /// Any other protocol number.
    Other(u8),
}

impl From<Protocol> for u8 {
    fn from(proto: Protocol) -> u8 {
        match proto {
            Protocol::Icmp => 1,
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
            Protocol::Other(val) => val,
        }
    }
}

impl From<u8> for Protocol {
    fn from(val: u8) -> Self {
        match val {
            1 => Protocol::Icmp,
            6 => Protocol::Tcp,
            17 => Protocol::Udp,
            val => Protocol::Other(val),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // Captured from a Linux host: 192.168.0.1 -> 192.168.0.44, TCP, DF set.
    const CAPTURED: [u8; 20] = [
        0x45, 0x00, 0x00, 0x3c, 0xbe, 0xfa, 0x40, 0x00, 0x40, 0x06, 0xfa, 0x43, 0xc0, 0xa8, 0x00,
        0x01, 0xc0, 0xa8, 0x00, 0x2c,
    ];

    proptest! {
        #[test]
        fn ipv4_header_parsing_no_panic(header_bytes in prop::collection::vec(any::<u8>(), 0..64)) {
            if let Ok(header) = Ipv4Header::try_from(&header_bytes[..]) {
                let bytes = header.to_be_bytes();
                let header_parsed = Ipv4Header::try_from(&bytes[..]);
                prop_assert!(header_parsed.is_ok());
                prop_assert_eq!(header, header_parsed.unwrap());
            }
        }
    }

    #[test]
    fn ipv4_header_basic_valid() {
        let header = Ipv4Header::try_from(&CAPTURED[..]);
        assert!(header.is_ok());
        let header = header.unwrap();

        assert_eq!(header.version(), 4);
        assert_eq!(header.ihl(), 5);
        assert_eq!(header.dscp(), 0);
        assert_eq!(header.ecn(), 0);
        assert_eq!(header.total_len(), 60);
        assert_eq!(header.id(), 48890);
        assert_eq!(header.flags(), 0b010);
        assert_eq!(header.fragment_offset(), 0);
        assert_eq!(header.ttl(), 64);
        assert_eq!(header.protocol(), Protocol::Tcp);
        assert_eq!(header.header_checksum(), 0xFA43);
        assert!(header.is_valid_checksum());
        assert_eq!(header.src(), Ipv4Addr::new(192, 168, 0, 1));
        assert_eq!(header.dst(), Ipv4Addr::new(192, 168, 0, 44));
    }

    #[test]
    fn ipv4_header_new_is_bit_exact() {
        let mut header = Ipv4Header::new(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            20,
            64,
            Protocol::Tcp,
        )
        .unwrap();
        header.set_header_checksum();

        let bytes = header.to_be_bytes();

        assert_eq!(bytes[0], 0x45);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), 40);
        // Identification, flags, and fragment offset are all zero.
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(bytes[8], 64);
        assert_eq!(bytes[9], 6);
        assert_eq!(checksum::checksum(&[&bytes]), 0);
    }

    #[test]
    fn ipv4_header_checksum_detects_ttl_change() {
        let mut raw = CAPTURED;
        raw[8] = 63;

        let header = Ipv4Header::try_from(&raw[..]).unwrap();
        assert!(!header.is_valid_checksum());
    }

    #[test]
    fn ipv4_header_parse_trims_to_total_len() {
        let mut datagram = CAPTURED.to_vec();
        datagram[2..4].copy_from_slice(&24u16.to_be_bytes());
        datagram.extend_from_slice(&[1, 2, 3, 4, 5, 6]);

        let (header, payload) = Ipv4Header::parse(&datagram).unwrap();
        assert_eq!(header.payload_len(), 4);
        assert_eq!(payload, &[1, 2, 3, 4]);
    }

    #[test]
    fn ipv4_header_parse_total_len_invalid() {
        // Claims 60 bytes but only the header is present.
        assert!(matches!(
            Ipv4Header::parse(&CAPTURED),
            Err(Error::Parse(ParseError::InvalidTotalLength { .. }))
        ));
    }

    #[test]
    fn ipv4_header_version_invalid() {
        let mut raw = CAPTURED;
        raw[0] = 0x65;

        assert!(matches!(
            Ipv4Header::try_from(&raw[..]),
            Err(Error::Parse(ParseError::InvalidVersion { provided: 6, .. }))
        ));
    }

    #[test]
    fn ipv4_header_ihl_invalid() {
        let mut raw = CAPTURED;
        raw[0] = 0x46;

        assert!(matches!(
            Ipv4Header::try_from(&raw[..]),
            Err(Error::Parse(ParseError::InvalidIhl { provided: 6, .. }))
        ));
    }

    #[test]
    fn ipv4_header_payload_too_large() {
        let header = Ipv4Header::new(
            Ipv4Addr::LOCALHOST,
            Ipv4Addr::LOCALHOST,
            u16::MAX as usize,
            64,
            Protocol::Tcp,
        );

        assert!(matches!(
            header,
            Err(Error::Header(HeaderError::PayloadTooLarge { .. }))
        ));
    }

    #[test]
    fn protocol_numbers_round_trip() {
        for val in 0..=u8::MAX {
            assert_eq!(u8::from(Protocol::from(val)), val);
        }
    }
}
