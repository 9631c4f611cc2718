use std::io;
use std::net::Ipv4Addr;

use super::Protocol;
use crate::protocol::checksum;
use crate::{Error, ParseError, Result};

/// TCP Segment Header.
///
/// RFC 793 (3.1)
///
/// ```text
///   0                   1                   2                   3
///     0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |          Source Port          |       Destination Port        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |                        Sequence Number                        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |                    Acknowledgment Number                      |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |  Data |           |U|A|P|R|S|F|                               |
///    | Offset| Reserved  |R|C|S|S|Y|I|            Window             |
///    |       |           |G|K|H|T|N|N|                               |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |           Checksum            |         Urgent Pointer        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |                    Options                    |    Padding    |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |                             data                              |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Options are never generated. Options on received segments are skipped
/// using the data offset and otherwise ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    /// The source port number.
    src_port: u16,
    /// The destination port number.
    dst_port: u16,
    /// The sequence number of the first data octet in this segment
    /// (except when SYN is present). If SYN is present the sequence number is
    /// the initial sequence number (ISN) and the first data octet is ISN+1.
    seq_number: u32,
    /// If the ACK control bit is set this field contains the value of the next
    /// sequence number the sender of the segment is expecting to receive.
    ack_number: u32,
    /// The data offset (4-bits) indicates the number of 32 bit words in the
    /// TCP Header.
    ///
    /// The reserved 6-bits are for future use (according to RFC 793).
    ///
    /// The control bits (6-bits) from left to right:
    ///
    /// ```text
    ///    URG:  Urgent Pointer field significant
    ///    ACK:  Acknowledgment field significant
    ///    PSH:  Push Function
    ///    RST:  Reset the connection
    ///    SYN:  Synchronize sequence numbers
    ///    FIN:  No more data from sender
    /// ```
    offset_and_control_bits: u16,
    /// The number of data octets beginning with the one indicated in the
    /// acknowledgment field which the sender of this segment is willing to
    /// accept.
    window: u16,
    /// The checksum field is the 16 bit one's complement of the one's
    /// complement sum of all 16 bit words in the header and text.
    ///
    /// The checksum also covers a 96 bit pseudo header conceptually prefixed
    /// to the TCP header and gives the TCP protection against misrouted
    /// segments.
    ///
    /// ```text
    ///        +--------+--------+--------+--------+
    ///        |           Source Address          |
    ///        +--------+--------+--------+--------+
    ///        |         Destination Address       |
    ///        +--------+--------+--------+--------+
    ///        |  zero  |  PTCL  |    TCP Length   |
    ///        +--------+--------+--------+--------+
    /// ```
    checksum: u16,
    /// This field communicates the current value of the urgent pointer as a
    /// positive offset from the sequence number in this segment.
    urgent_pointer: u16,
}

impl TcpHeader {
    /// Length of a TCP header without options, in bytes.
    pub const HEADER_LEN: usize = 20;

    /// Minimum data offset of a TCP header.
    pub const MIN_DATA_OFFSET: u16 = 5;

    /// Maximum data offset of a TCP header.
    pub const MAX_DATA_OFFSET: u16 = 15;

    /// Creates a new TCP header with the specified source and destination
    /// ports, sequence number, and window size, while setting default values
    /// for other fields.
    pub fn new(src_port: u16, dst_port: u16, seq_number: u32, window: u16) -> Self {
        Self {
            src_port,
            dst_port,
            seq_number,
            window,
            ..Default::default()
        }
    }

    /// Parses the header at the start of `segment`, returning it together
    /// with the payload that follows the header and any options.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment is shorter than the header, or the data
    /// offset is out of range or points past the end of the segment.
    pub fn parse(segment: &[u8]) -> Result<(Self, &[u8])> {
        let header = Self::try_from(segment)?;
        Ok((header, &segment[header.header_len()..]))
    }

    /// Returns the `source port` field of the TCP header.
    pub fn src_port(&self) -> u16 {
        self.src_port
    }

    /// Returns the `destination port` field of the TCP header.
    pub fn dst_port(&self) -> u16 {
        self.dst_port
    }

    /// Returns the `sequence number` field of the TCP header.
    pub fn seq_number(&self) -> u32 {
        self.seq_number
    }

    /// Returns the `acknowledgment number` field of the TCP header.
    pub fn ack_number(&self) -> u32 {
        self.ack_number
    }

    /// Sets the `acknowledgment number` field of the TCP header with the
    /// provided value.
    pub fn set_ack_number(&mut self, ack: u32) {
        self.ack_number = ack;
    }

    /// Returns the `data offset` field of the TCP header.
    pub fn data_offset(&self) -> u8 {
        // Stored in the higher 4 bits.
        (self.offset_and_control_bits >> 12) as u8
    }

    /// Returns the length of the header in bytes as indicated by the data
    /// offset, including any options.
    pub fn header_len(&self) -> usize {
        (self.data_offset() as usize) << 2
    }

    /// Returns `true` if the URG (Urgent) control bit is set in the TCP header.
    pub fn urg(&self) -> bool {
        // Stored at the 5th bit.
        (self.offset_and_control_bits >> 5) & 1 == 1
    }

    /// Returns `true` if the ACK (Acknowledgment) control bit is set in the TCP
    /// header.
    pub fn ack(&self) -> bool {
        // Stored at the 4th bit.
        (self.offset_and_control_bits >> 4) & 1 == 1
    }

    /// Sets the ACK (Acknowledgment) control bit in the TCP header, if not
    /// already set.
    pub fn set_ack(&mut self) {
        self.offset_and_control_bits |= 1 << 4;
    }

    /// Returns `true` if the PSH (Push) control bit is set in the TCP header.
    pub fn psh(&self) -> bool {
        // Stored at the 3rd bit.
        (self.offset_and_control_bits >> 3) & 1 == 1
    }

    /// Sets the PSH (Push) control bit in the TCP header, if not already set.
    pub fn set_psh(&mut self) {
        self.offset_and_control_bits |= 1 << 3;
    }

    /// Returns `true` if the RST (Reset) control bit is set in the TCP header.
    pub fn rst(&self) -> bool {
        // Stored at the 2nd bit.
        (self.offset_and_control_bits >> 2) & 1 == 1
    }

    /// Sets the RST (Reset) control bit in the TCP header, if not already set.
    pub fn set_rst(&mut self) {
        self.offset_and_control_bits |= 1 << 2;
    }

    /// Returns `true` if the SYN (Synchronize) control bit is set in the TCP
    /// header.
    pub fn syn(&self) -> bool {
        // Stored at the 1st bit.
        (self.offset_and_control_bits >> 1) & 1 == 1
    }

    /// Sets the SYN (Synchronize) control bit in the TCP header, if not already
    /// set.
    pub fn set_syn(&mut self) {
        self.offset_and_control_bits |= 1 << 1;
    }

    /// Returns `true` if the FIN (Finish) control bit is set in the TCP header.
    pub fn fin(&self) -> bool {
        // Stored at the LSB.
        self.offset_and_control_bits & 1 == 1
    }

    /// Sets the FIN (Finish) control bit in the TCP header, if not already set.
    pub fn set_fin(&mut self) {
        self.offset_and_control_bits |= 1;
    }

    /// Returns the `window` field of the TCP header.
    pub fn window(&self) -> u16 {
        self.window
    }

    /// Returns the `checksum` field of the TCP header.
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    /// Computes and updates the `checksum` field for the TCP header.
    pub fn set_checksum(&mut self, src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) {
        self.checksum = self.compute_checksum(src, dst, payload);
    }

    /// Returns the `urgent pointer` field of the TCP header.
    pub fn urgent_pointer(&self) -> u16 {
        self.urgent_pointer
    }

    /// Returns the computed checksum of the TCP header.
    ///
    /// The checksum field is the 16 bit one's complement of the one's
    /// complement sum of all 16 bit words in the pseudo header, TCP header,
    /// and payload. For purposes of computing the checksum, the value of the
    /// checksum field is zero.
    pub fn compute_checksum(&self, src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) -> u16 {
        let mut raw_header = self.to_be_bytes();

        // Checksum field must be 0 for computation.
        raw_header[16] = 0x00;
        raw_header[17] = 0x00;

        let pseudo_header = pseudo_header(src, dst, Self::HEADER_LEN + payload.len());

        checksum::checksum(&[&pseudo_header, &raw_header, payload])
    }

    /// Returns the memory representation of the TCP header as a byte array in
    /// big-endian (network) byte order.
    ///
    /// Options are not serialised, so the data offset is always written as 5.
    pub fn to_be_bytes(&self) -> [u8; Self::HEADER_LEN] {
        let mut raw_header = [0u8; Self::HEADER_LEN];

        // Clear the data offset, keeping the reserved and control bits.
        let offset_and_control_bits =
            (self.offset_and_control_bits & 0x0FFF) | (Self::MIN_DATA_OFFSET << 12);

        raw_header[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        raw_header[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        raw_header[4..8].copy_from_slice(&self.seq_number.to_be_bytes());
        raw_header[8..12].copy_from_slice(&self.ack_number.to_be_bytes());
        raw_header[12..14].copy_from_slice(&offset_and_control_bits.to_be_bytes());
        raw_header[14..16].copy_from_slice(&self.window.to_be_bytes());
        raw_header[16..18].copy_from_slice(&self.checksum.to_be_bytes());
        raw_header[18..20].copy_from_slice(&self.urgent_pointer.to_be_bytes());

        raw_header
    }

    /// Writes the TCP header to the given output stream.
    ///
    /// # Note
    ///
    /// The caller must ensure the checksum is computed and updated before
    /// writing the header.
    pub fn write<T: io::Write>(&self, output: &mut T) -> Result<()> {
        output.write_all(&self.to_be_bytes())?;
        Ok(())
    }
}

/// Returns `true` if the raw `segment` (header, options, and payload as
/// received) carries a correct checksum for the given addresses.
///
/// Summing over data that includes its own checksum yields zero when the
/// checksum is intact.
pub fn verify_checksum(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> bool {
    let pseudo_header = pseudo_header(src, dst, segment.len());
    checksum::checksum(&[&pseudo_header, segment]) == 0
}

/// Builds the 96 bit pseudo header conceptually prefixed to a TCP segment of
/// `tcp_len` bytes.
fn pseudo_header(src: Ipv4Addr, dst: Ipv4Addr, tcp_len: usize) -> [u8; 12] {
    // ```text
    //        +--------+--------+--------+--------+
    //        |           Source Address          |
    //        +--------+--------+--------+--------+
    //        |         Destination Address       |
    //        +--------+--------+--------+--------+
    //        |  zero  |  PTCL  |    TCP Length   |
    //        +--------+--------+--------+--------+
    // ```
    let mut pseudo_header = [0u8; 12];

    pseudo_header[0..4].copy_from_slice(&src.octets());
    pseudo_header[4..8].copy_from_slice(&dst.octets());
    pseudo_header[8] = 0;
    pseudo_header[9] = Protocol::Tcp.into();
    pseudo_header[10..12].copy_from_slice(&(tcp_len as u16).to_be_bytes());

    pseudo_header
}

impl TryFrom<&[u8]> for TcpHeader {
    type Error = Error;

    fn try_from(header_raw: &[u8]) -> Result<Self> {
        if header_raw.len() < Self::HEADER_LEN {
            return Err(Error::Parse(ParseError::InvalidBufferLength {
                provided: header_raw.len(),
                min: Self::HEADER_LEN as u16,
            }));
        }

        let offset_and_control_bits = u16::from_be_bytes([header_raw[12], header_raw[13]]);
        let data_offset = offset_and_control_bits >> 12;

        if !(Self::MIN_DATA_OFFSET..=Self::MAX_DATA_OFFSET).contains(&data_offset) {
            return Err(Error::Parse(ParseError::InvalidDataOffset {
                provided: data_offset,
                min: Self::MIN_DATA_OFFSET,
                max: Self::MAX_DATA_OFFSET,
            }));
        }

        // There are less bytes in the buffer than advertised by data offset.
        if (data_offset << 2) as usize > header_raw.len() {
            return Err(Error::Parse(ParseError::HeaderLengthMismatch {
                provided: header_raw.len(),
                expected: data_offset << 2,
            }));
        }

        Ok(Self {
            src_port: u16::from_be_bytes([header_raw[0], header_raw[1]]),
            dst_port: u16::from_be_bytes([header_raw[2], header_raw[3]]),
            seq_number: u32::from_be_bytes([
                header_raw[4],
                header_raw[5],
                header_raw[6],
                header_raw[7],
            ]),
            ack_number: u32::from_be_bytes([
                header_raw[8],
                header_raw[9],
                header_raw[10],
                header_raw[11],
            ]),
            offset_and_control_bits,
            window: u16::from_be_bytes([header_raw[14], header_raw[15]]),
            checksum: u16::from_be_bytes([header_raw[16], header_raw[17]]),
            urgent_pointer: u16::from_be_bytes([header_raw[18], header_raw[19]]),
        })
    }
}

impl Default for TcpHeader {
    fn default() -> Self {
        Self {
            src_port: 0,
            dst_port: 0,
            seq_number: 0,
            ack_number: 0,
            // Bits 0..4 (Data Offset) = 5
            //
            // Bits 4..10 (Reserved) = 0
            //
            // Bits 10..16 (URG, ACK, PSH, RST, SYN, FIN) = 0
            offset_and_control_bits: 0b0101_000000_000000,
            window: 0,
            checksum: 0,
            urgent_pointer: 0,
        }
    }
}
