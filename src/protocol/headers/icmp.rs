use std::io;

use crate::protocol::checksum;
use crate::{Error, ParseError, Result};

/// ICMP message header (RFC 792).
///
/// ```text
///    0                   1                   2                   3
///    0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///   |     Type      |     Code      |          Checksum             |
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///   |                     Rest of Header                            |
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The rest of header is unused (zero) for Time Exceeded, and carries the
/// identifier and sequence number for Echo and Echo Reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpHeader {
    icmp_type: IcmpType,
    code: u8,
    /// Computed over the header and the message body.
    checksum: u16,
    rest_of_header: [u8; 4],
}

impl IcmpHeader {
    /// Length of an ICMP header in bytes.
    pub const HEADER_LEN: usize = 8;

    /// Bytes of the offending datagram's payload quoted in an error message,
    /// after its IPv4 header.
    pub const QUOTED_PAYLOAD_LEN: usize = 8;

    /// Creates a Time Exceeded header, code 0 (time to live exceeded in
    /// transit).
    pub fn time_exceeded() -> Self {
        Self {
            icmp_type: IcmpType::TimeExceeded,
            code: 0,
            checksum: 0,
            rest_of_header: [0; 4],
        }
    }

    /// Creates an Echo Reply header answering `request`, keeping its
    /// identifier and sequence number.
    pub fn echo_reply(request: &IcmpHeader) -> Self {
        Self {
            icmp_type: IcmpType::EchoReply,
            code: 0,
            checksum: 0,
            rest_of_header: request.rest_of_header,
        }
    }

    /// Parses the header at the start of `message`, returning it together
    /// with the message body.
    ///
    /// # Errors
    ///
    /// Returns an error if `message` is shorter than the header.
    pub fn parse(message: &[u8]) -> Result<(Self, &[u8])> {
        let header = Self::try_from(message)?;
        Ok((header, &message[Self::HEADER_LEN..]))
    }

    /// Returns the Type field.
    pub fn icmp_type(&self) -> IcmpType {
        self.icmp_type
    }

    /// Returns the Code field.
    pub fn code(&self) -> u8 {
        self.code
    }

    /// Returns the Checksum field.
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    /// Returns the identifier of an Echo or Echo Reply.
    pub fn echo_id(&self) -> u16 {
        u16::from_be_bytes([self.rest_of_header[0], self.rest_of_header[1]])
    }

    /// Returns the sequence number of an Echo or Echo Reply.
    pub fn echo_seq(&self) -> u16 {
        u16::from_be_bytes([self.rest_of_header[2], self.rest_of_header[3]])
    }

    /// Computes and sets the Checksum field over the header and `body`.
    pub fn set_checksum(&mut self, body: &[u8]) {
        let mut header = *self;

        // Checksum field must be 0 for computation.
        header.checksum = 0;

        self.checksum = checksum::checksum(&[&header.to_be_bytes(), body]);
    }

    /// Returns the memory representation of the header as a byte array in
    /// big-endian (network) byte order.
    pub fn to_be_bytes(&self) -> [u8; Self::HEADER_LEN] {
        let mut raw_header = [0u8; Self::HEADER_LEN];

        raw_header[0] = self.icmp_type.into();
        raw_header[1] = self.code;
        raw_header[2..4].copy_from_slice(&self.checksum.to_be_bytes());
        raw_header[4..8].copy_from_slice(&self.rest_of_header);

        raw_header
    }

    /// Writes the header to the given output stream.
    ///
    /// The caller must ensure the checksum is computed before writing.
    pub fn write<T: io::Write>(&self, output: &mut T) -> Result<()> {
        output.write_all(&self.to_be_bytes())?;
        Ok(())
    }
}

impl TryFrom<&[u8]> for IcmpHeader {
    type Error = Error;

    fn try_from(header_raw: &[u8]) -> Result<Self> {
        if header_raw.len() < Self::HEADER_LEN {
            return Err(Error::Parse(ParseError::InvalidBufferLength {
                provided: header_raw.len(),
                min: Self::HEADER_LEN as u16,
            }));
        }

        Ok(Self {
            icmp_type: header_raw[0].into(),
            code: header_raw[1],
            checksum: u16::from_be_bytes([header_raw[2], header_raw[3]]),
            rest_of_header: [header_raw[4], header_raw[5], header_raw[6], header_raw[7]],
        })
    }
}

/// ICMP message types this stack generates or inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpType {
    /// Type 0
    EchoReply,
    /// Type 3
    DestinationUnreachable,
    /// Type 8
    Echo,
    /// Type 11
    TimeExceeded,
    /// Type 12
    ParameterProblem,
    /// Any other type.
    Other(u8),
}

impl IcmpType {
    /// Returns `true` for error messages, which are never answered with
    /// another ICMP error.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            IcmpType::DestinationUnreachable | IcmpType::TimeExceeded | IcmpType::ParameterProblem
        )
    }
}

impl From<IcmpType> for u8 {
    fn from(kind: IcmpType) -> u8 {
        match kind {
            IcmpType::EchoReply => 0,
            IcmpType::DestinationUnreachable => 3,
            IcmpType::Echo => 8,
            IcmpType::TimeExceeded => 11,
            IcmpType::ParameterProblem => 12,
            IcmpType::Other(val) => val,
        }
    }
}

impl From<u8> for IcmpType {
    fn from(val: u8) -> Self {
        match val {
            0 => IcmpType::EchoReply,
            3 => IcmpType::DestinationUnreachable,
            8 => IcmpType::Echo,
            11 => IcmpType::TimeExceeded,
            12 => IcmpType::ParameterProblem,
            val => IcmpType::Other(val),
        }
    }
}
