//! Error types for the SLIP link, IPv4 network, and TCP transport layers.

use std::net::Ipv4Addr;
use std::{error, fmt, io, result};

use crate::protocol::ConnectionId;

/// A convenience wrapper around `Result` for [crate::Error].
pub type Result<T> = result::Result<T, Error>;

/// Set of errors that can occur while moving datagrams through the stack.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Error while reading or writing a serial line.
    Io(io::Error),
    /// Error parsing an IPv4 datagram, TCP segment, or ICMP message.
    Parse(ParseError),
    /// Error creating or manipulating a header.
    Header(HeaderError),
    /// No routing table entry matches the destination address.
    NoRoute(Ipv4Addr),
    /// The next hop is not at the other end of any configured serial line.
    UnknownLink(Ipv4Addr),
    /// A datagram must be sourced from this node, but no local address is set.
    NoLocalAddress,
    /// An address or CIDR string could not be parsed.
    InvalidAddress(String),
    /// No live connection is identified by the given 4-tuple.
    UnknownConnection(ConnectionId),
    /// The connection no longer accepts application data.
    ConnectionClosed(ConnectionId),
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Error {
        Error::Parse(err)
    }
}

impl From<HeaderError> for Error {
    fn from(err: HeaderError) -> Error {
        Error::Header(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::Io(ref err) => fmt::Display::fmt(err, f),
            Error::Parse(ref err) => fmt::Display::fmt(err, f),
            Error::Header(ref err) => fmt::Display::fmt(err, f),
            Error::NoRoute(addr) => write!(f, "no route to host: {addr}"),
            Error::UnknownLink(addr) => {
                write!(f, "no serial line leads to next hop: {addr}")
            }
            Error::NoLocalAddress => write!(f, "no local address configured"),
            Error::InvalidAddress(ref addr) => {
                write!(f, "invalid address: {addr:?} (expected \"a.b.c.d\" or \"a.b.c.d/n\")")
            }
            Error::UnknownConnection(id) => write!(f, "unknown connection: {id}"),
            Error::ConnectionClosed(id) => write!(f, "connection closed: {id}"),
        }
    }
}

/// Error occurred while trying to parse a datagram, segment, or message.
#[derive(Debug)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum ParseError {
    /// Input buffer shorter than the minimum header length.
    InvalidBufferLength { provided: usize, min: u16 },
    /// Invalid IPv4 version.
    InvalidVersion { provided: u8, expected: u8 },
    /// Invalid IPv4 IHL.
    InvalidIhl { provided: u8, expected: u8 },
    /// Invalid IPv4 total length.
    ///
    /// Value provided is less than the header length, or more than the bytes
    /// actually received.
    InvalidTotalLength { provided: u16, available: usize },
    /// Invalid TCP data offset.
    InvalidDataOffset { provided: u16, min: u16, max: u16 },
    /// Mismatch between the provided and expected TCP header length.
    ///
    /// Value provided is less than `data_offset << 2`.
    HeaderLengthMismatch { provided: usize, expected: u16 },
}

impl error::Error for ParseError {}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ParseError::InvalidBufferLength { provided, min } => {
                write!(
                    f,
                    "invalid header length: {provided} bytes (less than minimum required {min} bytes)"
                )
            }
            ParseError::InvalidVersion { provided, expected } => {
                write!(
                    f,
                    "invalid IP version: IPv{provided} (must be IPv{expected})"
                )
            }
            ParseError::InvalidIhl { provided, expected } => {
                write!(
                    f,
                    "invalid IPv4 IHL: {provided} (must be {expected}, IPv4 options are not supported)"
                )
            }
            ParseError::InvalidTotalLength {
                provided,
                available,
            } => {
                write!(
                    f,
                    "invalid IPv4 total length: {provided} bytes ({available} bytes available)"
                )
            }
            ParseError::InvalidDataOffset { provided, min, max } => {
                write!(
                    f,
                    "invalid TCP data offset: {provided} (not within the valid range: {min}..={max})"
                )
            }
            ParseError::HeaderLengthMismatch { provided, expected } => {
                write!(
                    f,
                    "invalid TCP header length: {provided} bytes (less than indicated by data offset: {expected} bytes)"
                )
            }
        }
    }
}

/// Error occurred while trying to create or manipulate a header.
#[derive(Debug)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum HeaderError {
    /// Invalid payload length for an IPv4 header.
    PayloadTooLarge { provided: usize, max: u16 },
}

impl error::Error for HeaderError {}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HeaderError::PayloadTooLarge { provided, max } => {
                write!(
                    f,
                    "failed to set IPv4 payload length: {provided} bytes (exceeds maximum allowed {max} bytes)"
                )
            }
        }
    }
}
