//! Link-Framing layer.
//!
//! Every configured serial line leads to exactly one peer, identified by its
//! IPv4 address. Outbound datagrams are SLIP-framed and written to the line of
//! their next hop; inbound bytes are unframed per line and handed upward one
//! datagram at a time.

use std::collections::HashMap;
use std::io;
use std::net::Ipv4Addr;

use crate::{Error, Result, debug};

pub mod pty;
pub mod slip;

pub use slip::SlipDecoder;

/// A point-to-point byte transport.
///
/// The line delivers bytes in order but provides no delimiting or reliability
/// of its own.
pub trait SerialLine {
    /// Transmits `bytes` on the line.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes could not be handed to the line.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl<L: SerialLine + ?Sized> SerialLine for Box<L> {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).send(bytes)
    }
}

/// One serial line together with the decoder state of its inbound bytes.
#[derive(Debug)]
struct Link<L> {
    line: L,
    decoder: SlipDecoder,
}

/// Demultiplexes datagrams over a set of serial lines keyed by the address of
/// the peer at the other end.
#[derive(Debug)]
pub struct LinkLayer<L> {
    links: HashMap<Ipv4Addr, Link<L>>,
}

impl<L: SerialLine> LinkLayer<L> {
    /// Creates a link layer over `lines`, given as `(peer address, line)`.
    pub fn new<I>(lines: I) -> Self
    where
        I: IntoIterator<Item = (Ipv4Addr, L)>,
    {
        let links = lines
            .into_iter()
            .map(|(peer, line)| {
                (
                    peer,
                    Link {
                        line,
                        decoder: SlipDecoder::new(),
                    },
                )
            })
            .collect();

        Self { links }
    }

    /// Frames `datagram` and transmits it on the line leading to `next_hop`.
    ///
    /// # Errors
    ///
    /// Returns [Error::UnknownLink] if no line leads to `next_hop`, or an I/O
    /// error if the line rejects the bytes.
    pub fn send(&mut self, datagram: &[u8], next_hop: Ipv4Addr) -> Result<()> {
        let link = self
            .links
            .get_mut(&next_hop)
            .ok_or(Error::UnknownLink(next_hop))?;

        link.line.send(&slip::encode(datagram))?;
        debug!("sent {} byte datagram to {next_hop}", datagram.len());

        Ok(())
    }

    /// Feeds a chunk of raw bytes read from the line of `peer`, calling
    /// `deliver` once per complete datagram.
    ///
    /// # Errors
    ///
    /// Returns [Error::UnknownLink] if `peer` has no line, or the first error
    /// returned by `deliver`. A failing `deliver` leaves the line's decoder
    /// empty and ready for the next frame.
    pub fn on_receive<F>(&mut self, peer: Ipv4Addr, chunk: &[u8], deliver: F) -> Result<()>
    where
        F: FnMut(Vec<u8>) -> Result<()>,
    {
        let link = self.links.get_mut(&peer).ok_or(Error::UnknownLink(peer))?;
        link.decoder.feed(chunk, deliver)
    }

    /// Returns the line leading to `peer`, if any.
    pub fn line(&self, peer: Ipv4Addr) -> Option<&L> {
        self.links.get(&peer).map(|link| &link.line)
    }

    /// Returns the line leading to `peer` mutably, if any.
    pub fn line_mut(&mut self, peer: Ipv4Addr) -> Option<&mut L> {
        self.links.get_mut(&peer).map(|link| &mut link.line)
    }

    /// Returns the addresses of all peers reachable over a line.
    pub fn peers(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.links.keys().copied()
    }
}
