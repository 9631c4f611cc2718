//! Static routing with longest-prefix match (RFC 1519, RFC 4632).

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::{Error, Result};

/// An IPv4 network in CIDR notation, `a.b.c.d/n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    addr: Ipv4Addr,
    prefix_len: u8,
}

impl Cidr {
    /// Creates a network from an address and a prefix length.
    ///
    /// Host bits of `addr` are kept as given; matching only ever looks at the
    /// first `prefix_len` bits.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidAddress] if `prefix_len` exceeds 32.
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 32 {
            return Err(Error::InvalidAddress(format!("{addr}/{prefix_len}")));
        }

        Ok(Self { addr, prefix_len })
    }

    /// Returns the network address as given.
    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    /// Returns the prefix length in bits.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Returns the network mask, most significant bit first.
    pub fn mask(&self) -> u32 {
        // Shifting a u32 by 32 overflows, so /0 is handled on its own.
        match self.prefix_len {
            0 => 0,
            len => u32::MAX << (32 - len),
        }
    }

    /// Returns `true` if the first `prefix_len` bits of `addr` equal those of
    /// the network address.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = self.mask();
        (u32::from(addr) & mask) == (u32::from(self.addr) & mask)
    }
}

impl FromStr for Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidAddress(s.to_string());

        let (addr, prefix_len) = s.split_once('/').ok_or_else(invalid)?;
        let addr = addr.parse::<Ipv4Addr>().map_err(|_| invalid())?;
        let prefix_len = prefix_len.parse::<u8>().map_err(|_| invalid())?;

        Cidr::new(addr, prefix_len).map_err(|_| invalid())
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

/// A network reachable through a neighbouring host or router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingEntry {
    /// Destinations matched by this entry.
    pub network: Cidr,
    /// Neighbour to hand matching datagrams to.
    pub next_hop: Ipv4Addr,
}

impl RoutingEntry {
    /// Parses an entry from `("a.b.c.d/n", "a.b.c.d")`.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidAddress] if either string is malformed.
    pub fn parse(cidr: &str, next_hop: &str) -> Result<Self> {
        Ok(Self {
            network: cidr.parse()?,
            next_hop: next_hop
                .parse()
                .map_err(|_| Error::InvalidAddress(next_hop.to_string()))?,
        })
    }
}

/// A static routing table.
///
/// Entry order does not influence which entry wins, except between entries
/// with the same prefix length, where the first one in table order is used.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    entries: Vec<RoutingEntry>,
}

impl RoutingTable {
    /// Creates a table from `entries`.
    pub fn new(entries: Vec<RoutingEntry>) -> Self {
        Self { entries }
    }

    /// Parses a table from `(cidr, next_hop)` string pairs.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidAddress] for the first malformed pair. Nothing
    /// is returned in that case, so a caller replacing its table keeps the
    /// old one.
    pub fn parse<'a, I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let entries = entries
            .into_iter()
            .map(|(cidr, next_hop)| RoutingEntry::parse(cidr, next_hop))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(entries))
    }

    /// Returns the next hop for `dst`, or `None` if no entry matches.
    pub fn lookup(&self, dst: Ipv4Addr) -> Option<Ipv4Addr> {
        let mut best_match: Option<&RoutingEntry> = None;

        for entry in self.entries.iter().filter(|e| e.network.contains(dst)) {
            let best = best_match.get_or_insert(entry);

            // Strictly longer only, so the first of equal prefixes stays.
            if best.network.prefix_len() < entry.network.prefix_len() {
                *best = entry;
            }
        }

        best_match.map(|entry| entry.next_hop)
    }

    /// Returns the entries in table order.
    pub fn entries(&self) -> &[RoutingEntry] {
        &self.entries
    }

    /// Returns `true` if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
