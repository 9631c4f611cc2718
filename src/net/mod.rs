//! Network/Forwarding layer.
//!
//! Classifies inbound datagrams as local (delivered upward) or transit
//! (forwarded with a decremented TTL, or answered with ICMP Time Exceeded),
//! and wraps locally originated payloads in IPv4 headers.
//!
//! The layer never touches a serial line itself. Every operation that
//! produces a datagram returns it as an [Outbound] for the caller to hand to
//! the link layer, so the layer can be tested and composed on its own.

use std::net::Ipv4Addr;

use crate::config::Config;
use crate::protocol::headers::{IcmpHeader, IcmpType, Ipv4Header, Protocol};
use crate::{Error, Result, debug, warn};

pub mod route;
pub use route::{Cidr, RoutingEntry, RoutingTable};

/// A datagram ready to be framed and sent to a neighbour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Neighbour on the other end of the serial line to use.
    pub next_hop: Ipv4Addr,
    /// Complete IPv4 datagram.
    pub datagram: Vec<u8>,
}

/// The payload of a datagram addressed to this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Source address of the datagram.
    pub src: Ipv4Addr,
    /// Destination address of the datagram (the local address).
    pub dst: Ipv4Addr,
    /// Protocol of the payload.
    pub protocol: Protocol,
    /// Payload, trimmed to the datagram's total length.
    pub payload: Vec<u8>,
}

/// Outcome of processing one inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// The datagram was addressed to this node.
    Deliver(Inbound),
    /// A datagram must be sent: the forwarded original, an ICMP error about
    /// it, or an ICMP reply to it.
    Transmit(Outbound),
    /// Nothing further to do.
    Discard,
}

/// IPv4 network layer of one host or router.
///
/// The routing table and local address belong to this instance alone.
#[derive(Debug, Clone)]
pub struct NetworkLayer {
    routes: RoutingTable,
    local: Option<Ipv4Addr>,
    ttl: u8,
    ignore_checksum: bool,
}

impl NetworkLayer {
    /// Creates a network layer with no local address and an empty routing
    /// table.
    pub fn new(config: &Config) -> Self {
        Self {
            routes: RoutingTable::default(),
            local: None,
            ttl: config.ttl,
            ignore_checksum: config.ignore_checksum,
        }
    }

    /// Sets the address of this node, given as `"a.b.c.d"`.
    ///
    /// Datagrams addressed to it are delivered upward; all others are
    /// forwarded.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidAddress] if `addr` is malformed.
    pub fn set_local_address(&mut self, addr: &str) -> Result<()> {
        let addr = addr
            .parse()
            .map_err(|_| Error::InvalidAddress(addr.to_string()))?;

        self.local = Some(addr);
        Ok(())
    }

    /// Returns the address of this node, if set.
    pub fn local_address(&self) -> Option<Ipv4Addr> {
        self.local
    }

    /// Replaces the routing table with `entries`, given as
    /// `("a.b.c.d/n", "a.b.c.d")` pairs.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidAddress] if any entry is malformed, in which case
    /// the current table is left untouched.
    pub fn set_routing_table<'a, I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.routes = RoutingTable::parse(entries)?;
        Ok(())
    }

    /// Returns the current routing table.
    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    /// Resolves the neighbour to send datagrams for `dst` to.
    pub fn next_hop(&self, dst: Ipv4Addr) -> Option<Ipv4Addr> {
        self.routes.lookup(dst)
    }

    /// Wraps `payload` in an IPv4 header from the local address to `dst`.
    ///
    /// # Errors
    ///
    /// Returns [Error::NoLocalAddress] if no local address is set,
    /// [Error::NoRoute] if `dst` is unroutable, or a header error if the
    /// payload does not fit a datagram.
    pub fn send(&self, payload: &[u8], dst: Ipv4Addr, protocol: Protocol) -> Result<Outbound> {
        let src = self.local.ok_or(Error::NoLocalAddress)?;
        self.route(src, dst, protocol, self.ttl, payload)
    }

    /// Processes one datagram received from a neighbour.
    ///
    /// # Errors
    ///
    /// Returns a parse error for malformed datagrams, and [Error::NoRoute] or
    /// [Error::NoLocalAddress] when a datagram that must be sent cannot be.
    /// Callers log and drop in every case.
    pub fn on_datagram(&self, datagram: &[u8]) -> Result<Routed> {
        let (iph, payload) = Ipv4Header::parse(datagram)?;

        if !self.ignore_checksum && !iph.is_valid_checksum() {
            warn!(
                "dropping datagram {} -> {}: invalid IPv4 header checksum",
                iph.src(),
                iph.dst()
            );
            return Ok(Routed::Discard);
        }

        if Some(iph.dst()) == self.local {
            return self.on_local(&iph, payload);
        }

        let ttl = iph.ttl().saturating_sub(1);

        if ttl > 0 {
            debug!(
                "forwarding {} -> {} (ttl {ttl}, {:?})",
                iph.src(),
                iph.dst(),
                iph.protocol()
            );

            let out = self.route(iph.src(), iph.dst(), iph.protocol(), ttl, payload)?;
            return Ok(Routed::Transmit(out));
        }

        if iph.protocol() == Protocol::Icmp
            && let Ok((icmp, _)) = IcmpHeader::parse(payload)
            && icmp.icmp_type().is_error()
        {
            debug!(
                "dropping ICMP error {} -> {}: ttl exceeded",
                iph.src(),
                iph.dst()
            );
            return Ok(Routed::Discard);
        }

        self.time_exceeded(&datagram[..Ipv4Header::HEADER_LEN], &iph, payload)
            .map(Routed::Transmit)
    }

    fn on_local(&self, iph: &Ipv4Header, payload: &[u8]) -> Result<Routed> {
        if iph.protocol() == Protocol::Icmp {
            let (icmp, body) = IcmpHeader::parse(payload)?;

            if icmp.icmp_type() == IcmpType::Echo {
                debug!("echo request from {} (seq {})", iph.src(), icmp.echo_seq());

                let mut reply = IcmpHeader::echo_reply(&icmp);
                reply.set_checksum(body);

                let mut message = reply.to_be_bytes().to_vec();
                message.extend_from_slice(body);

                let out = self.send(&message, iph.src(), Protocol::Icmp)?;
                return Ok(Routed::Transmit(out));
            }
        }

        Ok(Routed::Deliver(Inbound {
            src: iph.src(),
            dst: iph.dst(),
            protocol: iph.protocol(),
            payload: payload.to_vec(),
        }))
    }

    /// Builds ICMP Time Exceeded about the datagram with header `raw_header`
    /// and `payload`, addressed back to its source.
    fn time_exceeded(
        &self,
        raw_header: &[u8],
        iph: &Ipv4Header,
        payload: &[u8],
    ) -> Result<Outbound> {
        let quoted = &payload[..payload.len().min(IcmpHeader::QUOTED_PAYLOAD_LEN)];

        let mut body = Vec::with_capacity(raw_header.len() + quoted.len());
        body.extend_from_slice(raw_header);
        body.extend_from_slice(quoted);

        let mut icmp = IcmpHeader::time_exceeded();
        icmp.set_checksum(&body);

        let mut message = icmp.to_be_bytes().to_vec();
        message.extend_from_slice(&body);

        warn!(
            "ttl exceeded for {} -> {}: notifying source",
            iph.src(),
            iph.dst()
        );

        self.send(&message, iph.src(), Protocol::Icmp)
    }

    fn route(
        &self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        protocol: Protocol,
        ttl: u8,
        payload: &[u8],
    ) -> Result<Outbound> {
        let next_hop = self.next_hop(dst).ok_or(Error::NoRoute(dst))?;

        let mut iph = Ipv4Header::new(src, dst, payload.len(), ttl, protocol)?;
        iph.set_header_checksum();

        let mut datagram = Vec::with_capacity(Ipv4Header::HEADER_LEN + payload.len());
        iph.write(&mut datagram)?;
        datagram.extend_from_slice(payload);

        Ok(Outbound { next_hop, datagram })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::checksum;

    const HOST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const ROUTER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 254);
    const GATEWAY: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 253);
    const REMOTE: Ipv4Addr = Ipv4Addr::new(192, 168, 5, 7);

    fn router() -> NetworkLayer {
        let mut net = NetworkLayer::new(&Config::default());
        net.set_local_address("10.0.0.254").unwrap();
        net.set_routing_table([("10.0.0.1/32", "10.0.0.1"), ("0.0.0.0/0", "10.0.0.253")])
            .unwrap();
        net
    }

    fn datagram(src: Ipv4Addr, dst: Ipv4Addr, ttl: u8, protocol: Protocol, payload: &[u8]) -> Vec<u8> {
        let mut iph = Ipv4Header::new(src, dst, payload.len(), ttl, protocol).unwrap();
        iph.set_header_checksum();

        let mut datagram = iph.to_be_bytes().to_vec();
        datagram.extend_from_slice(payload);
        datagram
    }

    #[test]
    fn send_wraps_payload() {
        let mut net = NetworkLayer::new(&Config::default());
        net.set_local_address("10.0.0.1").unwrap();
        net.set_routing_table([("0.0.0.0/0", "10.0.0.254")]).unwrap();

        let out = net.send(b"segment", REMOTE, Protocol::Tcp).unwrap();
        assert_eq!(out.next_hop, ROUTER);

        let (iph, payload) = Ipv4Header::parse(&out.datagram).unwrap();
        assert_eq!(iph.src(), HOST);
        assert_eq!(iph.dst(), REMOTE);
        assert_eq!(iph.ttl(), 64);
        assert_eq!(iph.protocol(), Protocol::Tcp);
        assert!(iph.is_valid_checksum());
        assert_eq!(payload, b"segment");
    }

    #[test]
    fn send_without_route() {
        let mut net = NetworkLayer::new(&Config::default());
        net.set_local_address("10.0.0.1").unwrap();

        assert!(matches!(
            net.send(b"x", REMOTE, Protocol::Tcp),
            Err(Error::NoRoute(addr)) if addr == REMOTE
        ));
    }

    #[test]
    fn send_without_local_address() {
        let net = NetworkLayer::new(&Config::default());

        assert!(matches!(
            net.send(b"x", REMOTE, Protocol::Tcp),
            Err(Error::NoLocalAddress)
        ));
    }

    #[test]
    fn local_datagram_delivered() {
        let net = router();
        let raw = datagram(HOST, ROUTER, 64, Protocol::Tcp, b"hello");

        assert_eq!(
            net.on_datagram(&raw).unwrap(),
            Routed::Deliver(Inbound {
                src: HOST,
                dst: ROUTER,
                protocol: Protocol::Tcp,
                payload: b"hello".to_vec(),
            })
        );
    }

    #[test]
    fn transit_datagram_forwarded() {
        let net = router();
        let raw = datagram(HOST, REMOTE, 10, Protocol::Udp, b"hello");

        let Routed::Transmit(out) = net.on_datagram(&raw).unwrap() else {
            panic!("datagram not forwarded");
        };

        assert_eq!(out.next_hop, GATEWAY);

        let (iph, payload) = Ipv4Header::parse(&out.datagram).unwrap();
        assert_eq!(iph.src(), HOST);
        assert_eq!(iph.dst(), REMOTE);
        assert_eq!(iph.ttl(), 9);
        // Protocol is preserved.
        assert_eq!(iph.protocol(), Protocol::Udp);
        assert!(iph.is_valid_checksum());
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn ttl_exhausted_sends_time_exceeded() {
        let net = router();
        let payload = b"0123456789abcdef";
        let raw = datagram(REMOTE, HOST, 1, Protocol::Tcp, payload);

        let Routed::Transmit(out) = net.on_datagram(&raw).unwrap() else {
            panic!("no ICMP generated");
        };

        // Back towards the original source.
        assert_eq!(out.next_hop, GATEWAY);

        let (iph, message) = Ipv4Header::parse(&out.datagram).unwrap();
        assert_eq!(iph.src(), ROUTER);
        assert_eq!(iph.dst(), REMOTE);
        assert_eq!(iph.protocol(), Protocol::Icmp);

        let (icmp, body) = IcmpHeader::parse(message).unwrap();
        assert_eq!(icmp.icmp_type(), IcmpType::TimeExceeded);
        assert_eq!(icmp.code(), 0);
        assert_eq!(&message[4..8], &[0, 0, 0, 0]);
        assert_eq!(checksum::checksum(&[message]), 0);

        assert_eq!(body.len(), 28);
        assert_eq!(&body[..20], &raw[..20]);
        assert_eq!(&body[20..], &payload[..8]);
    }

    #[test]
    fn ttl_exhausted_short_payload_quoted_whole() {
        let net = router();
        let raw = datagram(REMOTE, HOST, 1, Protocol::Tcp, b"abc");

        let Routed::Transmit(out) = net.on_datagram(&raw).unwrap() else {
            panic!("no ICMP generated");
        };

        let (_, message) = Ipv4Header::parse(&out.datagram).unwrap();
        assert_eq!(&message[IcmpHeader::HEADER_LEN..], &raw[..]);
    }

    #[test]
    fn no_icmp_error_about_icmp_error() {
        let net = router();

        let mut icmp = IcmpHeader::time_exceeded();
        icmp.set_checksum(&[]);
        let raw = datagram(REMOTE, HOST, 1, Protocol::Icmp, &icmp.to_be_bytes());

        assert_eq!(net.on_datagram(&raw).unwrap(), Routed::Discard);
    }

    #[test]
    fn echo_request_answered() {
        let net = router();
        let request = [8u8, 0, 0xf7, 0xf8, 0x00, 0x01, 0x00, 0x02, b'p', b'i', b'n', b'g'];
        let raw = datagram(REMOTE, ROUTER, 64, Protocol::Icmp, &request);

        let Routed::Transmit(out) = net.on_datagram(&raw).unwrap() else {
            panic!("no echo reply");
        };

        let (iph, message) = Ipv4Header::parse(&out.datagram).unwrap();
        assert_eq!(iph.dst(), REMOTE);

        let (icmp, body) = IcmpHeader::parse(message).unwrap();
        assert_eq!(icmp.icmp_type(), IcmpType::EchoReply);
        assert_eq!(icmp.echo_id(), 1);
        assert_eq!(icmp.echo_seq(), 2);
        assert_eq!(body, b"ping");
    }

    #[test]
    fn corrupted_header_discarded() {
        let net = router();
        let mut raw = datagram(HOST, REMOTE, 10, Protocol::Tcp, b"x");
        raw[8] = 11;

        assert_eq!(net.on_datagram(&raw).unwrap(), Routed::Discard);

        let config = Config {
            ignore_checksum: true,
            ..Default::default()
        };
        let mut lenient = NetworkLayer::new(&config);
        lenient.set_routing_table([("0.0.0.0/0", "10.0.0.253")]).unwrap();

        assert!(matches!(
            lenient.on_datagram(&raw).unwrap(),
            Routed::Transmit(_)
        ));
    }

    #[test]
    fn transit_without_route() {
        let mut net = NetworkLayer::new(&Config::default());
        net.set_local_address("10.0.0.254").unwrap();
        let raw = datagram(HOST, REMOTE, 10, Protocol::Tcp, b"x");

        assert!(matches!(net.on_datagram(&raw), Err(Error::NoRoute(addr)) if addr == REMOTE));
    }

    #[test]
    fn routing_table_replacement_is_atomic() {
        let mut net = router();

        assert!(net.set_routing_table([("10.0.0.0/8", "10.0.0.1"), ("bogus", "10.0.0.1")]).is_err());
        assert_eq!(net.routes().entries().len(), 2);
        assert_eq!(net.next_hop(REMOTE), Some(GATEWAY));
    }

    #[test]
    fn instances_do_not_share_tables() {
        let a = router();
        let b = NetworkLayer::new(&Config::default());

        assert_eq!(a.next_hop(REMOTE), Some(GATEWAY));
        assert_eq!(b.next_hop(REMOTE), None);
    }
}
