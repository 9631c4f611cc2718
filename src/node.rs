//! One host or router: link, network, and transport layers wired together.
//!
//! A [Node] is driven from outside by three kinds of input, each processed to
//! completion before the next: bytes arriving on a serial line, the expiry of
//! the earliest retransmission deadline, and (through [Stream]) calls made by
//! the application from inside its callbacks.

use std::net::Ipv4Addr;
use std::time::Instant;

use crate::config::Config;
use crate::link::{LinkLayer, SerialLine};
use crate::net::{Inbound, NetworkLayer, Outbound, Routed};
use crate::protocol::ConnectionId;
use crate::protocol::headers::Protocol;
use crate::tcp::{Event, Listener};
use crate::{Result, debug, warn};

/// Consumer and producer of the byte streams accepted by a [Node].
pub trait Application {
    /// Called once per connection, right after its SYN was answered.
    fn on_accept(&mut self, _stream: &mut Stream<'_>) {}

    /// Called with in-order payload. An empty `payload` signals end of
    /// stream.
    fn on_receive(&mut self, _stream: &mut Stream<'_>, _payload: &[u8]) {}
}

/// Routers run no application.
impl Application for () {}

/// Handle on one connection, lent to the [Application] during a callback.
#[derive(Debug)]
pub struct Stream<'a> {
    id: ConnectionId,
    listener: &'a mut Listener,
    now: Instant,
}

impl Stream<'_> {
    /// Returns the 4-tuple of the connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues `data` for reliable delivery to the peer.
    ///
    /// # Errors
    ///
    /// Returns [crate::Error::ConnectionClosed] once the stream was closed.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        self.listener.send(self.id, data, self.now)
    }

    /// Closes this side of the stream.
    ///
    /// # Errors
    ///
    /// Returns [crate::Error::UnknownConnection] if the connection is gone.
    pub fn close(&mut self) -> Result<()> {
        self.listener.close(self.id, self.now)
    }
}

/// A host or router attached to its neighbours by serial lines.
#[derive(Debug)]
pub struct Node<L, A> {
    config: Config,
    link: LinkLayer<L>,
    network: NetworkLayer,
    listener: Option<Listener>,
    app: A,
}

impl<L: SerialLine, A: Application> Node<L, A> {
    /// Creates a node over `lines`, given as `(neighbour address, line)`.
    ///
    /// The node has no address, no routes, and does not listen until
    /// configured.
    pub fn new<I>(config: Config, lines: I, app: A) -> Self
    where
        I: IntoIterator<Item = (Ipv4Addr, L)>,
    {
        Self {
            config,
            link: LinkLayer::new(lines),
            network: NetworkLayer::new(&config),
            listener: None,
            app,
        }
    }

    /// Sets the address of this node.
    ///
    /// # Errors
    ///
    /// Returns [crate::Error::InvalidAddress] if `addr` is malformed.
    pub fn set_local_address(&mut self, addr: &str) -> Result<()> {
        self.network.set_local_address(addr)
    }

    /// Replaces the routing table.
    ///
    /// # Errors
    ///
    /// Returns [crate::Error::InvalidAddress] if any entry is malformed.
    pub fn set_routing_table<'a, I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.network.set_routing_table(entries)
    }

    /// Starts accepting connections on `port`, replacing any previous
    /// listener along with its connections.
    pub fn listen(&mut self, port: u16) {
        self.listener = Some(Listener::new(port, self.config));
    }

    /// Processes `chunk`, read from the line leading to `peer`.
    ///
    /// Every datagram completed by the chunk is routed. Datagrams that must
    /// be sent are transmitted even if a later datagram of the same chunk
    /// fails to process.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a datagram of the chunk. Later
    /// datagrams are still processed.
    pub fn on_line_receive(&mut self, peer: Ipv4Addr, chunk: &[u8], now: Instant) -> Result<()> {
        let network = &self.network;
        let listener = &mut self.listener;
        let mut transmit = Vec::new();

        let result = self.link.on_receive(peer, chunk, |datagram| {
            match network.on_datagram(&datagram)? {
                Routed::Transmit(out) => transmit.push(out),
                Routed::Deliver(inbound) => deliver(listener.as_mut(), inbound, now)?,
                Routed::Discard => {}
            }

            Ok(())
        });

        for out in transmit {
            self.transmit(out);
        }
        self.flush(now);

        result
    }

    /// Fires the retransmission timers due at `now`.
    pub fn on_timer(&mut self, now: Instant) {
        if let Some(listener) = self.listener.as_mut() {
            listener.on_tick(now);
        }

        self.flush(now);
    }

    /// Returns the instant [Node::on_timer] should next be called at.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.listener.as_ref().and_then(Listener::next_deadline)
    }

    /// Returns the link layer.
    pub fn link(&self) -> &LinkLayer<L> {
        &self.link
    }

    /// Returns the link layer mutably, to service the lines themselves.
    pub fn link_mut(&mut self) -> &mut LinkLayer<L> {
        &mut self.link
    }

    /// Returns the network layer.
    pub fn network(&self) -> &NetworkLayer {
        &self.network
    }

    /// Returns the listener, if listening.
    pub fn listener(&self) -> Option<&Listener> {
        self.listener.as_ref()
    }

    /// Returns the application.
    pub fn app(&self) -> &A {
        &self.app
    }

    /// Runs application callbacks for pending events, then sends every
    /// segment the transport layer has queued.
    fn flush(&mut self, now: Instant) {
        let Some(listener) = self.listener.as_mut() else {
            return;
        };

        while let Some(event) = listener.poll_event() {
            match event {
                Event::Accepted(id) => {
                    let mut stream = Stream { id, listener: &mut *listener, now };
                    self.app.on_accept(&mut stream);
                }
                Event::Received(id, payload) => {
                    let mut stream = Stream { id, listener: &mut *listener, now };
                    self.app.on_receive(&mut stream, &payload);
                }
            }
        }

        listener.remove_closed();

        while let Some(segment) = listener.poll_segment() {
            let out = segment
                .to_be_bytes()
                .and_then(|bytes| self.network.send(&bytes, segment.dst, Protocol::Tcp));

            match out {
                Ok(out) => {
                    if let Err(err) = self.link.send(&out.datagram, out.next_hop) {
                        warn!("failed to send segment to {}: {err}", segment.dst);
                    }
                }
                Err(err) => warn!("failed to send segment to {}: {err}", segment.dst),
            }
        }
    }

    fn transmit(&mut self, out: Outbound) {
        if let Err(err) = self.link.send(&out.datagram, out.next_hop) {
            warn!("failed to transmit datagram via {}: {err}", out.next_hop);
        }
    }
}

/// Hands a locally addressed datagram to the transport layer.
fn deliver(listener: Option<&mut Listener>, inbound: Inbound, now: Instant) -> Result<()> {
    match (inbound.protocol, listener) {
        (Protocol::Tcp, Some(listener)) => {
            listener.on_segment(inbound.src, inbound.dst, &inbound.payload, now)
        }
        (protocol, _) => {
            debug!(
                "no handler for {protocol:?} datagram from {}: dropping",
                inbound.src
            );
            Ok(())
        }
    }
}
