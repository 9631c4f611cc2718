//! Passive TCP endpoint bound to one port.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::time::Instant;

use super::Event;
use super::connection::{Connection, State};
use crate::config::Config;
use crate::protocol::headers::{TcpHeader, verify_checksum};
use crate::protocol::{ConnectionId, SocketAddr, TcpSegment};
use crate::{Error, Result, debug, warn};

/// Accepts connections on one port and demultiplexes segments to them by
/// 4-tuple.
///
/// The listener performs no I/O. Segments it produces are queued for
/// [Listener::poll_segment], notifications for [Listener::poll_event].
///
/// A connection that reached [State::Closed] stays in the table while an
/// event about it is still queued, so the application can react to end of
/// stream on a live handle. [Listener::remove_closed] drops it afterwards.
#[derive(Debug)]
pub struct Listener {
    port: u16,
    config: Config,
    connections: HashMap<ConnectionId, Connection>,
    segments: VecDeque<TcpSegment>,
    events: VecDeque<Event>,
}

impl Listener {
    /// Creates a listener bound to `port`.
    pub fn new(port: u16, config: Config) -> Self {
        Self {
            port,
            config,
            connections: HashMap::new(),
            segments: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    /// Processes a TCP segment carried by a datagram from `src` to `dst`.
    ///
    /// Segments for another port, with a bad checksum, or matching no
    /// connection while not carrying SYN are dropped with a log line.
    ///
    /// # Errors
    ///
    /// Returns an error only if `segment` is not a well-formed TCP segment.
    pub fn on_segment(
        &mut self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        segment: &[u8],
        now: Instant,
    ) -> Result<()> {
        let (tcph, payload) = TcpHeader::parse(segment)?;

        if tcph.dst_port() != self.port {
            debug!(
                "segment for port {} (listening on {}): dropping",
                tcph.dst_port(),
                self.port
            );
            return Ok(());
        }

        if !self.config.ignore_checksum && !verify_checksum(src, dst, segment) {
            warn!("segment from {src}:{} has invalid checksum: dropping", tcph.src_port());
            return Ok(());
        }

        let id = ConnectionId {
            peer: SocketAddr::new(src, tcph.src_port()),
            local: SocketAddr::new(dst, tcph.dst_port()),
        };

        if tcph.syn() {
            if let Some(conn) = self.connections.get(&id)
                && conn.state() == State::SynReceived
                && conn.ack_no() == tcph.seq_number().wrapping_add(1)
            {
                debug!("[{id}] retransmitted SYN: resending SYN+ACK");
                self.segments.push_back(conn.syn_ack());
                return Ok(());
            }

            let (conn, syn_ack) = Connection::accept(id, tcph.seq_number(), &self.config);

            if self.connections.insert(id, conn).is_some() {
                debug!("[{id}] SYN for existing connection: replaced");
            }

            self.segments.push_back(syn_ack);
            self.events.push_back(Event::Accepted(id));

            return Ok(());
        }

        let Some(conn) = self.connections.get_mut(&id) else {
            debug!("[{id}] segment matches no connection: dropping");
            return Ok(());
        };

        conn.on_segment(&tcph, payload, now, &mut self.segments, &mut self.events);
        self.remove_closed();

        Ok(())
    }

    /// Queues `data` for transmission on connection `id`.
    ///
    /// # Errors
    ///
    /// Returns [Error::UnknownConnection] if `id` is not live, or
    /// [Error::ConnectionClosed] if the connection was closed locally.
    pub fn send(&mut self, id: ConnectionId, data: &[u8], now: Instant) -> Result<()> {
        let conn = self
            .connections
            .get_mut(&id)
            .ok_or(Error::UnknownConnection(id))?;

        conn.send(data, now, &mut self.segments)
    }

    /// Starts closing connection `id`. Closing a connection that already
    /// reached [State::Closed] does nothing.
    ///
    /// # Errors
    ///
    /// Returns [Error::UnknownConnection] if `id` is not in the table.
    pub fn close(&mut self, id: ConnectionId, now: Instant) -> Result<()> {
        let conn = self
            .connections
            .get_mut(&id)
            .ok_or(Error::UnknownConnection(id))?;

        conn.close(now, &mut self.segments);

        Ok(())
    }

    /// Fires every retransmission timer due at `now`, dropping connections
    /// that were reset as a result.
    pub fn on_tick(&mut self, now: Instant) {
        for conn in self.connections.values_mut() {
            conn.on_tick(now, &mut self.segments, &mut self.events);
        }

        self.remove_closed();
    }

    /// Drops connections in [State::Closed] that no queued event refers to.
    pub fn remove_closed(&mut self) {
        let events = &self.events;

        self.connections.retain(|id, conn| {
            conn.state() != State::Closed || events.iter().any(|event| event.id() == *id)
        });
    }

    /// Returns the earliest armed retransmission deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.connections.values().filter_map(Connection::deadline).min()
    }

    /// Takes the next segment waiting to be sent.
    pub fn poll_segment(&mut self) -> Option<TcpSegment> {
        self.segments.pop_front()
    }

    /// Takes the next notification for the application.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Returns connection `id`, if it is in the table.
    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Returns the number of connections in the table.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
