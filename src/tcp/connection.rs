//! Per-connection TCP state machine (server side only).
//!
//! ```text
//!   SYN received     first ACK        FIN sent or received    our FIN acked and
//!   --------------> SYN_RECEIVED ---> ESTABLISHED ---------> CLOSING --------------> CLOSED
//!                                                                     peer FIN seen
//! ```
//!
//! RST, or running out of retransmissions, moves any state to CLOSED.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::Event;
use super::rtt::RttEstimator;
use super::timer::RetransmitTimer;
use crate::config::Config;
use crate::protocol::headers::TcpHeader;
use crate::protocol::{ConnectionId, TcpSegment};
use crate::{Error, Result, debug, info, warn};

/// Connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// SYN received and SYN+ACK sent, waiting for the peer's ACK.
    SynReceived,
    /// Handshake complete, data flows both ways.
    Established,
    /// A FIN has been sent or received (or close was requested).
    Closing,
    /// Both FINs exchanged and ours acknowledged, or the connection was reset.
    /// The owning listener drops connections in this state.
    Closed,
}

/// A transmitted segment waiting to be acknowledged.
#[derive(Debug)]
struct Unacked {
    /// Sequence number of the first payload byte, or of the FIN.
    seq: u32,
    payload: Vec<u8>,
    fin: bool,
    /// Time of the first transmission.
    sent_at: Instant,
    /// Excludes the segment from RTT sampling once set.
    retransmitted: bool,
}

impl Unacked {
    /// Sequence space occupied by the segment.
    fn len(&self) -> u32 {
        self.payload.len() as u32 + u32::from(self.fin)
    }
}

/// One TCP connection accepted by a [super::Listener].
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    state: State,
    /// Oldest unacknowledged sequence number.
    snd_una: u32,
    /// Next sequence number this side will send.
    seq_no: u32,
    /// Next sequence number expected from the peer.
    ack_no: u32,
    /// Transmitted segments in sequence order.
    unacked: VecDeque<Unacked>,
    /// Application bytes not yet cut into segments.
    backlog: VecDeque<u8>,
    /// Congestion window, in segments.
    cwnd: u32,
    /// Acknowledged payload bytes not yet converted into window growth.
    acked_bytes: usize,
    mss: usize,
    rcv_wnd: u16,
    rtt: RttEstimator,
    min_rto: Duration,
    timer: RetransmitTimer,
    /// Consecutive timeouts without progress.
    retransmits: usize,
    max_retransmits: usize,
    /// `close` was called while data was still waiting to be segmented.
    fin_pending: bool,
    fin_sent: bool,
    peer_fin: bool,
}

impl Connection {
    /// Creates a connection in response to a SYN carrying `peer_isn`,
    /// returning it together with the SYN+ACK to send.
    ///
    /// The local initial sequence number is [Config::isn] if set, otherwise
    /// chosen at random.
    pub fn accept(id: ConnectionId, peer_isn: u32, config: &Config) -> (Self, TcpSegment) {
        let iss = config.isn.unwrap_or_else(rand::random::<u32>);

        let conn = Self {
            id,
            state: State::SynReceived,
            snd_una: iss,
            // The SYN occupies one sequence number.
            seq_no: iss.wrapping_add(1),
            ack_no: peer_isn.wrapping_add(1),
            unacked: VecDeque::new(),
            backlog: VecDeque::new(),
            cwnd: config.initial_window.max(1),
            acked_bytes: 0,
            mss: config.mss.max(1),
            rcv_wnd: config.receive_window,
            rtt: RttEstimator::new(config.initial_rto),
            min_rto: config.min_rto,
            timer: RetransmitTimer::new(),
            retransmits: 0,
            max_retransmits: config.max_retransmits,
            fin_pending: false,
            fin_sent: false,
            peer_fin: false,
        };

        let syn_ack = conn.create_syn_ack(iss);

        debug!("[{id}] received SYN (isn {peer_isn}), sent SYN+ACK (isn {iss}): SYN_RECEIVED");

        (conn, syn_ack)
    }

    /// Returns the identifier of the connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Returns the next sequence number this side will send.
    pub fn seq_no(&self) -> u32 {
        self.seq_no
    }

    /// Returns the next sequence number expected from the peer.
    pub fn ack_no(&self) -> u32 {
        self.ack_no
    }

    /// Returns the congestion window, in segments.
    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    /// Returns the number of payload bytes sent but not yet acknowledged.
    pub fn bytes_in_flight(&self) -> usize {
        self.unacked.iter().map(|seg| seg.payload.len()).sum()
    }

    /// Returns the number of application bytes waiting for window space.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Returns the round-trip estimator.
    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    /// Rebuilds the SYN+ACK sent on creation, for a peer that retransmitted
    /// its SYN. Only meaningful while in [State::SynReceived].
    pub fn syn_ack(&self) -> TcpSegment {
        self.create_syn_ack(self.snd_una)
    }

    /// Returns the instant the retransmission timer expires at, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// Processes a segment received from the peer, queueing segments to send
    /// in `out` and application notifications in `events`.
    ///
    /// Segments whose sequence number is not the next one expected are
    /// dropped before their ACK field is looked at, and are not acknowledged.
    pub fn on_segment(
        &mut self,
        tcph: &TcpHeader,
        payload: &[u8],
        now: Instant,
        out: &mut VecDeque<TcpSegment>,
        events: &mut VecDeque<Event>,
    ) {
        if self.state == State::Closed {
            return;
        }

        let id = self.id;

        if tcph.seq_number() != self.ack_no {
            debug!(
                "[{id}] ({:?}) out-of-order segment (seq {}, expected {}): dropping",
                self.state,
                tcph.seq_number(),
                self.ack_no
            );
            return;
        }

        if tcph.rst() {
            warn!("[{id}] ({:?}) received RST: CLOSED", self.state);
            self.terminate(events);
            return;
        }

        if tcph.ack() {
            self.on_ack(tcph.ack_number(), now, out);
        }

        if !payload.is_empty() {
            self.ack_no = self.ack_no.wrapping_add(payload.len() as u32);
            events.push_back(Event::Received(id, payload.to_vec()));
        }

        if tcph.fin() && !self.peer_fin {
            debug!("[{id}] ({:?}) received FIN: CLOSING", self.state);

            self.peer_fin = true;
            // The FIN occupies one sequence number.
            self.ack_no = self.ack_no.wrapping_add(1);
            self.state = State::Closing;

            events.push_back(Event::Received(id, Vec::new()));
        }

        if !payload.is_empty() || tcph.fin() {
            out.push_back(self.create_ack(self.seq_no, &[]));
        }

        self.try_finish();
    }

    /// Queues `data` for transmission and sends as much of it as the
    /// congestion window allows.
    ///
    /// # Errors
    ///
    /// Returns [Error::ConnectionClosed] once `close` was called or the
    /// connection was reset.
    pub fn send(&mut self, data: &[u8], now: Instant, out: &mut VecDeque<TcpSegment>) -> Result<()> {
        if self.state == State::Closed || self.fin_pending || self.fin_sent {
            return Err(Error::ConnectionClosed(self.id));
        }

        self.backlog.extend(data);
        self.release(now, out);

        Ok(())
    }

    /// Starts closing this side of the connection.
    ///
    /// The FIN is sent right away when nothing is waiting for window space,
    /// otherwise right after the last backlog byte has been sent. It does not
    /// wait for outstanding data to be acknowledged. Closing twice is a no-op.
    pub fn close(&mut self, now: Instant, out: &mut VecDeque<TcpSegment>) {
        if self.state == State::Closed || self.fin_pending || self.fin_sent {
            return;
        }

        self.state = State::Closing;

        if self.backlog.is_empty() {
            self.send_fin(now, out);
        } else {
            debug!(
                "[{}] (CLOSING) FIN deferred behind {} backlog bytes",
                self.id,
                self.backlog.len()
            );
            self.fin_pending = true;
        }
    }

    /// Handles expiry of the retransmission timer.
    ///
    /// The window is halved and only the oldest unacknowledged segment is
    /// resent. Once `max_retransmits` retransmissions in a row went
    /// unanswered, the connection is reset instead.
    pub fn on_tick(
        &mut self,
        now: Instant,
        out: &mut VecDeque<TcpSegment>,
        events: &mut VecDeque<Event>,
    ) {
        if self.state == State::Closed || !self.timer.expired(now) {
            return;
        }

        let id = self.id;

        if self.unacked.is_empty() {
            self.timer.cancel();
            return;
        }

        if self.retransmits >= self.max_retransmits {
            warn!(
                "[{id}] ({:?}) retransmit limit ({}) reached, sending RST: CLOSED",
                self.state, self.max_retransmits
            );

            out.push_back(self.create_rst());
            self.terminate(events);
            return;
        }

        self.retransmits += 1;
        self.cwnd = (self.cwnd / 2).max(1);

        let ack_no = self.ack_no;
        let rcv_wnd = self.rcv_wnd;
        let (src_port, dst_port) = (self.id.local.port, self.id.peer.port);

        if let Some(oldest) = self.unacked.front_mut() {
            oldest.retransmitted = true;

            let mut tcph = TcpHeader::new(src_port, dst_port, oldest.seq, rcv_wnd);
            tcph.set_ack_number(ack_no);
            tcph.set_ack();

            if oldest.fin {
                tcph.set_fin();
            } else {
                tcph.set_psh();
            }

            debug!(
                "[{id}] ({:?}) timeout: retransmitting seq {} ({} bytes), cwnd {}",
                self.state,
                oldest.seq,
                oldest.payload.len(),
                self.cwnd
            );

            out.push_back(TcpSegment::new(
                self.id.local.addr,
                self.id.peer.addr,
                tcph,
                &oldest.payload,
            ));
        }

        self.timer.arm(now, self.timeout());
    }

    /// Processes an acknowledgment number from the peer.
    fn on_ack(&mut self, ack: u32, now: Instant, out: &mut VecDeque<TcpSegment>) {
        // Only acknowledgments of something sent and not yet acknowledged
        // count: SND.UNA < ACK <= SND.NXT.
        if !is_between_wrapped(self.snd_una, ack, self.seq_no.wrapping_add(1)) {
            return;
        }

        if self.state == State::SynReceived {
            info!("[{}] connection established", self.id);
            self.state = State::Established;
        }

        let mut newly_acked = 0usize;
        let mut sample = None;

        while let Some(oldest) = self.unacked.front_mut() {
            let end = oldest.seq.wrapping_add(oldest.len());

            if !wrapping_lt(ack, end) {
                // Fully covered.
                newly_acked += oldest.payload.len();

                if !oldest.retransmitted {
                    sample = Some(now.saturating_duration_since(oldest.sent_at));
                }

                self.unacked.pop_front();
            } else {
                if wrapping_lt(oldest.seq, ack) {
                    // Partially covered: keep only the unacknowledged tail.
                    let covered = ack.wrapping_sub(oldest.seq) as usize;
                    oldest.payload.drain(..covered);
                    oldest.seq = ack;
                    newly_acked += covered;
                }
                break;
            }
        }

        self.snd_una = ack;
        self.retransmits = 0;

        if let Some(rtt) = sample {
            self.rtt.sample(rtt);
            debug!(
                "[{}] rtt sample {rtt:?}: srtt {:?}, rto {:?}",
                self.id,
                self.rtt.srtt(),
                self.rtt.rto()
            );
        }

        self.grow_window(newly_acked);
        self.release(now, out);

        if self.unacked.is_empty() {
            self.timer.cancel();
        } else {
            self.timer.arm(now, self.timeout());
        }
    }

    /// Returns the timeout to arm the retransmission timer with: the
    /// estimated RTO, but never less than `min_rto`.
    fn timeout(&self) -> Duration {
        self.rtt.rto().max(self.min_rto)
    }

    /// Opens the window by one segment per full MSS of acknowledged payload.
    fn grow_window(&mut self, newly_acked: usize) {
        self.acked_bytes += newly_acked;

        let grown = self.acked_bytes / self.mss;
        if grown > 0 {
            self.cwnd = self.cwnd.saturating_add(grown as u32);
            self.acked_bytes %= self.mss;

            debug!("[{}] cwnd grown to {}", self.id, self.cwnd);
        }
    }

    /// Moves backlog bytes into segments while the window has room, then sends
    /// a deferred FIN once the backlog is empty.
    fn release(&mut self, now: Instant, out: &mut VecDeque<TcpSegment>) {
        let window = self.cwnd as usize * self.mss;

        loop {
            let room = window.saturating_sub(self.bytes_in_flight());
            let len = self.mss.min(room).min(self.backlog.len());

            if len == 0 {
                break;
            }

            let payload: Vec<u8> = self.backlog.drain(..len).collect();
            let seq = self.seq_no;

            out.push_back(self.create_ack(seq, &payload));

            self.seq_no = self.seq_no.wrapping_add(len as u32);
            self.unacked.push_back(Unacked {
                seq,
                payload,
                fin: false,
                sent_at: now,
                retransmitted: false,
            });

            if !self.timer.is_armed() {
                self.timer.arm(now, self.timeout());
            }
        }

        if self.fin_pending && self.backlog.is_empty() {
            self.fin_pending = false;
            self.send_fin(now, out);
        }
    }

    fn send_fin(&mut self, now: Instant, out: &mut VecDeque<TcpSegment>) {
        let seq = self.seq_no;

        out.push_back(self.create_fin(seq));
        debug!("[{}] ({:?}) sent FIN (seq {seq})", self.id, self.state);

        self.seq_no = self.seq_no.wrapping_add(1);
        self.fin_sent = true;
        self.unacked.push_back(Unacked {
            seq,
            payload: Vec::new(),
            fin: true,
            sent_at: now,
            retransmitted: false,
        });

        if !self.timer.is_armed() {
            self.timer.arm(now, self.timeout());
        }
    }

    /// Moves to CLOSED once our FIN is acknowledged and the peer's FIN has
    /// been received.
    fn try_finish(&mut self) {
        if self.fin_sent && self.peer_fin && self.unacked.is_empty() {
            info!("[{}] connection closed", self.id);
            self.state = State::Closed;
            self.timer.cancel();
        }
    }

    /// Closes the connection abruptly, signalling end of stream if the peer
    /// never did.
    fn terminate(&mut self, events: &mut VecDeque<Event>) {
        self.state = State::Closed;
        self.timer.cancel();
        self.unacked.clear();
        self.backlog.clear();

        if !self.peer_fin {
            self.peer_fin = true;
            events.push_back(Event::Received(self.id, Vec::new()));
        }
    }

    /// Creates the `SYN+ACK` answering the peer's connection request.
    fn create_syn_ack(&self, iss: u32) -> TcpSegment {
        let mut syn_ack = TcpHeader::new(self.id.local.port, self.id.peer.port, iss, self.rcv_wnd);

        // Acknowledge the peer's SYN.
        syn_ack.set_ack_number(self.ack_no);
        syn_ack.set_syn();
        syn_ack.set_ack();

        TcpSegment::new(self.id.local.addr, self.id.peer.addr, syn_ack, &[])
    }

    /// Creates an `ACK` segment, carrying `payload` if non-empty.
    fn create_ack(&self, seq: u32, payload: &[u8]) -> TcpSegment {
        let mut ack = TcpHeader::new(self.id.local.port, self.id.peer.port, seq, self.rcv_wnd);

        ack.set_ack_number(self.ack_no);
        ack.set_ack();

        if !payload.is_empty() {
            ack.set_psh();
        }

        TcpSegment::new(self.id.local.addr, self.id.peer.addr, ack, payload)
    }

    /// Creates a `FIN+ACK` segment.
    fn create_fin(&self, seq: u32) -> TcpSegment {
        let mut fin = TcpHeader::new(self.id.local.port, self.id.peer.port, seq, self.rcv_wnd);

        fin.set_ack_number(self.ack_no);
        fin.set_fin();
        fin.set_ack();

        TcpSegment::new(self.id.local.addr, self.id.peer.addr, fin, &[])
    }

    /// Creates an `RST` segment to abort the connection.
    fn create_rst(&self) -> TcpSegment {
        let mut rst = TcpHeader::new(self.id.local.port, self.id.peer.port, self.seq_no, 0);

        rst.set_ack_number(self.ack_no);
        rst.set_rst();
        rst.set_ack();

        TcpSegment::new(self.id.local.addr, self.id.peer.addr, rst, &[])
    }
}

/// Returns `true` if `lhs` precedes `rhs` in sequence space.
#[inline]
fn wrapping_lt(lhs: u32, rhs: u32) -> bool {
    // RFC 1323 (2.3)
    //
    // TCP determines if a data segment is "old" or "new" by testing whether
    // its sequence number is within 2**31 bytes of the left edge of the window,
    // and if it is not, discarding the data as "old".
    lhs.wrapping_sub(rhs) > (1 << 31)
}

/// Returns `true` if `x` lies strictly between `start` and `end` in sequence
/// space.
#[inline]
fn is_between_wrapped(start: u32, x: u32, end: u32) -> bool {
    wrapping_lt(start, x) && wrapping_lt(x, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MIN_RTO;
    use crate::protocol::SocketAddr;
    use proptest::prelude::*;
    use std::net::Ipv4Addr;

    const ISS: u32 = 5000;
    const PEER_ISN: u32 = 1000;
    const MSS: usize = 1460;
    const MS: Duration = Duration::from_millis(1);
    /// Longer than any timeout a test arms.
    const FOREVER: Duration = Duration::from_secs(3600);

    fn id() -> ConnectionId {
        ConnectionId {
            peer: SocketAddr::new(Ipv4Addr::new(10, 0, 0, 2), 51000),
            local: SocketAddr::new(Ipv4Addr::new(10, 0, 0, 1), 7000),
        }
    }

    fn config() -> Config {
        Config {
            isn: Some(ISS),
            ..Default::default()
        }
    }

    /// A connection past the handshake, along with the instant it was
    /// established.
    fn established(config: &Config) -> (Connection, Instant) {
        let now = Instant::now();
        let (mut conn, _) = Connection::accept(id(), PEER_ISN, config);

        let mut out = VecDeque::new();
        let mut events = VecDeque::new();
        conn.on_segment(&peer_ack(ISS + 1), &[], now, &mut out, &mut events);

        assert_eq!(conn.state(), State::Established);
        assert!(out.is_empty());

        (conn, now)
    }

    fn peer_segment(seq: u32, ack: u32) -> TcpHeader {
        let mut tcph = TcpHeader::new(51000, 7000, seq, 1024);
        tcph.set_ack_number(ack);
        tcph.set_ack();
        tcph
    }

    fn peer_ack(ack: u32) -> TcpHeader {
        peer_segment(PEER_ISN + 1, ack)
    }

    proptest! {
        #[test]
        fn wrapping_lt_is_antisymmetric(a in any::<u32>(), b in any::<u32>()) {
            prop_assume!(a != b && a.wrapping_sub(b) != 1 << 31);
            prop_assert_ne!(wrapping_lt(a, b), wrapping_lt(b, a));
        }

        #[test]
        fn sent_bytes_are_segmented_in_order(len in 1usize..10_000, cwnd in 1u32..8) {
            let config = Config { initial_window: cwnd, ..config() };
            let (mut conn, now) = established(&config);
            let mut out = VecDeque::new();

            conn.send(&vec![7u8; len], now, &mut out).unwrap();

            let mut expected_seq = ISS + 1;
            for seg in &out {
                prop_assert_eq!(seg.tcp.seq_number(), expected_seq);
                prop_assert!(seg.payload.len() <= MSS);
                expected_seq += seg.payload.len() as u32;
            }

            let sent = (expected_seq - ISS - 1) as usize;
            prop_assert_eq!(sent, len.min(cwnd as usize * MSS));
            prop_assert_eq!(conn.backlog_len(), len - sent);
        }
    }

    #[test]
    fn handshake_syn_ack() {
        let (conn, syn_ack) = Connection::accept(id(), PEER_ISN, &config());

        assert_eq!(conn.state(), State::SynReceived);
        assert!(syn_ack.tcp.syn());
        assert!(syn_ack.tcp.ack());
        assert_eq!(syn_ack.tcp.seq_number(), ISS);
        assert_eq!(syn_ack.tcp.ack_number(), PEER_ISN + 1);
        assert_eq!(syn_ack.tcp.src_port(), 7000);
        assert_eq!(syn_ack.tcp.dst_port(), 51000);
        assert_eq!(syn_ack.dst, Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn data_delivered_and_acked() {
        let (mut conn, now) = established(&config());
        let mut out = VecDeque::new();
        let mut events = VecDeque::new();

        let tcph = peer_segment(PEER_ISN + 1, ISS + 1);
        conn.on_segment(&tcph, b"hello", now, &mut out, &mut events);

        assert_eq!(conn.ack_no(), PEER_ISN + 6);
        assert!(matches!(events.pop_front(), Some(Event::Received(_, data)) if data == b"hello"));

        let ack = out.pop_front().unwrap();
        assert!(ack.tcp.ack());
        assert_eq!(ack.tcp.ack_number(), PEER_ISN + 6);
        assert!(ack.payload.is_empty());
    }

    #[test]
    fn out_of_order_dropped_without_ack() {
        let (mut conn, now) = established(&config());
        let mut out = VecDeque::new();
        let mut events = VecDeque::new();

        let tcph = peer_segment(PEER_ISN + 100, ISS + 1);
        conn.on_segment(&tcph, b"later", now, &mut out, &mut events);

        assert!(out.is_empty());
        assert!(events.is_empty());
        assert_eq!(conn.ack_no(), PEER_ISN + 1);
    }

    #[test]
    fn out_of_order_ack_ignored() {
        let (mut conn, now) = established(&config());
        let mut out = VecDeque::new();
        let mut events = VecDeque::new();

        conn.send(b"abc", now, &mut out).unwrap();
        out.clear();

        conn.on_segment(&peer_segment(PEER_ISN + 9, ISS + 4), &[], now, &mut out, &mut events);

        assert_eq!(conn.bytes_in_flight(), 3);
    }

    #[test]
    fn window_grows_and_flushes_backlog() {
        let (mut conn, now) = established(&config());
        let mut out = VecDeque::new();
        let mut events = VecDeque::new();

        conn.send(&[1u8; 4 * MSS], now, &mut out).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload.len(), MSS);
        assert_eq!(conn.backlog_len(), 3 * MSS);
        out.clear();

        let ack = peer_ack(ISS + 1 + MSS as u32);
        conn.on_segment(&ack, &[], now + 10 * MS, &mut out, &mut events);

        assert_eq!(conn.cwnd(), 2);
        assert_eq!(out.len(), 2);
        assert_eq!(conn.bytes_in_flight(), 2 * MSS);
        assert_eq!(out[0].tcp.seq_number(), ISS + 1 + MSS as u32);
        assert_eq!(out[1].tcp.seq_number(), ISS + 1 + 2 * MSS as u32);
        assert_eq!(conn.backlog_len(), MSS);
    }

    #[test]
    fn window_grows_per_full_mss_only() {
        let (mut conn, now) = established(&config());
        let mut out = VecDeque::new();
        let mut events = VecDeque::new();

        conn.send(&[1u8; 1000], now, &mut out).unwrap();
        conn.on_segment(&peer_ack(ISS + 1001), &[], now, &mut out, &mut events);
        assert_eq!(conn.cwnd(), 1);

        conn.send(&[1u8; 1000], now, &mut out).unwrap();
        conn.on_segment(&peer_ack(ISS + 2001), &[], now, &mut out, &mut events);
        assert_eq!(conn.cwnd(), 2);
    }

    #[test]
    fn partial_ack_trims_oldest() {
        let (mut conn, now) = established(&config());
        let mut out = VecDeque::new();
        let mut events = VecDeque::new();

        conn.send(b"0123456789", now, &mut out).unwrap();
        conn.on_segment(&peer_ack(ISS + 5), &[], now, &mut out, &mut events);

        assert_eq!(conn.bytes_in_flight(), 6);
        assert!(conn.deadline().is_some());
    }

    #[test]
    fn timeout_halves_window_and_resends_oldest() {
        let config = Config {
            initial_window: 4,
            ..config()
        };
        let (mut conn, now) = established(&config);
        let mut out = VecDeque::new();
        let mut events = VecDeque::new();

        conn.send(&[1u8; 4 * MSS], now, &mut out).unwrap();
        assert_eq!(out.len(), 4);
        out.clear();

        conn.on_tick(now + config.initial_rto, &mut out, &mut events);

        assert_eq!(conn.cwnd(), 2);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tcp.seq_number(), ISS + 1);
        assert_eq!(out[0].payload.len(), MSS);
        assert_eq!(conn.deadline(), Some(now + config.initial_rto * 2));
    }

    #[test]
    fn timeout_window_floor_is_one() {
        let (mut conn, now) = established(&config());
        let mut out = VecDeque::new();
        let mut events = VecDeque::new();

        conn.send(b"x", now, &mut out).unwrap();
        conn.on_tick(now + FOREVER, &mut out, &mut events);

        assert_eq!(conn.cwnd(), 1);
    }

    #[test]
    fn timer_not_expired_does_nothing() {
        let (mut conn, now) = established(&config());
        let mut out = VecDeque::new();
        let mut events = VecDeque::new();

        conn.send(b"x", now, &mut out).unwrap();
        out.clear();
        conn.on_tick(now + 999 * MS, &mut out, &mut events);

        assert!(out.is_empty());
    }

    #[test]
    fn rtt_sampled_from_acks() {
        let (mut conn, now) = established(&config());
        let mut out = VecDeque::new();
        let mut events = VecDeque::new();

        conn.send(b"a", now, &mut out).unwrap();
        conn.on_segment(&peer_ack(ISS + 2), &[], now + 100 * MS, &mut out, &mut events);
        assert_eq!(conn.rtt().srtt(), Some(100 * MS));

        let t1 = now + 200 * MS;
        conn.send(b"b", t1, &mut out).unwrap();
        conn.on_segment(&peer_ack(ISS + 3), &[], t1 + 140 * MS, &mut out, &mut events);
        assert_eq!(conn.rtt().srtt(), Some(105 * MS));
    }

    #[test]
    fn timer_armed_no_shorter_than_min_rto() {
        let (mut conn, now) = established(&config());
        let mut out = VecDeque::new();
        let mut events = VecDeque::new();

        conn.send(b"a", now, &mut out).unwrap();

        let t1 = now + Duration::from_micros(200);
        conn.on_segment(&peer_ack(ISS + 2), &[], t1, &mut out, &mut events);
        assert!(conn.rtt().rto() < MS);

        conn.send(b"b", t1, &mut out).unwrap();
        assert_eq!(conn.deadline(), Some(t1 + DEFAULT_MIN_RTO));
        out.clear();

        // A delayed ACK arriving 40ms later still finds nothing resent.
        let t2 = t1 + 40 * MS;
        conn.on_tick(t2, &mut out, &mut events);
        assert!(out.is_empty());

        conn.on_segment(&peer_ack(ISS + 3), &[], t2, &mut out, &mut events);
        assert_eq!(conn.state(), State::Established);
        assert_eq!(conn.deadline(), None);
        assert!(events.is_empty());
    }

    #[test]
    fn syn_ack_rebuilt_unchanged() {
        let (conn, syn_ack) = Connection::accept(id(), PEER_ISN, &config());

        assert_eq!(conn.syn_ack().tcp, syn_ack.tcp);
    }

    #[test]
    fn retransmitted_segment_not_sampled() {
        let (mut conn, now) = established(&config());
        let mut out = VecDeque::new();
        let mut events = VecDeque::new();

        conn.send(b"a", now, &mut out).unwrap();
        conn.on_tick(now + FOREVER, &mut out, &mut events);
        conn.on_segment(&peer_ack(ISS + 2), &[], now + FOREVER, &mut out, &mut events);

        assert_eq!(conn.rtt().srtt(), None);
        assert_eq!(conn.deadline(), None);
    }

    #[test]
    fn retransmit_limit_resets() {
        let config = Config {
            max_retransmits: 2,
            ..config()
        };
        let (mut conn, mut now) = established(&config);
        let mut out = VecDeque::new();
        let mut events = VecDeque::new();

        conn.send(b"a", now, &mut out).unwrap();
        out.clear();

        for _ in 0..2 {
            now += FOREVER;
            conn.on_tick(now, &mut out, &mut events);
            assert_eq!(out.pop_front().map(|seg| seg.payload), Some(b"a".to_vec()));
        }

        now += FOREVER;
        conn.on_tick(now, &mut out, &mut events);

        let rst = out.pop_front().unwrap();
        assert!(rst.tcp.rst());
        assert_eq!(conn.state(), State::Closed);
        assert_eq!(conn.deadline(), None);
        assert!(matches!(events.pop_front(), Some(Event::Received(_, data)) if data.is_empty()));
    }

    #[test]
    fn peer_close_then_local_close() {
        let (mut conn, now) = established(&config());
        let mut out = VecDeque::new();
        let mut events = VecDeque::new();

        let mut fin = peer_ack(ISS + 1);
        fin.set_fin();
        conn.on_segment(&fin, &[], now, &mut out, &mut events);

        assert_eq!(conn.state(), State::Closing);
        assert_eq!(conn.ack_no(), PEER_ISN + 2);
        assert!(matches!(events.pop_front(), Some(Event::Received(_, data)) if data.is_empty()));
        assert_eq!(out.pop_front().unwrap().tcp.ack_number(), PEER_ISN + 2);

        conn.close(now, &mut out);
        let our_fin = out.pop_front().unwrap();
        assert!(our_fin.tcp.fin());
        assert_eq!(our_fin.tcp.seq_number(), ISS + 1);

        conn.on_segment(&peer_segment(PEER_ISN + 2, ISS + 2), &[], now, &mut out, &mut events);
        assert_eq!(conn.state(), State::Closed);
    }

    #[test]
    fn close_deferred_behind_backlog() {
        let (mut conn, now) = established(&config());
        let mut out = VecDeque::new();
        let mut events = VecDeque::new();

        conn.send(&[1u8; 2 * MSS], now, &mut out).unwrap();
        conn.close(now, &mut out);

        assert_eq!(out.len(), 1);
        assert!(!out[0].tcp.fin());
        assert!(matches!(
            conn.send(b"more", now, &mut out),
            Err(Error::ConnectionClosed(_))
        ));
        out.clear();

        conn.on_segment(&peer_ack(ISS + 1 + MSS as u32), &[], now, &mut out, &mut events);

        // cwnd is 2 now: the rest of the backlog and the FIN go out.
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].payload.len(), MSS);
        assert!(out[1].tcp.fin());
        assert_eq!(out[1].tcp.seq_number(), ISS + 1 + 2 * MSS as u32);
    }

    #[test]
    fn fin_is_retransmitted() {
        let (mut conn, now) = established(&config());
        let mut out = VecDeque::new();
        let mut events = VecDeque::new();

        conn.close(now, &mut out);
        out.clear();

        conn.on_tick(now + FOREVER, &mut out, &mut events);

        assert!(out.pop_front().unwrap().tcp.fin());
    }

    #[test]
    fn rst_closes() {
        let (mut conn, now) = established(&config());
        let mut out = VecDeque::new();
        let mut events = VecDeque::new();

        let mut rst = peer_ack(ISS + 1);
        rst.set_rst();
        conn.on_segment(&rst, &[], now, &mut out, &mut events);

        assert_eq!(conn.state(), State::Closed);
        assert!(out.is_empty());
        assert_eq!(events.len(), 1);
    }
}
