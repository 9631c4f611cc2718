//! Tunables shared by the network and transport layers.

use std::time::Duration;

/// Default Time-to-Live for locally originated datagrams.
pub const DEFAULT_TTL: u8 = 64;

/// Largest payload carried by one segment: an Ethernet-sized MTU (1500)
/// minus the IPv4 and TCP headers.
pub const DEFAULT_MSS: usize = 1460;

/// Retransmission timeout used until the first round-trip sample arrives.
pub const DEFAULT_RTO: Duration = Duration::from_secs(1);

/// Shortest timeout the retransmission timer is armed with. Covers peers
/// that delay their ACKs on links whose measured round-trip is far shorter.
pub const DEFAULT_MIN_RTO: Duration = Duration::from_millis(200);

/// Stack configuration.
///
/// One `Config` is handed to a [crate::Node] at construction and copied into
/// each layer that needs it, so two nodes in one process never share state.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// TTL written into locally originated IPv4 headers.
    pub ttl: u8,
    /// Maximum segment size (MSS), in bytes.
    pub mss: usize,
    /// Congestion window of a new connection, in segments.
    pub initial_window: u32,
    /// Retransmission timeout before any round-trip has been measured.
    pub initial_rto: Duration,
    /// Lower bound on the timeout the retransmission timer is armed with.
    pub min_rto: Duration,
    /// Receive window advertised in every outgoing segment.
    pub receive_window: u16,
    /// Consecutive retransmission timeouts tolerated before the connection is
    /// reset.
    pub max_retransmits: usize,
    /// Skips IPv4 header and TCP checksum validation on receipt.
    pub ignore_checksum: bool,
    /// Fixed initial sequence number. A random one is chosen per connection
    /// when unset.
    pub isn: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            mss: DEFAULT_MSS,
            initial_window: 1,
            initial_rto: DEFAULT_RTO,
            min_rto: DEFAULT_MIN_RTO,
            receive_window: u16::MAX,
            max_retransmits: 8,
            ignore_checksum: false,
            isn: None,
        }
    }
}
