//! Transport layer: a passive TCP endpoint with reliable, window-limited
//! delivery of outbound data.

pub mod connection;
pub mod listener;
pub mod rtt;
pub mod timer;

pub use connection::{Connection, State};
pub use listener::Listener;

use crate::protocol::ConnectionId;

/// Notification for the application owning a [Listener].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A new connection was created in response to a SYN.
    Accepted(ConnectionId),
    /// In-order payload arrived on a connection. An empty payload signals end
    /// of stream: the peer sent FIN, or the connection was reset.
    Received(ConnectionId, Vec<u8>),
}

impl Event {
    /// Returns the connection the event is about.
    pub fn id(&self) -> ConnectionId {
        match *self {
            Event::Accepted(id) | Event::Received(id, _) => id,
        }
    }
}
