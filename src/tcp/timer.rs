//! Single retransmission timer of a connection.

use std::time::{Duration, Instant};

/// A cancellable one-shot deadline.
///
/// Arming replaces any previous deadline, so at most one expiry is ever
/// outstanding. The timer does not fire by itself: the owner polls
/// [RetransmitTimer::expired] whenever the event loop wakes up, and reports
/// [RetransmitTimer::deadline] so the loop knows when to wake.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetransmitTimer {
    deadline: Option<Instant>,
}

impl RetransmitTimer {
    /// Creates a disarmed timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)starts the timer to expire `timeout` after `now`.
    pub fn arm(&mut self, now: Instant, timeout: Duration) {
        self.deadline = Some(now + timeout);
    }

    /// Disarms the timer.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Returns `true` if the timer is running.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Returns the instant the timer expires at, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `true` if the timer is armed and its deadline has passed.
    pub fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }
}
