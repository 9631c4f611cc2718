//! Round-trip time estimation (RFC 6298, Jacobson/Karels).

use std::time::Duration;

/// Smoothed round-trip time and its variation, and the retransmission timeout
/// derived from them.
///
/// ```text
///   first sample:  SRTT   <- R
///                  RTTVAR <- R/2
///   later samples: SRTT   <- (1 - 1/8) * SRTT + 1/8 * R
///                  RTTVAR <- (1 - 1/4) * RTTVAR + 1/4 * |R - SRTT|
///   always:        RTO    <- SRTT + 4 * RTTVAR
/// ```
///
/// RTTVAR is updated with the freshly updated SRTT.
#[derive(Debug, Clone, Copy)]
pub struct RttEstimator {
    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,
}

impl RttEstimator {
    /// Creates an estimator with no samples, using `initial_rto` until the
    /// first sample arrives.
    pub fn new(initial_rto: Duration) -> Self {
        Self {
            srtt: None,
            rttvar: Duration::ZERO,
            rto: initial_rto,
        }
    }

    /// Feeds one round-trip measurement.
    ///
    /// Measurements of retransmitted segments must not be fed (Karn's
    /// algorithm); the caller filters them.
    pub fn sample(&mut self, rtt: Duration) {
        let (srtt, rttvar) = match self.srtt {
            None => (rtt, rtt / 2),
            Some(srtt) => {
                let srtt = srtt * 7 / 8 + rtt / 8;
                let rttvar = self.rttvar * 3 / 4 + rtt.abs_diff(srtt) / 4;
                (srtt, rttvar)
            }
        };

        self.srtt = Some(srtt);
        self.rttvar = rttvar;
        self.rto = srtt + rttvar * 4;
    }

    /// Returns the smoothed round-trip time, if any sample was taken.
    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    /// Returns the round-trip time variation.
    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }

    /// Returns the current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rto
    }
}
