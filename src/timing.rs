//! Timeout profiles and congestion parameters
//!
//! A [`TimeoutProfile`] is the RTT state a scan carries around: smoothed RTT,
//! RTT variance and the timeout ceiling derived from them. Scaling goes
//! through whole microseconds and truncates, so the same input always gives
//! the same output.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutProfile {
    /// Smoothed round-trip estimate
    pub srtt: Duration,
    /// Round-trip variance
    pub rttvar: Duration,
    /// How long to wait for a probe before giving up on it
    pub timeout: Duration,
}

impl TimeoutProfile {
    pub fn new(srtt: Duration, rttvar: Duration, timeout: Duration) -> Self {
        Self {
            srtt,
            rttvar,
            timeout,
        }
    }

    pub fn from_micros(srtt_us: u64, rttvar_us: u64, timeout_us: u64) -> Self {
        Self::new(
            Duration::from_micros(srtt_us),
            Duration::from_micros(rttvar_us),
            Duration::from_micros(timeout_us),
        )
    }

    /// Scale the timeout ceiling and smoothed RTT; variance is left alone.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            srtt: scale_duration(self.srtt, factor),
            rttvar: self.rttvar,
            timeout: scale_duration(self.timeout, factor),
        }
    }

    /// Fold one RTT sample in (RFC 6298 weights) and recompute the timeout,
    /// clamped to `[min_timeout, max_timeout]`.
    pub fn observe_rtt(&mut self, rtt: Duration, min_timeout: Duration, max_timeout: Duration) {
        let srtt = self.srtt.as_micros() as i128;
        let sample = rtt.as_micros() as i128;
        let delta = (srtt - sample).abs();

        let rttvar = (3 * self.rttvar.as_micros() as i128 + delta) / 4;
        let srtt = (7 * srtt + sample) / 8;

        self.srtt = Duration::from_micros(srtt as u64);
        self.rttvar = Duration::from_micros(rttvar as u64);
        self.timeout = (self.srtt + self.rttvar * 4).clamp(min_timeout, max_timeout);
    }

    /// Field-wise mean of several profiles; `None` when given none.
    pub fn average<'a, I>(profiles: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a TimeoutProfile>,
    {
        let mut count: u128 = 0;
        let (mut srtt, mut rttvar, mut timeout) = (0u128, 0u128, 0u128);
        for profile in profiles {
            srtt += profile.srtt.as_micros();
            rttvar += profile.rttvar.as_micros();
            timeout += profile.timeout.as_micros();
            count += 1;
        }
        if count == 0 {
            return None;
        }
        Some(Self::from_micros(
            (srtt / count) as u64,
            (rttvar / count) as u64,
            (timeout / count) as u64,
        ))
    }
}

/// Multiply by `factor` on whole microseconds, truncating the result.
pub fn scale_duration(duration: Duration, factor: f64) -> Duration {
    Duration::from_micros((duration.as_micros() as f64 * factor) as u64)
}

/// Congestion-control knobs an engine runs its probe windows with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CongestionParams {
    /// Ceiling for outstanding probes
    pub max_cwnd: u32,
    /// Window each host starts with
    pub host_initial_cwnd: u32,
    /// Floor a window shrinks to after drops
    pub low_cwnd: u32,
    /// Window growth per response during slow start
    pub slow_incr: u32,
    /// Window growth per response during congestion avoidance
    pub ca_incr: u32,
}

impl Default for CongestionParams {
    fn default() -> Self {
        Self {
            max_cwnd: 300,
            host_initial_cwnd: 10,
            low_cwnd: 1,
            slow_incr: 1,
            ca_incr: 1,
        }
    }
}
