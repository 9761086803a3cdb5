//! Adaptive parameter tuning
//!
//! Two pure steps shape the parameters a session runs with:
//! 1. [`aggressive_prepass`] scales the seed profile by a fixed factor.
//! 2. [`tune`] classifies the workload by its probe estimate and scales the
//!    congestion window and timeouts accordingly.
//!
//! Both return fresh values and never touch their inputs, so calling them
//! twice with the same arguments cannot compound the scaling.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::timing::{scale_duration, CongestionParams, TimeoutProfile};

/// Probe estimates above this count are treated as large workloads
pub const LARGE_WORKLOAD_THRESHOLD: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadClass {
    Small,
    Large,
}

impl WorkloadClass {
    pub fn classify(estimated_probe_count: u64) -> Self {
        if estimated_probe_count > LARGE_WORKLOAD_THRESHOLD {
            Self::Large
        } else {
            Self::Small
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Large => "large",
        }
    }

    fn rule(&self) -> &'static TuningRule {
        match self {
            Self::Large => &LARGE_RULE,
            Self::Small => &SMALL_RULE,
        }
    }
}

struct TuningRule {
    cwnd_factor: f64,
    max_cwnd_cap: u32,
    host_cwnd_cap: u32,
    incr_factor: f64,
    timeout_factor: f64,
    timeout_floor: Duration,
    srtt_factor: f64,
    srtt_floor: Duration,
}

const LARGE_RULE: TuningRule = TuningRule {
    cwnd_factor: 2.0,
    max_cwnd_cap: 1000,
    host_cwnd_cap: 100,
    incr_factor: 2.0,
    timeout_factor: 0.6,
    timeout_floor: Duration::from_micros(15_000),
    srtt_factor: 0.6,
    srtt_floor: Duration::from_micros(8_000),
};

const SMALL_RULE: TuningRule = TuningRule {
    cwnd_factor: 1.3,
    max_cwnd_cap: 500,
    host_cwnd_cap: 25,
    incr_factor: 1.2,
    timeout_factor: 0.85,
    timeout_floor: Duration::from_micros(22_000),
    srtt_factor: 0.85,
    srtt_floor: Duration::from_micros(12_000),
};

/// Output of one tuning pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunedParameters {
    pub class: WorkloadClass,
    pub timeouts: TimeoutProfile,
    pub congestion: CongestionParams,
}

/// Scale a seed profile by the fixed aggressive factor.
pub fn aggressive_prepass(profile: &TimeoutProfile, factor: f64) -> TimeoutProfile {
    let scaled = profile.scaled(factor);
    debug!(
        factor,
        srtt_us = scaled.srtt.as_micros() as u64,
        timeout_us = scaled.timeout.as_micros() as u64,
        "Applied aggressive timeout pre-pass"
    );
    scaled
}

/// Tune timeouts and congestion parameters for a workload of
/// `estimated_probe_count` probes.
pub fn tune(
    estimated_probe_count: u64,
    timeouts: &TimeoutProfile,
    congestion: &CongestionParams,
) -> TunedParameters {
    let class = WorkloadClass::classify(estimated_probe_count);
    let rule = class.rule();

    let congestion = CongestionParams {
        max_cwnd: scale_count(congestion.max_cwnd, rule.cwnd_factor).min(rule.max_cwnd_cap),
        host_initial_cwnd: scale_count(congestion.host_initial_cwnd, rule.cwnd_factor)
            .min(rule.host_cwnd_cap),
        low_cwnd: congestion.low_cwnd,
        slow_incr: scale_count(congestion.slow_incr, rule.incr_factor).max(1),
        ca_incr: scale_count(congestion.ca_incr, rule.incr_factor).max(1),
    };

    let timeouts = TimeoutProfile {
        srtt: scale_duration(timeouts.srtt, rule.srtt_factor).max(rule.srtt_floor),
        rttvar: timeouts.rttvar,
        timeout: scale_duration(timeouts.timeout, rule.timeout_factor).max(rule.timeout_floor),
    };

    debug!(
        workload = class.as_str(),
        estimated_probe_count,
        max_cwnd = congestion.max_cwnd,
        host_cwnd = congestion.host_initial_cwnd,
        timeout_us = timeouts.timeout.as_micros() as u64,
        "Tuned scan parameters"
    );

    TunedParameters {
        class,
        timeouts,
        congestion,
    }
}

fn scale_count(value: u32, factor: f64) -> u32 {
    (value as f64 * factor) as u32
}
