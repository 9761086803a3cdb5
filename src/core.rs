//! Collaborator contracts
//!
//! The adaptive layer never builds packets or reads sockets. It drives an
//! engine through two traits:
//! - [`ProbeEngine`] builds per-shard scan state and owns the baseline path
//! - [`ScanState`] exposes the engine's scan-loop primitives for one shard
//!
//! Errors raised behind these traits travel through the layer untouched.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    driver::ProgressSignal,
    error::Result,
    scanner::{PortSpec, ScanTarget},
    telemetry::ProbeStats,
    timing::{CongestionParams, TimeoutProfile},
};

/// Builds scan state for a set of targets and runs unadapted scans.
#[async_trait]
pub trait ProbeEngine: Send + Sync + 'static {
    type State: ScanState + 'static;

    /// Create the scan-state handle for one shard, seeded with the given
    /// timeout profile and congestion parameters.
    fn create_state(
        &self,
        targets: &[ScanTarget],
        ports: &PortSpec,
        mode: ScanMode,
        timeouts: TimeoutProfile,
        congestion: CongestionParams,
    ) -> Result<Self::State>;

    /// Run the engine's own scan with no adaptation applied. Returns the
    /// engine's final timeout profile. `progress` is polled the same way the
    /// adaptive scan loop polls it.
    async fn baseline_scan(
        &self,
        targets: &[ScanTarget],
        ports: &PortSpec,
        mode: ScanMode,
        timeouts: Option<TimeoutProfile>,
        progress: &ProgressSignal,
    ) -> Result<TimeoutProfile>;

    /// Probes each host is expected to need. Drives workload classification.
    fn estimate_probe_count(&self, ports: &PortSpec, mode: ScanMode) -> u64 {
        match mode {
            ScanMode::PingSweep => 1,
            _ => ports.len() as u64,
        }
    }

    /// Congestion parameters the engine would use on its own
    fn default_congestion(&self) -> CongestionParams {
        CongestionParams::default()
    }
}

/// The engine's per-shard scan loop primitives.
#[async_trait]
pub trait ScanState: Send {
    /// True while any host in this state still has work outstanding
    fn incomplete_hosts_remain(&self) -> bool;

    /// Raw-socket class scans need a sniffer before the loop starts
    fn is_raw_scan(&self) -> bool;

    async fn begin_sniffer(&mut self) -> Result<()>;

    /// Send any host-discovery pings that are due
    async fn do_pings(&mut self) -> Result<()>;

    async fn do_outstanding_retransmits(&mut self) -> Result<()>;

    async fn do_retry_stack_retransmits(&mut self) -> Result<()>;

    /// Send probes the congestion window now allows
    async fn do_new_probes(&mut self) -> Result<()>;

    /// Block until a response arrives or the current timeout elapses
    async fn wait_for_responses(&mut self) -> Result<()>;

    /// Feed received responses back into per-host state
    async fn process_data(&mut self) -> Result<()>;

    /// Fraction of probes (0.0..=1.0) that have reached a final state
    fn completion_fraction(&self) -> f64;

    /// Current probe rate in probes per second
    fn current_rate(&self) -> f64;

    fn probe_stats(&self) -> ProbeStats;

    /// The timeout profile as refined by the engine's RTT estimation
    fn timeouts(&self) -> TimeoutProfile;
}

/// Scan technique requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    TcpConnect,
    SynScan,
    UdpScan,
    PingSweep,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TcpConnect => "tcp_connect",
            Self::SynScan => "syn_scan",
            Self::UdpScan => "udp_scan",
            Self::PingSweep => "ping_sweep",
        }
    }

    /// Modes that need raw packet capture
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::SynScan | Self::UdpScan)
    }
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
