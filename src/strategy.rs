//! Extension hooks around an adaptive session
//!
//! Port-state prediction, scan-order reordering, common-port presets, batch
//! preparation and retry shaping all hang off [`ScanStrategy`]. The stock
//! [`NoopStrategy`] leaves every input as it found it.

use crate::{
    scanner::{PortSpec, ScanTarget},
    telemetry::ProbeStats,
    timing::CongestionParams,
};

pub trait ScanStrategy: Send + Sync {
    /// Called once per session when batch processing is enabled
    fn prepare_batch(&self, _targets: &[ScanTarget]) {}

    /// Called once per session when smart retry is enabled
    fn configure_retry(&self, congestion: CongestionParams) -> CongestionParams {
        congestion
    }

    /// Reorder the port list before any shard starts
    fn optimize_scan_order(&self, ports: PortSpec) -> PortSpec {
        ports
    }

    /// Called for every target of a shard before its scan loop starts
    fn predict_port_states(&self, _target: &ScanTarget, _ports: &PortSpec) {}

    /// Called for every target of a shard before its scan loop starts
    fn preset_common_ports(&self, _target: &ScanTarget) {}

    /// Called for every target of a shard after its scan loop finished
    fn validate_results(&self, _target: &ScanTarget, _shard_stats: &ProbeStats) {}
}

/// Strategy that changes nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStrategy;

impl ScanStrategy for NoopStrategy {}
