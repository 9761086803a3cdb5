//! Scan loop driver
//!
//! Runs one shard's scan state to completion. Every iteration walks the
//! same phases in the same order:
//!
//! `Ping → Retransmit → ProbeDispatch → AwaitResponses → ProcessResponses`
//!
//! and the loop ends once the engine reports no incomplete hosts. A progress
//! request is checked once per iteration; it only produces a snapshot and
//! never stops the loop.

use std::{
    io::BufRead,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Instant,
};
use tracing::{debug, info, trace};

use crate::{
    core::{ProbeEngine, ScanMode, ScanState},
    error::Result,
    partition::TargetShard,
    scanner::{PortSpec, ScanTarget},
    telemetry::ProbeStats,
    timing::{CongestionParams, TimeoutProfile},
};

/// Cooperative "print progress" request shared with every running shard.
///
/// Setting it never cancels anything; the next shard to poll consumes it.
#[derive(Debug, Clone, Default)]
pub struct ProgressSignal {
    requested: Arc<AtomicBool>,
}

impl ProgressSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Relaxed);
    }

    /// Consume a pending request, if any.
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::Relaxed)
    }

    /// Request a snapshot for every line read from `reader`.
    ///
    /// Reads on a plain OS thread outside the async runtime, so a reader
    /// blocked on an idle terminal never holds up runtime shutdown. The
    /// handle can be dropped to detach the thread.
    pub fn watch_lines<R>(&self, reader: R) -> std::io::Result<JoinHandle<()>>
    where
        R: BufRead + Send + 'static,
    {
        let signal = self.clone();
        thread::Builder::new()
            .name("progress-input".to_string())
            .spawn(move || {
                for _ in reader.lines().map_while(|line| line.ok()) {
                    debug!("Progress snapshot requested");
                    signal.request();
                }
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Ping,
    Retransmit,
    ProbeDispatch,
    AwaitResponses,
    ProcessResponses,
    Complete,
}

impl ScanPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Retransmit => "retransmit",
            Self::ProbeDispatch => "probe_dispatch",
            Self::AwaitResponses => "await_responses",
            Self::ProcessResponses => "process_responses",
            Self::Complete => "complete",
        }
    }
}

/// Progress snapshot emitted on request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub shard: usize,
    pub completion: f64,
    /// Only filled in when debug logging is on
    pub rate: Option<f64>,
}

/// What a finished scan loop hands back to the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct DriveSummary {
    pub shard: usize,
    pub iterations: u64,
    pub snapshots: Vec<ProgressSnapshot>,
    pub stats: ProbeStats,
    /// The shard's final, engine-refined timeout profile
    pub timeouts: TimeoutProfile,
}

/// Loop `state` until the engine has no incomplete hosts left.
pub async fn drive_to_completion<S>(
    state: &mut S,
    shard: usize,
    progress: &ProgressSignal,
) -> Result<DriveSummary>
where
    S: ScanState + ?Sized,
{
    let mut iterations = 0u64;
    let mut snapshots = Vec::new();

    while state.incomplete_hosts_remain() {
        iterations += 1;

        enter(shard, iterations, ScanPhase::Ping);
        state.do_pings().await?;

        enter(shard, iterations, ScanPhase::Retransmit);
        state.do_outstanding_retransmits().await?;
        state.do_retry_stack_retransmits().await?;

        enter(shard, iterations, ScanPhase::ProbeDispatch);
        state.do_new_probes().await?;

        enter(shard, iterations, ScanPhase::AwaitResponses);
        state.wait_for_responses().await?;

        enter(shard, iterations, ScanPhase::ProcessResponses);
        state.process_data().await?;

        if progress.take() {
            snapshots.push(emit_snapshot(state, shard));
        }
    }

    enter(shard, iterations, ScanPhase::Complete);

    Ok(DriveSummary {
        shard,
        iterations,
        snapshots,
        stats: state.probe_stats(),
        timeouts: state.timeouts(),
    })
}

/// Build the engine state for `shard` and drive it to completion.
pub async fn run_shard<E: ProbeEngine>(
    engine: &E,
    shard: &TargetShard<ScanTarget>,
    ports: &PortSpec,
    mode: ScanMode,
    timeouts: TimeoutProfile,
    congestion: CongestionParams,
    progress: &ProgressSignal,
) -> Result<DriveSummary> {
    let started = Instant::now();
    crate::log_shard_start!(shard.index, shard.len(), mode.as_str());

    let mut state = engine.create_state(&shard.targets, ports, mode, timeouts, congestion)?;
    if state.is_raw_scan() {
        state.begin_sniffer().await?;
    }

    let summary = drive_to_completion(&mut state, shard.index, progress).await?;

    crate::log_shard_complete!(
        shard.index,
        started.elapsed(),
        summary.iterations,
        summary.stats.probes_sent
    );
    Ok(summary)
}

fn enter(shard: usize, iteration: u64, phase: ScanPhase) {
    trace!(shard, iteration, phase = phase.as_str(), "Scan loop phase");
}

fn emit_snapshot<S: ScanState + ?Sized>(state: &S, shard: usize) -> ProgressSnapshot {
    let completion = state.completion_fraction();
    let rate = tracing::enabled!(tracing::Level::DEBUG).then(|| state.current_rate());

    match rate {
        Some(rate) => info!(
            shard,
            completion = format!("{:.2}%", completion * 100.0),
            rate = format!("{:.1} probes/sec", rate),
            "Scan progress"
        ),
        None => info!(
            shard,
            completion = format!("{:.2}%", completion * 100.0),
            "Scan progress"
        ),
    }

    ProgressSnapshot {
        shard,
        completion,
        rate,
    }
}
