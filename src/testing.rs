//! Scripted probe engine for unit tests
//!
//! Every scan state finishes after a fixed number of loop iterations, sends
//! one probe per target per iteration and answers all of them. Calls are
//! recorded in order so tests can assert on what the layer asked for.

use async_trait::async_trait;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use crate::{
    config::TimingConfig,
    core::{ProbeEngine, ScanMode, ScanState},
    driver::ProgressSignal,
    error::{Result, ScannerError},
    scanner::{PortSpec, ScanTarget},
    telemetry::ProbeStats,
    timing::{CongestionParams, TimeoutProfile},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Baseline {
        targets: usize,
        timeouts: Option<TimeoutProfile>,
        /// A progress snapshot was pending when the scan ran
        progress_requested: bool,
    },
    CreateState {
        targets: Vec<ScanTarget>,
        timeouts: TimeoutProfile,
        congestion: CongestionParams,
    },
    BeginSniffer,
    Pings,
    OutstandingRetransmits,
    RetryStackRetransmits,
    NewProbes,
    WaitForResponses,
    ProcessData,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    iterations: u64,
    step_delay: Duration,
    fail_wait_at: Option<u64>,
    fail_for: Option<ScanTarget>,
    calls: Arc<Mutex<Vec<Call>>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    pub fn new(iterations: u64) -> Self {
        Self {
            iterations,
            ..Self::default()
        }
    }

    /// Sleep this long inside every `wait_for_responses`
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Fail `wait_for_responses` on the given (1-based) iteration
    pub fn failing_wait_at(mut self, iteration: u64) -> Self {
        self.fail_wait_at = Some(iteration);
        self
    }

    /// Only states that contain `target` fail
    pub fn failing_for(mut self, target: ScanTarget) -> Self {
        self.fail_for = Some(target);
        self
    }

    pub fn wait_error() -> ScannerError {
        ScannerError::engine("wait_for_responses", "scripted failure")
    }

    /// Profile a state seeded with `seed` reports after `iterations` loops
    pub fn refined(seed: TimeoutProfile, iterations: u64) -> TimeoutProfile {
        TimeoutProfile::new(
            seed.srtt + Duration::from_micros(iterations),
            seed.rttvar,
            seed.timeout + Duration::from_micros(10 * iterations),
        )
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created_states(&self) -> Vec<(Vec<ScanTarget>, TimeoutProfile, CongestionParams)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::CreateState {
                    targets,
                    timeouts,
                    congestion,
                } => Some((targets, timeouts, congestion)),
                _ => None,
            })
            .collect()
    }

    /// Most states that were alive at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ProbeEngine for ScriptedEngine {
    type State = ScriptedState;

    fn create_state(
        &self,
        targets: &[ScanTarget],
        _ports: &PortSpec,
        mode: ScanMode,
        timeouts: TimeoutProfile,
        congestion: CongestionParams,
    ) -> Result<Self::State> {
        self.record(Call::CreateState {
            targets: targets.to_vec(),
            timeouts,
            congestion,
        });

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let fails = match &self.fail_for {
            Some(target) => targets.contains(target),
            None => true,
        };

        Ok(ScriptedState {
            engine: self.clone(),
            mode,
            targets: targets.len() as u64,
            done: 0,
            fail_wait_at: self.fail_wait_at.filter(|_| fails),
            stats: ProbeStats::default(),
            timeouts,
        })
    }

    async fn baseline_scan(
        &self,
        targets: &[ScanTarget],
        _ports: &PortSpec,
        _mode: ScanMode,
        timeouts: Option<TimeoutProfile>,
        progress: &ProgressSignal,
    ) -> Result<TimeoutProfile> {
        self.record(Call::Baseline {
            targets: targets.len(),
            timeouts,
            progress_requested: progress.take(),
        });
        Ok(timeouts.unwrap_or_else(|| TimingConfig::default().seed_profile()))
    }
}

pub struct ScriptedState {
    engine: ScriptedEngine,
    mode: ScanMode,
    targets: u64,
    done: u64,
    fail_wait_at: Option<u64>,
    stats: ProbeStats,
    timeouts: TimeoutProfile,
}

impl Drop for ScriptedState {
    fn drop(&mut self) {
        self.engine.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ScanState for ScriptedState {
    fn incomplete_hosts_remain(&self) -> bool {
        self.done < self.engine.iterations
    }

    fn is_raw_scan(&self) -> bool {
        self.mode.is_raw()
    }

    async fn begin_sniffer(&mut self) -> Result<()> {
        self.engine.record(Call::BeginSniffer);
        Ok(())
    }

    async fn do_pings(&mut self) -> Result<()> {
        self.engine.record(Call::Pings);
        Ok(())
    }

    async fn do_outstanding_retransmits(&mut self) -> Result<()> {
        self.engine.record(Call::OutstandingRetransmits);
        Ok(())
    }

    async fn do_retry_stack_retransmits(&mut self) -> Result<()> {
        self.engine.record(Call::RetryStackRetransmits);
        Ok(())
    }

    async fn do_new_probes(&mut self) -> Result<()> {
        self.engine.record(Call::NewProbes);
        self.stats.probes_sent += self.targets;
        Ok(())
    }

    async fn wait_for_responses(&mut self) -> Result<()> {
        self.engine.record(Call::WaitForResponses);
        if !self.engine.step_delay.is_zero() {
            tokio::time::sleep(self.engine.step_delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        if self.fail_wait_at == Some(self.done + 1) {
            return Err(ScriptedEngine::wait_error());
        }
        Ok(())
    }

    async fn process_data(&mut self) -> Result<()> {
        self.engine.record(Call::ProcessData);
        self.stats.responses_received += self.targets;
        self.timeouts = ScriptedEngine::refined(self.timeouts, 1);
        self.done += 1;
        Ok(())
    }

    fn completion_fraction(&self) -> f64 {
        if self.engine.iterations == 0 {
            1.0
        } else {
            self.done as f64 / self.engine.iterations as f64
        }
    }

    fn current_rate(&self) -> f64 {
        self.stats.probes_sent as f64
    }

    fn probe_stats(&self) -> ProbeStats {
        self.stats
    }

    fn timeouts(&self) -> TimeoutProfile {
        self.timeouts
    }
}
