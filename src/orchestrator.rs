//! Orchestration entry point
//!
//! [`AdaptiveScanner`] decides between two independent paths:
//! - [`ExecutionPath::Baseline`] hands the scan to the engine untouched
//! - [`ExecutionPath::Adaptive`] tunes, partitions, dispatches and reports
//!
//! Either way the caller gets the final timeout profile back.

use metrics::gauge;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::{
    config::{AdaptiveConfig, AppConfig},
    core::{ProbeEngine, ScanMode},
    dispatcher::{Dispatcher, ShardOutcome},
    driver::ProgressSignal,
    error::Result,
    logging::TimingLogger,
    partition::partition,
    scanner::{PortSpec, ScanTarget},
    strategy::{NoopStrategy, ScanStrategy},
    telemetry::{PerformanceReport, TelemetryCollector},
    timing::TimeoutProfile,
    tuner::{aggressive_prepass, tune, WorkloadClass},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPath {
    Baseline,
    Adaptive,
}

/// What one call to [`AdaptiveScanner::run_adaptive_scan`] produced
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    pub path: ExecutionPath,
    /// Final timeout profile, to be written back to the caller's state
    pub timeouts: TimeoutProfile,
    /// `None` on the baseline path and for empty target lists
    pub workload: Option<WorkloadClass>,
    pub shards: Vec<ShardOutcome>,
    /// Present only when performance monitoring is on
    pub report: Option<PerformanceReport>,
}

impl ScanOutcome {
    fn passthrough(path: ExecutionPath, timeouts: TimeoutProfile) -> Self {
        Self {
            path,
            timeouts,
            workload: None,
            shards: Vec::new(),
            report: None,
        }
    }
}

pub struct AdaptiveScanner<E: ProbeEngine> {
    config: AdaptiveConfig,
    seed: TimeoutProfile,
    engine: Arc<E>,
    strategy: Arc<dyn ScanStrategy>,
    progress: ProgressSignal,
    last_session: Option<TelemetryCollector>,
    last_report: Option<PerformanceReport>,
}

impl<E: ProbeEngine> AdaptiveScanner<E> {
    pub fn new(engine: E, config: &AppConfig) -> Self {
        Self {
            config: config.adaptive.clone(),
            seed: config.timing.seed_profile(),
            engine: Arc::new(engine),
            strategy: Arc::new(NoopStrategy),
            progress: ProgressSignal::new(),
            last_session: None,
            last_report: None,
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn ScanStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Handle for requesting progress snapshots from running shards
    pub fn progress_signal(&self) -> ProgressSignal {
        self.progress.clone()
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.set_enabled(enabled);
    }

    pub fn set_worker_count(&mut self, workers: usize) -> Result<()> {
        self.config.set_worker_count(workers)
    }

    pub fn set_adaptive_timeout_factor(&mut self, factor: f64) -> Result<()> {
        self.config.set_adaptive_timeout_factor(factor)
    }

    pub fn execution_path(&self) -> ExecutionPath {
        if self.config.enabled {
            ExecutionPath::Adaptive
        } else {
            ExecutionPath::Baseline
        }
    }

    /// Plain-text report of the last monitored adaptive session
    pub fn performance_report(&self) -> Option<String> {
        self.last_report.as_ref().map(|r| r.to_string())
    }

    pub fn last_report(&self) -> Option<&PerformanceReport> {
        self.last_report.as_ref()
    }

    /// Telemetry of the last adaptive session, monitored or not
    pub fn last_session(&self) -> Option<&TelemetryCollector> {
        self.last_session.as_ref()
    }

    /// Scan `targets` on the path the current configuration selects.
    pub async fn run_adaptive_scan(
        &mut self,
        targets: &[ScanTarget],
        ports: &PortSpec,
        mode: ScanMode,
        timeouts: Option<TimeoutProfile>,
    ) -> Result<ScanOutcome> {
        match self.execution_path() {
            ExecutionPath::Baseline => self.run_baseline(targets, ports, mode, timeouts).await,
            ExecutionPath::Adaptive => self.run_adaptive(targets, ports, mode, timeouts).await,
        }
    }

    /// Delegate to the engine with the caller's profile as given.
    pub async fn run_baseline(
        &self,
        targets: &[ScanTarget],
        ports: &PortSpec,
        mode: ScanMode,
        timeouts: Option<TimeoutProfile>,
    ) -> Result<ScanOutcome> {
        info!(targets = targets.len(), mode = mode.as_str(), "Running baseline scan");
        let timeouts = self
            .engine
            .baseline_scan(targets, ports, mode, timeouts, &self.progress)
            .await?;
        Ok(ScanOutcome::passthrough(ExecutionPath::Baseline, timeouts))
    }

    /// Tune, partition and dispatch one adaptive session.
    pub async fn run_adaptive(
        &mut self,
        targets: &[ScanTarget],
        ports: &PortSpec,
        mode: ScanMode,
        timeouts: Option<TimeoutProfile>,
    ) -> Result<ScanOutcome> {
        let seed = timeouts.unwrap_or(self.seed);
        if targets.is_empty() {
            info!("No targets given, nothing to scan");
            return Ok(ScanOutcome::passthrough(ExecutionPath::Adaptive, seed));
        }

        let monitoring = self.config.performance_monitoring;
        let mut telemetry = TelemetryCollector::new();
        if monitoring {
            telemetry.start();
        }
        let timer = TimingLogger::start("adaptive_scan");

        info!(
            session_id = %telemetry.session_id(),
            targets = targets.len(),
            workers = self.config.worker_count,
            mode = mode.as_str(),
            adaptive_timeout_factor = self.config.adaptive_timeout_factor,
            "Starting adaptive scan"
        );

        let seeded = aggressive_prepass(&seed, self.config.aggressive_factor);

        if self.config.batch_processing {
            self.strategy.prepare_batch(targets);
        }
        let mut congestion = self.engine.default_congestion();
        if self.config.smart_retry {
            congestion = self.strategy.configure_retry(congestion);
        }
        let ports = self.strategy.optimize_scan_order(ports.clone());

        let estimate = self.engine.estimate_probe_count(&ports, mode);
        let tuned = tune(estimate, &seeded, &congestion);
        let shards = partition(targets, self.config.worker_count);
        timer.checkpoint("partitioned");

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.strategy),
            self.progress.clone(),
            self.config.worker_count,
            self.config.merge_policy,
        );
        let dispatched = dispatcher
            .dispatch(
                shards,
                &ports,
                mode,
                tuned.timeouts,
                tuned.congestion,
                telemetry.counters(),
            )
            .await;
        timer.checkpoint("dispatched");

        if monitoring {
            telemetry.stop();
        }
        let report = match &dispatched {
            Ok(_) if monitoring => Some(telemetry.report()),
            _ => None,
        };
        self.last_session = Some(telemetry);
        let dispatched = dispatched?;

        if let Some(report) = &report {
            gauge!("adaptive_success_rate_percent", report.success_rate);
            gauge!("adaptive_throughput_probes_per_second", report.throughput);
            crate::log_performance_metric!("throughput", report.throughput, "probes/sec");
            info!("\n{}", report);
            self.last_report = Some(report.clone());
        }

        Ok(ScanOutcome {
            path: ExecutionPath::Adaptive,
            timeouts: dispatched.timeouts,
            workload: Some(tuned.class),
            shards: dispatched.shards,
            report,
        })
    }
}
