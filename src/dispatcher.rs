//! Worker dispatch
//!
//! Runs one scan loop per shard. A single shard runs inline on the calling
//! task; anything more is spawned onto the runtime with at most
//! `worker_count` units holding a permit at once. Every unit is joined
//! before results are looked at, and each unit adds its probe totals to the
//! shared counters with atomic adds.

use clap::ValueEnum;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::{
    core::{ProbeEngine, ScanMode},
    driver::{run_shard, DriveSummary, ProgressSignal},
    error::{Result, ScannerError},
    partition::TargetShard,
    scanner::{PortSpec, ScanTarget},
    strategy::ScanStrategy,
    telemetry::{ProbeStats, TelemetryCounters},
    timing::{CongestionParams, TimeoutProfile},
};

/// How per-shard timeout profiles are folded into the session's result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Profile of the shard that finished last
    #[default]
    LastFinished,
    /// Discard shard-local refinement and keep the tuned profile
    Tuned,
    /// Field-wise mean over all shards
    Average,
}

impl MergePolicy {
    pub fn merge(&self, tuned: TimeoutProfile, outcomes: &[ShardOutcome]) -> TimeoutProfile {
        match self {
            Self::LastFinished => outcomes
                .iter()
                .max_by_key(|o| o.finish_order)
                .map(|o| o.timeouts)
                .unwrap_or(tuned),
            Self::Tuned => tuned,
            Self::Average => TimeoutProfile::average(outcomes.iter().map(|o| &o.timeouts)).unwrap_or(tuned),
        }
    }
}

/// Result of one shard's scan loop
#[derive(Debug, Clone, PartialEq)]
pub struct ShardOutcome {
    pub index: usize,
    pub target_count: usize,
    pub iterations: u64,
    pub stats: ProbeStats,
    pub timeouts: TimeoutProfile,
    /// 0 for the first unit to finish
    pub finish_order: usize,
}

impl ShardOutcome {
    fn from_summary(summary: DriveSummary, target_count: usize, finish_order: usize) -> Self {
        Self {
            index: summary.shard,
            target_count,
            iterations: summary.iterations,
            stats: summary.stats,
            timeouts: summary.timeouts,
            finish_order,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    pub timeouts: TimeoutProfile,
    /// Sorted by shard index
    pub shards: Vec<ShardOutcome>,
}

impl DispatchResult {
    /// Sum of every shard's probe statistics
    pub fn merged_stats(&self) -> ProbeStats {
        self.shards
            .iter()
            .fold(ProbeStats::default(), |acc, s| acc.combined(s.stats))
    }
}

pub struct Dispatcher<E: ProbeEngine> {
    engine: Arc<E>,
    strategy: Arc<dyn ScanStrategy>,
    progress: ProgressSignal,
    worker_count: usize,
    merge_policy: MergePolicy,
}

impl<E: ProbeEngine> Dispatcher<E> {
    pub fn new(
        engine: Arc<E>,
        strategy: Arc<dyn ScanStrategy>,
        progress: ProgressSignal,
        worker_count: usize,
        merge_policy: MergePolicy,
    ) -> Self {
        Self {
            engine,
            strategy,
            progress,
            worker_count: worker_count.max(1),
            merge_policy,
        }
    }

    /// Scan every shard and merge the results.
    ///
    /// Engine errors come back as raised. When several units fail, the
    /// error of the lowest shard index wins, after all units have finished.
    pub async fn dispatch(
        &self,
        shards: Vec<TargetShard<ScanTarget>>,
        ports: &PortSpec,
        mode: ScanMode,
        timeouts: TimeoutProfile,
        congestion: CongestionParams,
        counters: Arc<TelemetryCounters>,
    ) -> Result<DispatchResult> {
        let mut outcomes = match shards.len() {
            0 => {
                debug!("No shards to dispatch");
                Vec::new()
            }
            1 => {
                let shard = &shards[0];
                let summary = run_unit(
                    &*self.engine,
                    &*self.strategy,
                    shard,
                    ports,
                    mode,
                    timeouts,
                    congestion,
                    &self.progress,
                    &counters,
                )
                .await?;
                vec![ShardOutcome::from_summary(summary, shard.len(), 0)]
            }
            _ => {
                self.dispatch_parallel(shards, ports, mode, timeouts, congestion, counters)
                    .await?
            }
        };

        outcomes.sort_by_key(|o| o.index);
        let merged = self.merge_policy.merge(timeouts, &outcomes);

        Ok(DispatchResult {
            timeouts: merged,
            shards: outcomes,
        })
    }

    async fn dispatch_parallel(
        &self,
        shards: Vec<TargetShard<ScanTarget>>,
        ports: &PortSpec,
        mode: ScanMode,
        timeouts: TimeoutProfile,
        congestion: CongestionParams,
        counters: Arc<TelemetryCounters>,
    ) -> Result<Vec<ShardOutcome>> {
        info!(
            shards = shards.len(),
            workers = self.worker_count,
            "Dispatching shards to parallel workers"
        );

        let permits = Arc::new(Semaphore::new(self.worker_count));
        let finished = Arc::new(AtomicUsize::new(0));
        let ports = Arc::new(ports.clone());

        let handles: Vec<_> = shards
            .into_iter()
            .map(|shard| {
                let engine = Arc::clone(&self.engine);
                let strategy = Arc::clone(&self.strategy);
                let progress = self.progress.clone();
                let permits = Arc::clone(&permits);
                let finished = Arc::clone(&finished);
                let ports = Arc::clone(&ports);
                let counters = Arc::clone(&counters);

                tokio::spawn(async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|_| ScannerError::internal("dispatcher", "worker pool closed"))?;

                    let summary = run_unit(
                        &*engine,
                        &*strategy,
                        &shard,
                        &ports,
                        mode,
                        timeouts,
                        congestion,
                        &progress,
                        &counters,
                    )
                    .await?;

                    let order = finished.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ScannerError>(ShardOutcome::from_summary(summary, shard.len(), order))
                })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        let mut failures: Vec<(usize, ScannerError)> = Vec::new();

        for (index, joined) in join_all(handles).await.into_iter().enumerate() {
            match joined.map_err(ScannerError::from).and_then(|r| r) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => failures.push((index, e)),
            }
        }

        if let Some((index, error)) = failures.into_iter().min_by_key(|(i, _)| *i) {
            debug!(shard = index, "Shard failed");
            crate::log_error_with_context!(error, "shard_dispatch");
            return Err(error);
        }
        Ok(outcomes)
    }
}

/// One worker unit: strategy pre-hooks, the scan loop, post-hooks, counters.
#[allow(clippy::too_many_arguments)]
async fn run_unit<E: ProbeEngine>(
    engine: &E,
    strategy: &dyn ScanStrategy,
    shard: &TargetShard<ScanTarget>,
    ports: &PortSpec,
    mode: ScanMode,
    timeouts: TimeoutProfile,
    congestion: CongestionParams,
    progress: &ProgressSignal,
    counters: &TelemetryCounters,
) -> Result<DriveSummary> {
    for target in &shard.targets {
        strategy.predict_port_states(target, ports);
        strategy.preset_common_ports(target);
    }

    let summary = run_shard(engine, shard, ports, mode, timeouts, congestion, progress).await?;

    for target in &shard.targets {
        strategy.validate_results(target, &summary.stats);
    }
    counters.record(&summary.stats);

    Ok(summary)
}
