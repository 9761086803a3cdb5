//! # Adaptive Scanner
//!
//! An adaptive execution layer in front of a host/port probe engine. It
//! changes *how* a scan runs (timeout aggressiveness, congestion window
//! sizing and target parallelism) without touching the probes themselves.
//!
//! ## Architecture
//!
//! - [`tuner`]: workload classification and parameter tuning
//! - [`partition`]: order-preserving target sharding
//! - [`driver`]: the per-shard scan loop
//! - [`dispatcher`]: bounded parallel workers and result merging
//! - [`telemetry`]: atomic session counters and the performance report
//! - [`orchestrator`]: the baseline/adaptive entry point
//!
//! The engine sits behind [`core::ProbeEngine`] and [`core::ScanState`];
//! [`scanner::ConnectEngine`] is a tokio TCP connect implementation.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod options;
pub mod reporting;

// Adaptive execution
pub mod dispatcher;
pub mod driver;
pub mod orchestrator;
pub mod partition;
pub mod strategy;
pub mod telemetry;
pub mod tuner;

// Engine side
pub mod scanner;
pub mod timing;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use crate::{
    config::{AdaptiveConfig, AppConfig},
    core::{ProbeEngine, ScanMode, ScanState},
    error::{Result, ScannerError},
    orchestrator::{AdaptiveScanner, ExecutionPath, ScanOutcome},
    scanner::{ConnectEngine, PortSpec, ScanTarget},
    timing::TimeoutProfile,
};
