//! Session telemetry
//!
//! Counters are plain atomics so every worker can add its totals without a
//! lock. The collector owns the session's start/stop timestamps and turns
//! the counters into a [`PerformanceReport`]. Totals are mirrored to the
//! `metrics` facade; nothing is exported unless the host installs a recorder.

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use uuid::Uuid;

use crate::error::{Result, ScannerError};

/// Raw probe statistics, as reported by an engine for one scan state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeStats {
    pub probes_sent: u64,
    pub responses_received: u64,
    pub timeouts: u64,
    pub errors: u64,
}

impl ProbeStats {
    /// Element-wise sum
    pub fn combined(self, other: ProbeStats) -> ProbeStats {
        ProbeStats {
            probes_sent: self.probes_sent + other.probes_sent,
            responses_received: self.responses_received + other.responses_received,
            timeouts: self.timeouts + other.timeouts,
            errors: self.errors + other.errors,
        }
    }
}

/// Monotonic per-session counters
#[derive(Debug, Default)]
pub struct TelemetryCounters {
    probes_sent: AtomicU64,
    responses_received: AtomicU64,
    timeouts: AtomicU64,
    errors: AtomicU64,
}

impl TelemetryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one unit's totals to the session counters.
    pub fn record(&self, delta: &ProbeStats) {
        self.probes_sent.fetch_add(delta.probes_sent, Ordering::Relaxed);
        self.responses_received
            .fetch_add(delta.responses_received, Ordering::Relaxed);
        self.timeouts.fetch_add(delta.timeouts, Ordering::Relaxed);
        self.errors.fetch_add(delta.errors, Ordering::Relaxed);

        counter!("adaptive_probes_sent_total", delta.probes_sent);
        counter!("adaptive_responses_received_total", delta.responses_received);
        counter!("adaptive_probe_timeouts_total", delta.timeouts);
        counter!("adaptive_probe_errors_total", delta.errors);
    }

    pub fn snapshot(&self) -> ProbeStats {
        ProbeStats {
            probes_sent: self.probes_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// `responses / probes * 100`, or 0 when nothing was sent
pub fn success_rate(responses: u64, probes: u64) -> f64 {
    if probes == 0 {
        0.0
    } else {
        responses as f64 / probes as f64 * 100.0
    }
}

/// Probes per second, or 0 when no time has elapsed
pub fn throughput(probes: u64, duration: Duration) -> f64 {
    let secs = duration.as_secs_f64();
    if secs > 0.0 {
        probes as f64 / secs
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy)]
struct Mark {
    instant: Instant,
    wall: DateTime<Utc>,
}

impl Mark {
    fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall: Utc::now(),
        }
    }
}

/// Timestamps and counters for one adaptive session
#[derive(Debug)]
pub struct TelemetryCollector {
    session_id: Uuid,
    counters: Arc<TelemetryCounters>,
    started: Option<Mark>,
    stopped: Option<Mark>,
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryCollector {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            counters: Arc::new(TelemetryCounters::new()),
            started: None,
            stopped: None,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Shared handle for workers to record into
    pub fn counters(&self) -> Arc<TelemetryCounters> {
        Arc::clone(&self.counters)
    }

    pub fn start(&mut self) {
        self.started = Some(Mark::now());
        self.stopped = None;
        tracing::debug!(session_id = %self.session_id, "Performance monitoring started");
    }

    pub fn stop(&mut self) {
        self.stopped = Some(Mark::now());
        let duration = self.duration();
        histogram!("adaptive_session_duration_seconds", duration.as_secs_f64());
        tracing::debug!(
            session_id = %self.session_id,
            duration_ms = duration.as_millis() as u64,
            "Performance monitoring stopped"
        );
    }

    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    /// Time between `start` and `stop`; zero unless both happened in order.
    pub fn duration(&self) -> Duration {
        match (self.started, self.stopped) {
            (Some(start), Some(stop)) => stop.instant.saturating_duration_since(start.instant),
            _ => Duration::ZERO,
        }
    }

    pub fn report(&self) -> PerformanceReport {
        let stats = self.counters.snapshot();
        let duration = self.duration();

        PerformanceReport {
            session_id: self.session_id,
            started_at: self.started.map(|m| m.wall),
            finished_at: self.stopped.map(|m| m.wall),
            duration,
            probes_sent: stats.probes_sent,
            responses_received: stats.responses_received,
            timeouts: stats.timeouts,
            errors: stats.errors,
            success_rate: success_rate(stats.responses_received, stats.probes_sent),
            throughput: throughput(stats.probes_sent, duration),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub session_id: Uuid,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration: Duration,
    pub probes_sent: u64,
    pub responses_received: u64,
    pub timeouts: u64,
    pub errors: u64,
    /// Percentage of probes that drew a response
    pub success_rate: f64,
    /// Probes per second
    pub throughput: f64,
}

impl PerformanceReport {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ScannerError::internal("report", format!("JSON serialization failed: {}", e)))
    }
}

impl fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Performance Report ===")?;
        writeln!(f, "Session: {}", self.session_id)?;
        writeln!(f, "Scan duration: {}ms", self.duration.as_millis())?;
        writeln!(f, "Probes sent: {}", self.probes_sent)?;
        writeln!(f, "Responses received: {}", self.responses_received)?;
        writeln!(f, "Timeouts: {}", self.timeouts)?;
        writeln!(f, "Errors: {}", self.errors)?;
        writeln!(f, "Success rate: {:.2}%", self.success_rate)?;
        writeln!(f, "Throughput: {:.2} probes/sec", self.throughput)?;
        write!(f, "==========================")
    }
}
