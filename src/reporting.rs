//! Scan summary rendering
//!
//! Turns a finished run into human-readable text or JSON and optionally
//! writes it to a file.

use serde::Serialize;
use std::{fmt::Write as _, path::Path};
use tokio::fs;

use crate::{
    core::ScanMode,
    error::{Result, ScannerError},
    orchestrator::{ExecutionPath, ScanOutcome},
    scanner::{HostReport, HostStatus, PortState},
    telemetry::PerformanceReport,
    timing::TimeoutProfile,
    tuner::WorkloadClass,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanSummary {
    pub path: ExecutionPath,
    pub mode: ScanMode,
    pub workload: Option<WorkloadClass>,
    pub shards: usize,
    pub timeouts: TimeoutProfile,
    pub hosts: Vec<HostReport>,
    pub performance: Option<PerformanceReport>,
}

impl ScanSummary {
    pub fn new(outcome: &ScanOutcome, mode: ScanMode, hosts: Vec<HostReport>) -> Self {
        Self {
            path: outcome.path,
            mode,
            workload: outcome.workload,
            shards: outcome.shards.len(),
            timeouts: outcome.timeouts,
            hosts,
            performance: outcome.report.clone(),
        }
    }

    pub fn hosts_up(&self) -> usize {
        self.hosts.iter().filter(|h| h.status == HostStatus::Up).count()
    }
}

/// Render `summary` as `human` or `json`
pub fn render(summary: &ScanSummary, format: &str) -> Result<String> {
    match format.to_lowercase().as_str() {
        "json" => serde_json::to_string_pretty(summary)
            .map_err(|e| ScannerError::internal("report", format!("JSON serialization failed: {}", e))),
        "human" => Ok(render_human(summary)),
        _ => Err(ScannerError::validation(
            "format",
            format!("Unsupported output format: {}", format),
        )),
    }
}

pub async fn write_report(summary: &ScanSummary, format: &str, output_path: &Path) -> Result<()> {
    let content = render(summary, format)?;

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::write(output_path, content).await?;

    tracing::info!("Report written: {} ({})", output_path.display(), format);
    Ok(())
}

fn render_human(summary: &ScanSummary) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "Scan mode: {} ({} path)",
        summary.mode,
        match summary.path {
            ExecutionPath::Adaptive => "adaptive",
            ExecutionPath::Baseline => "baseline",
        }
    );
    if let Some(workload) = summary.workload {
        let _ = writeln!(out, "Workload: {}, {} shard(s)", workload.as_str(), summary.shards);
    }
    let _ = writeln!(
        out,
        "Hosts: {} scanned, {} up",
        summary.hosts.len(),
        summary.hosts_up()
    );

    for host in &summary.hosts {
        let _ = writeln!(out);
        let status = match host.status {
            HostStatus::Up => "up",
            HostStatus::Down => "down",
            HostStatus::Pending | HostStatus::Pinging => "unknown",
        };
        let _ = writeln!(out, "Host: {} ({})", host.target, status);

        let shown: Vec<_> = host
            .ports
            .iter()
            .filter(|(_, state)| *state != PortState::Closed)
            .collect();
        if shown.is_empty() {
            continue;
        }
        let _ = writeln!(out, "  {:<10}{}", "PORT", "STATE");
        for (port, state) in shown {
            let _ = writeln!(out, "  {:<10}{}", format!("{}/tcp", port), state);
        }
    }

    let _ = writeln!(
        out,
        "\nFinal timeouts: srtt {}us, rttvar {}us, timeout {}us",
        summary.timeouts.srtt.as_micros(),
        summary.timeouts.rttvar.as_micros(),
        summary.timeouts.timeout.as_micros()
    );

    if let Some(report) = &summary.performance {
        let _ = writeln!(out, "\n{}", report);
    }
    out
}
