//! Command-line interface definition
//!
//! The `--optimize` flag is consumed before clap sees the arguments (see
//! [`crate::options`]); everything here tunes the session around it.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::{
    config::AppConfig,
    core::ScanMode,
    dispatcher::MergePolicy,
    error::{Result, ScannerError},
    scanner::parse_port_specification,
};

#[derive(Parser, Debug)]
#[command(
    name = "rustmap-adaptive",
    about = "Adaptive parallel port scanner",
    long_about = "Port scanner with an adaptive execution layer: workload-based timing, \
                  target sharding and parallel workers. Pass --optimize to enable it."
)]
pub struct Cli {
    /// Targets to scan (IPs or hostnames)
    #[arg(required_unless_present_any = ["help_adaptive", "validate_config"])]
    pub targets: Vec<String>,

    #[arg(short = 's', long, help = "SYN scan (falls back to connect probes)")]
    pub syn_scan: bool,

    #[arg(long, help = "TCP connect scan (default)")]
    pub tcp_scan: bool,

    #[arg(short = 'U', long, help = "UDP scan (falls back to connect probes)")]
    pub udp_scan: bool,

    #[arg(short = 'P', long, help = "Ping sweep only (host discovery)")]
    pub ping_scan: bool,

    #[arg(short = 'p', long, help = "Port specification (e.g., 22,80,443 or 1-1000)")]
    pub ports: Option<String>,

    #[arg(short = 'n', long, help = "Skip host discovery (treat all hosts as up)")]
    pub skip_discovery: bool,

    #[arg(short = 'w', long, help = "Maximum number of parallel workers", value_name = "NUM")]
    pub workers: Option<usize>,

    #[arg(long, help = "Adaptive timeout factor", value_name = "FACTOR")]
    pub timeout_factor: Option<f64>,

    #[arg(long, help = "How shard timeout profiles are merged", value_enum, value_name = "POLICY")]
    pub merge_policy: Option<MergePolicy>,

    #[arg(long, help = "Initial RTT timeout in milliseconds", value_name = "MS")]
    pub initial_rtt_timeout: Option<u64>,

    #[arg(long, help = "Retransmissions per probe", value_name = "NUM")]
    pub max_retries: Option<u8>,

    #[arg(long, help = "Disable performance monitoring")]
    pub no_monitor: bool,

    #[arg(short = 'o', long, help = "Output file path", value_name = "FILE")]
    pub output: Option<PathBuf>,

    #[arg(long, help = "Output format", value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Human)]
    pub format: OutputFormat,

    #[arg(short = 'v', long, help = "Increase verbosity level", action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[arg(short = 'q', long, help = "Quiet mode (errors only)")]
    pub quiet: bool,

    #[arg(short = 'c', long, help = "Configuration file path", value_name = "FILE", default_value = "config.toml")]
    pub config_path: PathBuf,

    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,

    #[arg(long, help = "Show adaptive execution options and exit")]
    pub help_adaptive: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON format
    Json,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Json => "json",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Cli {
    /// Validate CLI arguments and resolve conflicts
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(ports) = &self.ports {
            let parsed = parse_port_specification(ports).map_err(|e| e.to_string())?;
            if parsed.is_empty() {
                return Err("Port specification is empty".to_string());
            }
        }

        let modes = [self.syn_scan, self.tcp_scan, self.udp_scan, self.ping_scan]
            .iter()
            .filter(|m| **m)
            .count();
        if modes > 1 {
            return Err("Only one scan type may be selected".to_string());
        }

        if self.ping_scan && self.skip_discovery {
            return Err("Cannot skip host discovery in a ping sweep".to_string());
        }

        if self.quiet && self.verbose > 0 {
            return Err("Cannot use both quiet and verbose modes".to_string());
        }

        if self.workers == Some(0) {
            return Err("Worker count must be greater than 0".to_string());
        }

        if let Some(factor) = self.timeout_factor {
            if !factor.is_finite() || factor <= 0.0 {
                return Err(format!("Timeout factor must be positive, got {}", factor));
            }
        }

        Ok(())
    }

    pub fn scan_mode(&self) -> ScanMode {
        if self.syn_scan {
            ScanMode::SynScan
        } else if self.udp_scan {
            ScanMode::UdpScan
        } else if self.ping_scan {
            ScanMode::PingSweep
        } else {
            ScanMode::TcpConnect
        }
    }

    /// Log level implied by `-q` / `-v`, if any
    pub fn log_level(&self) -> Option<&'static str> {
        if self.quiet {
            return Some("error");
        }
        match self.verbose {
            0 => None,
            1 => Some("debug"),
            _ => Some("trace"),
        }
    }

    /// Fold command-line overrides into the loaded configuration.
    pub fn apply_to(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(workers) = self.workers {
            config.adaptive.set_worker_count(workers)?;
        }
        if let Some(factor) = self.timeout_factor {
            config.adaptive.set_adaptive_timeout_factor(factor)?;
        }
        if let Some(policy) = self.merge_policy {
            config.adaptive.merge_policy = policy;
        }
        if self.no_monitor {
            config.adaptive.performance_monitoring = false;
        }
        if let Some(ms) = self.initial_rtt_timeout {
            if ms == 0 {
                return Err(ScannerError::validation("initial_rtt_timeout", "must be greater than 0"));
            }
            config.timing.timeout_us = ms * 1000;
        }
        if let Some(retries) = self.max_retries {
            config.engine.max_retries = retries;
        }
        if self.skip_discovery {
            config.engine.host_discovery = false;
        }
        if let Some(level) = self.log_level() {
            config.logging.level = level.to_string();
        }
        Ok(())
    }
}
