//! Configuration management
//!
//! Settings are layered the usual way:
//! - Built-in defaults
//! - An optional TOML file (created from defaults when missing)
//! - Environment variables prefixed with `RUSTMAP_`, sections split by `__`
//!   (e.g. `RUSTMAP_ADAPTIVE__WORKER_COUNT=8`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info};

use crate::{
    dispatcher::MergePolicy,
    error::ScannerError,
    timing::{CongestionParams, TimeoutProfile},
};

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Adaptive execution settings
    pub adaptive: AdaptiveConfig,
    /// Timeout seeds and RTT clamps
    pub timing: TimingConfig,
    /// Baseline congestion parameters handed to the engine
    pub congestion: CongestionParams,
    /// Bundled probe engine settings
    pub engine: EngineConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Settings for one adaptive scan session.
///
/// Built once before a session starts and only read while it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    /// Use adaptive execution instead of handing the scan to the baseline engine
    pub enabled: bool,
    /// Maximum number of shards scanned concurrently
    pub worker_count: usize,
    /// Reported with each session, not applied to timeouts
    pub adaptive_timeout_factor: f64,
    /// Scale applied to the seed profile before workload tuning
    pub aggressive_factor: f64,
    /// Record session timestamps and emit a performance report
    pub performance_monitoring: bool,
    /// Run the strategy's batch preparation hook
    pub batch_processing: bool,
    /// Run the strategy's retry configuration hook
    pub smart_retry: bool,
    /// How shard-local timeout profiles are folded back into one
    pub merge_policy: MergePolicy,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            worker_count: 20,
            adaptive_timeout_factor: 0.8,
            aggressive_factor: 0.4,
            performance_monitoring: true,
            batch_processing: true,
            smart_retry: true,
            merge_policy: MergePolicy::LastFinished,
        }
    }
}

impl AdaptiveConfig {
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_worker_count(&mut self, workers: usize) -> crate::error::Result<()> {
        if workers == 0 {
            return Err(ScannerError::validation("worker_count", "must be greater than 0"));
        }
        self.worker_count = workers;
        Ok(())
    }

    pub fn set_adaptive_timeout_factor(&mut self, factor: f64) -> crate::error::Result<()> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(ScannerError::validation(
                "adaptive_timeout_factor",
                format!("must be a positive number, got {}", factor),
            ));
        }
        self.adaptive_timeout_factor = factor;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Smoothed RTT seed in microseconds, used when the caller supplies no profile
    pub srtt_us: u64,
    /// RTT variance seed in microseconds
    pub rttvar_us: u64,
    /// Timeout ceiling seed in microseconds
    pub timeout_us: u64,
    /// Lower clamp for engine-computed timeouts
    pub min_rtt_timeout_ms: u64,
    /// Upper clamp for engine-computed timeouts
    pub max_rtt_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            srtt_us: 20_000,
            rttvar_us: 10_000,
            timeout_us: 40_000,
            min_rtt_timeout_ms: 100,
            max_rtt_timeout_ms: 10_000,
        }
    }
}

impl TimingConfig {
    /// Profile used when the caller does not pass one in
    pub fn seed_profile(&self) -> TimeoutProfile {
        TimeoutProfile::from_micros(self.srtt_us, self.rttvar_us, self.timeout_us)
    }

    pub fn min_rtt_timeout(&self) -> Duration {
        Duration::from_millis(self.min_rtt_timeout_ms)
    }

    pub fn max_rtt_timeout(&self) -> Duration {
        Duration::from_millis(self.max_rtt_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Port specification used when none is given on the command line
    pub default_ports: String,
    /// Retransmissions allowed per probe before a port is marked filtered
    pub max_retries: u8,
    /// Port used for connect-based host discovery
    pub ping_port: u16,
    /// Ping hosts before probing their ports
    pub host_discovery: bool,
    /// Connect sockets open at once across all shards
    pub max_open_sockets: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_ports: "1-1000".to_string(),
            max_retries: 2,
            ping_port: 80,
            host_discovery: true,
            max_open_sockets: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty, compact)
    pub format: String,
    /// Daily-rotated log file (None for stderr only)
    pub file_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            adaptive: AdaptiveConfig::default(),
            timing: TimingConfig::default(),
            congestion: CongestionParams::default(),
            engine: EngineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file with environment variable overrides
    pub async fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        info!("Loading configuration from: {}", config_path.display());

        let mut settings = config::Config::builder();

        settings = settings.add_source(config::Config::try_from(&Self::default())?);

        if config_path.exists() {
            debug!("Found configuration file, loading settings");
            settings = settings.add_source(config::File::from(config_path));
        } else {
            info!("No configuration file found, using defaults");
            Self::create_default_config(config_path).await?;
        }

        settings = settings.add_source(
            config::Environment::with_prefix("RUSTMAP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = settings
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Create a default configuration file
    async fn create_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let config_content = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default configuration")?;

        tokio::fs::write(path, config_content)
            .await
            .context("Failed to write default configuration file")?;

        info!("Created default configuration file: {}", path.display());
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let adaptive = &self.adaptive;
        if adaptive.worker_count == 0 {
            return Err(anyhow::anyhow!("worker_count must be greater than 0"));
        }
        if !adaptive.adaptive_timeout_factor.is_finite() || adaptive.adaptive_timeout_factor <= 0.0 {
            return Err(anyhow::anyhow!(
                "adaptive_timeout_factor must be a positive number, got {}",
                adaptive.adaptive_timeout_factor
            ));
        }
        if !adaptive.aggressive_factor.is_finite() || adaptive.aggressive_factor <= 0.0 {
            return Err(anyhow::anyhow!(
                "aggressive_factor must be a positive number, got {}",
                adaptive.aggressive_factor
            ));
        }

        if self.congestion.max_cwnd == 0 {
            return Err(anyhow::anyhow!("max_cwnd must be greater than 0"));
        }
        if self.engine.max_open_sockets == 0 {
            return Err(anyhow::anyhow!("max_open_sockets must be greater than 0"));
        }
        if self.timing.timeout_us == 0 {
            return Err(anyhow::anyhow!("timeout_us must be greater than 0"));
        }
        if self.timing.min_rtt_timeout_ms > self.timing.max_rtt_timeout_ms {
            return Err(anyhow::anyhow!(
                "min_rtt_timeout_ms ({}) exceeds max_rtt_timeout_ms ({})",
                self.timing.min_rtt_timeout_ms,
                self.timing.max_rtt_timeout_ms
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(anyhow::anyhow!("Invalid logging level: {}", self.logging.level)),
        }
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => return Err(anyhow::anyhow!("Invalid logging format: {}", self.logging.format)),
        }

        debug!("Configuration validation passed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.adaptive.enabled);
        assert_eq!(config.adaptive.worker_count, 20);
        assert_eq!(config.adaptive.aggressive_factor, 0.4);
    }

    #[test]
    fn test_seed_profile_matches_timing_defaults() {
        let profile = TimingConfig::default().seed_profile();
        assert_eq!(profile.srtt, Duration::from_micros(20_000));
        assert_eq!(profile.rttvar, Duration::from_micros(10_000));
        assert_eq!(profile.timeout, Duration::from_micros(40_000));
    }

    #[test]
    fn test_zero_socket_budget_rejected() {
        let mut config = AppConfig::default();
        config.engine.max_open_sockets = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = AppConfig::default();
        config.adaptive.worker_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_factor_rejected() {
        let mut config = AppConfig::default();
        config.adaptive.adaptive_timeout_factor = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.adaptive.aggressive_factor = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_adaptive_setters_validate() {
        let mut adaptive = AdaptiveConfig::default();
        adaptive.set_enabled(true);
        assert!(adaptive.enabled);

        assert!(adaptive.set_worker_count(0).is_err());
        assert_eq!(adaptive.worker_count, 20);
        adaptive.set_worker_count(4).unwrap();
        assert_eq!(adaptive.worker_count, 4);

        assert!(adaptive.set_adaptive_timeout_factor(-1.0).is_err());
        assert!(adaptive.set_adaptive_timeout_factor(f64::INFINITY).is_err());
        adaptive.set_adaptive_timeout_factor(0.5).unwrap();
        assert_eq!(adaptive.adaptive_timeout_factor, 0.5);
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_creates_default_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = AppConfig::load(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.adaptive, AdaptiveConfig::default());
    }

    #[tokio::test]
    async fn test_load_reads_file_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut custom = AppConfig::default();
        custom.adaptive.enabled = true;
        custom.adaptive.worker_count = 4;
        custom.adaptive.merge_policy = MergePolicy::Average;
        std::fs::write(&path, toml::to_string_pretty(&custom).unwrap()).unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert!(config.adaptive.enabled);
        assert_eq!(config.adaptive.worker_count, 4);
        assert_eq!(config.adaptive.merge_policy, MergePolicy::Average);
    }
}
