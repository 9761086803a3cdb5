//! Logging setup and structured log helpers
//!
//! Console output goes to stderr as pretty, compact or JSON lines. When a
//! log file is configured, a daily-rotated JSON copy is written through a
//! non-blocking appender whose guard the caller must keep alive.

use anyhow::{anyhow, Context, Result};
use std::{io, path::Path, time::Instant};
use tracing::{info, Level};
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::{config::LoggingConfig, error::ScannerError};

/// Initialize logging from configuration.
///
/// Returns the file writer's guard when a log file is configured; dropping
/// it flushes and stops the background writer.
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = create_env_filter(&config.level)?;

    let console = match config.format.to_lowercase().as_str() {
        "json" => fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .boxed(),
        "compact" => fmt::layer()
            .compact()
            .with_writer(io::stderr)
            .with_target(false)
            .boxed(),
        _ => fmt::layer()
            .pretty()
            .with_writer(io::stderr)
            .with_target(false)
            .boxed(),
    };

    let (file_layer, guard) = match &config.file_path {
        Some(path) => {
            let (dir, file_name) = split_log_path(path)?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

            let (writer, guard) = non_blocking(rolling::daily(dir, file_name));
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    Registry::default()
        .with(env_filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    info!(
        level = %config.level,
        format = %config.format,
        "Logging system initialized"
    );
    Ok(guard)
}

/// Build the filter from a level name; `RUST_LOG` directives still apply.
fn create_env_filter(level: &str) -> Result<EnvFilter> {
    let base_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => return Err(ScannerError::config(format!("Invalid log level: {}", level)).into()),
    };

    let filter = EnvFilter::builder()
        .with_default_directive(base_level.into())
        .from_env()
        .context("Failed to create environment filter")?
        .add_directive("tokio=warn".parse()?)
        .add_directive("mio=warn".parse()?);

    Ok(filter)
}

fn split_log_path(path: &Path) -> Result<(&Path, &std::ffi::OsStr)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("Log file path has no file name: {}", path.display()))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok((dir, file_name))
}

#[macro_export]
macro_rules! log_shard_start {
    ($shard:expr, $targets:expr, $mode:expr) => {
        tracing::debug!(
            shard = $shard,
            targets = $targets,
            mode = $mode,
            event = "shard_start",
            "Starting shard {} with {} targets",
            $shard,
            $targets
        );
    };
}

#[macro_export]
macro_rules! log_shard_complete {
    ($shard:expr, $duration:expr, $iterations:expr, $probes:expr) => {
        tracing::debug!(
            shard = $shard,
            duration_ms = $duration.as_millis() as u64,
            iterations = $iterations,
            probes = $probes,
            event = "shard_complete",
            "Completed shard {} in {}ms ({} iterations, {} probes)",
            $shard,
            $duration.as_millis(),
            $iterations,
            $probes
        );
    };
}

#[macro_export]
macro_rules! log_port_discovery {
    ($host:expr, $port:expr, $state:expr) => {
        tracing::info!(
            host = %$host,
            port = $port,
            state = $state,
            event = "port_discovery",
            "Discovered port {}:{} - {}",
            $host,
            $port,
            $state
        );
    };
}

#[macro_export]
macro_rules! log_error_with_context {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            context = $context,
            severity = %$error.severity(),
            event = "error",
            "Error in {}: {}",
            $context,
            $error
        );
    };
}

#[macro_export]
macro_rules! log_performance_metric {
    ($metric_name:expr, $value:expr, $unit:expr) => {
        tracing::debug!(
            metric_name = $metric_name,
            value = $value,
            unit = $unit,
            event = "performance_metric",
            "Performance metric: {} = {} {}",
            $metric_name,
            $value,
            $unit
        );
    };
}

/// Logs how long an operation took when dropped
pub struct TimingLogger {
    operation: String,
    started: Instant,
}

impl TimingLogger {
    pub fn start<S: Into<String>>(operation: S) -> Self {
        let operation = operation.into();
        tracing::trace!(operation = %operation, event = "timing_start", "Timing {}", operation);
        Self {
            operation,
            started: Instant::now(),
        }
    }

    pub fn checkpoint(&self, name: &str) {
        tracing::debug!(
            operation = %self.operation,
            checkpoint = name,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            event = "timing_checkpoint",
            "Checkpoint '{}' in '{}'",
            name,
            self.operation
        );
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }
}

impl Drop for TimingLogger {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        tracing::debug!(
            operation = %self.operation,
            duration_ms = elapsed.as_millis() as u64,
            event = "timing_complete",
            "Completed '{}' in {}ms",
            self.operation,
            elapsed.as_millis()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_env_filter_creation() {
        assert!(create_env_filter("info").is_ok());
        assert!(create_env_filter("DEBUG").is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        assert!(create_env_filter("invalid").is_err());
    }

    #[test]
    fn test_split_log_path() {
        let path = PathBuf::from("/var/log/rustmap/adaptive.log");
        let (dir, name) = split_log_path(&path).unwrap();
        assert_eq!(dir, Path::new("/var/log/rustmap"));
        assert_eq!(name, "adaptive.log");

        let bare = PathBuf::from("adaptive.log");
        let (dir, _) = split_log_path(&bare).unwrap();
        assert_eq!(dir, Path::new("."));

        assert!(split_log_path(Path::new("/")).is_err());
    }

    #[test]
    fn test_timing_logger_measures() {
        let timer = TimingLogger::start("unit");
        timer.checkpoint("halfway");
        assert!(timer.elapsed() <= std::time::Duration::from_secs(5));
    }
}
