//! rustmap-adaptive
//!
//! Parses arguments, loads configuration, then runs one scan through the
//! adaptive layer with the bundled TCP connect engine. Press Enter while a
//! scan runs to print a progress snapshot.

use adaptive_scanner::{
    cli::Cli,
    config::AppConfig,
    logging,
    options::{adaptive_options_help, handle_adaptive_options},
    reporting::{self, ScanSummary},
    AdaptiveScanner, ConnectEngine, PortSpec, ScanTarget,
};
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let mut adaptive = AppConfig::default().adaptive;
    let args = handle_adaptive_options(std::env::args(), &mut adaptive);
    let cli = Cli::parse_from(args);

    if cli.help_adaptive {
        print!("{}", adaptive_options_help());
        return Ok(());
    }
    cli.validate().map_err(|e| anyhow!(e))?;

    let mut config = AppConfig::load(&cli.config_path).await?;
    if adaptive.enabled {
        config.adaptive.set_enabled(true);
    }
    cli.apply_to(&mut config)?;
    config.validate()?;

    let _log_guard = logging::init_logging_with_config(&config.logging)?;
    if cli.validate_config {
        info!("Configuration is valid");
        return Ok(());
    }

    let mut targets = Vec::with_capacity(cli.targets.len());
    for spec in &cli.targets {
        targets.push(ScanTarget::resolve(spec).await?);
    }
    let ports = PortSpec::parse(cli.ports.as_deref().unwrap_or(&config.engine.default_ports))?;
    let mode = cli.scan_mode();

    let engine = ConnectEngine::new(&config);
    let mut scanner = AdaptiveScanner::new(engine, &config);
    // Detached: the process exits without waiting for the next line
    if let Err(e) = scanner.progress_signal().watch_lines(std::io::BufReader::new(std::io::stdin())) {
        warn!(error = %e, "Progress input unavailable");
    }

    info!(
        targets = targets.len(),
        ports = ports.len(),
        mode = mode.as_str(),
        adaptive = config.adaptive.enabled,
        "Starting rustmap-adaptive"
    );

    let outcome = scanner
        .run_adaptive_scan(&targets, &ports, mode, None)
        .await
        .context("Scan failed")?;

    let summary = ScanSummary::new(&outcome, mode, scanner.engine().take_results());
    match &cli.output {
        Some(path) => reporting::write_report(&summary, cli.format.as_str(), path).await?,
        None => print!("{}", reporting::render(&summary, cli.format.as_str())?),
    }

    info!("Scan completed successfully");
    Ok(())
}

