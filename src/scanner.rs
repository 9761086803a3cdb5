//! Targets, port specifications and the bundled TCP connect engine
//!
//! [`ConnectEngine`] implements [`ProbeEngine`] with plain tokio
//! `TcpStream::connect` probes:
//! - Optional connect-based host discovery against a single ping port
//! - Per-host congestion windows under a per-state in-flight ceiling
//! - One socket budget shared by every state the engine creates, so
//!   parallel shards cannot run the process out of file descriptors
//! - Timed-out probes are retransmitted, transient socket errors retried
//! - Descriptor exhaustion is back-pressure: the probe is requeued, never
//!   recorded as a port state
//! - RTT samples refine the shard's timeout profile as the scan runs

use async_trait::async_trait;
use futures::{future::BoxFuture, stream::FuturesUnordered, FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashSet, VecDeque},
    fmt, io,
    net::{IpAddr, SocketAddr},
    str::FromStr,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tokio::{
    net::TcpStream,
    sync::Semaphore,
    time::{sleep, timeout},
};
use tracing::{debug, warn};

use crate::{
    config::{AppConfig, EngineConfig, TimingConfig},
    core::{ProbeEngine, ScanMode, ScanState},
    driver::{drive_to_completion, ProgressSignal},
    error::{Result, ScannerError},
    telemetry::ProbeStats,
    timing::{CongestionParams, TimeoutProfile},
};

/// A host to scan
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanTarget {
    ip: IpAddr,
    hostname: Option<String>,
}

impl ScanTarget {
    pub fn new(ip: IpAddr, hostname: Option<String>) -> Self {
        Self { ip, hostname }
    }

    pub fn from_ip(ip: IpAddr) -> Self {
        Self { ip, hostname: None }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// Parse a literal IP address
    pub fn parse(spec: &str) -> Result<Self> {
        IpAddr::from_str(spec.trim())
            .map(Self::from_ip)
            .map_err(|_| ScannerError::invalid_target(spec, "not an IP address"))
    }

    /// Parse an IP address, falling back to a DNS lookup for hostnames.
    pub async fn resolve(spec: &str) -> Result<Self> {
        if let Ok(target) = Self::parse(spec) {
            return Ok(target);
        }

        let host = spec.trim();
        let mut addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| ScannerError::invalid_target(spec, format!("lookup failed: {}", e)))?;

        addrs
            .next()
            .map(|addr| Self::new(addr.ip(), Some(host.to_string())))
            .ok_or_else(|| ScannerError::invalid_target(spec, "hostname resolved to no addresses"))
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(hostname) = &self.hostname {
            write!(f, "{} ({})", hostname, self.ip)
        } else {
            write!(f, "{}", self.ip)
        }
    }
}

/// Ordered, duplicate-free list of ports to probe on every host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    ports: Vec<u16>,
}

impl PortSpec {
    /// Parse `"22,80-82,443"` style specifications. Duplicates keep their
    /// first position.
    pub fn parse(spec: &str) -> Result<Self> {
        let ports = parse_port_specification(spec)?;
        if ports.is_empty() {
            return Err(ScannerError::validation("ports", "no ports specified"));
        }
        Ok(Self::from_ports(ports))
    }

    pub fn from_ports(ports: impl IntoIterator<Item = u16>) -> Self {
        let mut seen = HashSet::new();
        Self {
            ports: ports.into_iter().filter(|p| seen.insert(*p)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports.iter().copied()
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.ports
    }
}

impl FromStr for PortSpec {
    type Err = ScannerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Parse a port specification string into a list of ports
pub fn parse_port_specification(spec: &str) -> Result<Vec<u16>> {
    let mut ports = Vec::new();

    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let start: u16 = start
                .trim()
                .parse()
                .map_err(|_| ScannerError::validation("port", format!("Invalid start port: {}", start)))?;
            let end: u16 = end
                .trim()
                .parse()
                .map_err(|_| ScannerError::validation("port", format!("Invalid end port: {}", end)))?;

            if start > end {
                return Err(ScannerError::validation(
                    "port_range",
                    format!("Invalid range: {}-{}", start, end),
                ));
            }
            ports.extend(start..=end);
        } else {
            let port: u16 = part
                .parse()
                .map_err(|_| ScannerError::validation("port", format!("Invalid port: {}", part)))?;
            ports.push(port);
        }
    }

    Ok(ports)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
}

impl PortState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Filtered => "filtered",
        }
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    /// Not pinged yet
    Pending,
    /// Discovery ping outstanding or queued for retransmission
    Pinging,
    Up,
    Down,
}

/// Final per-host outcome of a connect scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostReport {
    pub target: ScanTarget,
    pub status: HostStatus,
    pub ports: Vec<(u16, PortState)>,
}

impl HostReport {
    pub fn open_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports
            .iter()
            .filter(|(_, state)| *state == PortState::Open)
            .map(|(port, _)| *port)
    }
}

type ResultSink = Arc<Mutex<Vec<HostReport>>>;

/// errno values for "too many open files", process-wide and system-wide
const EMFILE: i32 = 24;
const ENFILE: i32 = 23;

/// Pause before reporting descriptor exhaustion, so sockets can drain
const EXHAUSTION_BACKOFF: Duration = Duration::from_millis(10);

/// TCP connect probe engine
///
/// Every state it creates reports finished hosts into one shared sink,
/// drained with [`ConnectEngine::take_results`], and draws connect
/// permits from one pool of `engine.max_open_sockets`.
#[derive(Debug, Clone)]
pub struct ConnectEngine {
    engine: EngineConfig,
    timing: TimingConfig,
    congestion: CongestionParams,
    results: ResultSink,
    connect_slots: Arc<Semaphore>,
}

impl ConnectEngine {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            engine: config.engine.clone(),
            timing: config.timing.clone(),
            congestion: config.congestion,
            results: Arc::default(),
            connect_slots: Arc::new(Semaphore::new(config.engine.max_open_sockets.max(1))),
        }
    }

    /// Finished hosts from every scan so far, ordered by address
    pub fn take_results(&self) -> Vec<HostReport> {
        let mut results = std::mem::take(&mut *lock_sink(&self.results));
        results.sort_by_key(|r| r.target.ip());
        results
    }

    pub fn build_state(
        &self,
        targets: &[ScanTarget],
        ports: &PortSpec,
        mode: ScanMode,
        timeouts: TimeoutProfile,
        congestion: CongestionParams,
    ) -> ConnectScanState {
        ConnectScanState::new(
            targets,
            ports,
            mode,
            timeouts,
            congestion,
            &self.engine,
            &self.timing,
            Arc::clone(&self.results),
            Arc::clone(&self.connect_slots),
        )
    }
}

#[async_trait]
impl ProbeEngine for ConnectEngine {
    type State = ConnectScanState;

    fn create_state(
        &self,
        targets: &[ScanTarget],
        ports: &PortSpec,
        mode: ScanMode,
        timeouts: TimeoutProfile,
        congestion: CongestionParams,
    ) -> Result<Self::State> {
        if congestion.max_cwnd == 0 {
            return Err(ScannerError::validation("max_cwnd", "must be greater than 0"));
        }
        Ok(self.build_state(targets, ports, mode, timeouts, congestion))
    }

    async fn baseline_scan(
        &self,
        targets: &[ScanTarget],
        ports: &PortSpec,
        mode: ScanMode,
        timeouts: Option<TimeoutProfile>,
        progress: &ProgressSignal,
    ) -> Result<TimeoutProfile> {
        let seed = timeouts.unwrap_or_else(|| self.timing.seed_profile());
        let mut state = self.create_state(targets, ports, mode, seed, self.default_congestion())?;
        if state.is_raw_scan() {
            state.begin_sniffer().await?;
        }

        let summary = drive_to_completion(&mut state, 0, progress).await?;
        debug!(
            iterations = summary.iterations,
            probes = summary.stats.probes_sent,
            "Baseline scan finished"
        );
        Ok(summary.timeouts)
    }

    fn default_congestion(&self) -> CongestionParams {
        self.congestion
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeKind {
    Ping,
    Port(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Probe {
    host: usize,
    kind: ProbeKind,
    /// 0 for the first transmission; queued probes carry the attempt they
    /// will be sent as
    attempt: u8,
}

#[derive(Debug)]
enum Outcome {
    Connected(Duration),
    Refused(Duration),
    TimedOut,
    /// No socket could be opened; nothing was sent
    Exhausted,
    Failed { transient: bool, message: String },
}

#[derive(Debug)]
struct Completed {
    probe: Probe,
    outcome: Outcome,
}

fn lock_sink(sink: &ResultSink) -> std::sync::MutexGuard<'_, Vec<HostReport>> {
    sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct HostState {
    target: ScanTarget,
    status: HostStatus,
    reported: bool,
    cwnd: u32,
    in_flight: u32,
    next_port: usize,
    retransmit: VecDeque<Probe>,
    retry_stack: Vec<Probe>,
    ports: Vec<(u16, PortState)>,
}

impl HostState {
    fn grow(&mut self, params: &CongestionParams) {
        let incr = if self.cwnd < params.max_cwnd / 2 {
            params.slow_incr
        } else {
            params.ca_incr
        };
        self.cwnd = self.cwnd.saturating_add(incr).min(params.max_cwnd.max(1));
    }

    fn shrink(&mut self, params: &CongestionParams) {
        self.cwnd = (self.cwnd / 2).max(params.low_cwnd).max(1);
    }

    fn finished_ports(&self) -> usize {
        self.ports.len()
    }

    fn report(&self) -> HostReport {
        let mut ports = self.ports.clone();
        ports.sort_unstable_by_key(|(port, _)| *port);
        HostReport {
            target: self.target.clone(),
            status: self.status,
            ports,
        }
    }
}

/// Scan state for one set of targets
pub struct ConnectScanState {
    mode: ScanMode,
    ports: Vec<u16>,
    hosts: Vec<HostState>,
    timeouts: TimeoutProfile,
    congestion: CongestionParams,
    ping_port: u16,
    max_retries: u8,
    min_timeout: Duration,
    max_timeout: Duration,
    in_flight: FuturesUnordered<BoxFuture<'static, Completed>>,
    received: Vec<Completed>,
    stats: ProbeStats,
    sniffer_started: bool,
    created: Instant,
    sink: ResultSink,
    slots: Arc<Semaphore>,
}

impl ConnectScanState {
    #[allow(clippy::too_many_arguments)]
    fn new(
        targets: &[ScanTarget],
        ports: &PortSpec,
        mode: ScanMode,
        timeouts: TimeoutProfile,
        congestion: CongestionParams,
        engine: &EngineConfig,
        timing: &TimingConfig,
        sink: ResultSink,
        slots: Arc<Semaphore>,
    ) -> Self {
        let initial_status = if engine.host_discovery || mode == ScanMode::PingSweep {
            HostStatus::Pending
        } else {
            HostStatus::Up
        };
        let initial_cwnd = congestion.host_initial_cwnd.clamp(1, congestion.max_cwnd.max(1));

        let hosts = targets
            .iter()
            .map(|target| HostState {
                target: target.clone(),
                status: initial_status,
                reported: false,
                cwnd: initial_cwnd,
                in_flight: 0,
                next_port: 0,
                retransmit: VecDeque::new(),
                retry_stack: Vec::new(),
                ports: Vec::new(),
            })
            .collect();

        Self {
            mode,
            ports: ports.as_slice().to_vec(),
            hosts,
            timeouts,
            congestion,
            ping_port: engine.ping_port,
            max_retries: engine.max_retries,
            min_timeout: timing.min_rtt_timeout(),
            max_timeout: timing.max_rtt_timeout(),
            in_flight: FuturesUnordered::new(),
            received: Vec::new(),
            stats: ProbeStats::default(),
            sniffer_started: false,
            created: Instant::now(),
            sink,
            slots,
        }
    }

    /// Per-host results gathered so far
    pub fn host_reports(&self) -> Vec<HostReport> {
        self.hosts.iter().map(HostState::report).collect()
    }

    /// Hand every newly finished host to the engine's result sink
    fn flush_finished(&mut self) {
        let finished: Vec<usize> = (0..self.hosts.len())
            .filter(|&i| !self.hosts[i].reported && self.host_complete(&self.hosts[i]))
            .collect();
        if finished.is_empty() {
            return;
        }

        let mut sink = lock_sink(&self.sink);
        for i in finished {
            self.hosts[i].reported = true;
            sink.push(self.hosts[i].report());
        }
    }

    fn ping_only(&self) -> bool {
        self.mode == ScanMode::PingSweep
    }

    fn host_complete(&self, host: &HostState) -> bool {
        match host.status {
            HostStatus::Down => true,
            HostStatus::Up => self.ping_only() || host.finished_ports() >= self.ports.len(),
            HostStatus::Pending | HostStatus::Pinging => false,
        }
    }

    fn can_send(&self, host: usize) -> bool {
        let host = &self.hosts[host];
        host.in_flight < host.cwnd && self.in_flight.len() < self.congestion.max_cwnd as usize
    }

    /// Connect deadline for new probes
    fn probe_deadline(&self) -> Duration {
        self.timeouts.timeout.clamp(self.min_timeout, self.max_timeout)
    }

    fn launch(&mut self, host: usize, kind: ProbeKind, attempt: u8) {
        let port = match kind {
            ProbeKind::Ping => self.ping_port,
            ProbeKind::Port(port) => port,
        };
        let addr = SocketAddr::new(self.hosts[host].target.ip(), port);
        let deadline = self.probe_deadline();
        let slots = Arc::clone(&self.slots);
        let probe = Probe {
            host,
            kind,
            attempt,
        };

        self.in_flight.push(
            async move {
                // Held until the socket is dropped at the end of this block
                let Ok(_permit) = slots.acquire_owned().await else {
                    return Completed {
                        probe,
                        outcome: Outcome::Exhausted,
                    };
                };
                let started = Instant::now();
                let outcome = match timeout(deadline, TcpStream::connect(addr)).await {
                    Ok(Ok(_stream)) => Outcome::Connected(started.elapsed()),
                    Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                        Outcome::Refused(started.elapsed())
                    }
                    Ok(Err(e)) if is_descriptor_exhaustion(&e) => {
                        sleep(EXHAUSTION_BACKOFF).await;
                        Outcome::Exhausted
                    }
                    Ok(Err(e)) => Outcome::Failed {
                        transient: is_transient(&e),
                        message: e.to_string(),
                    },
                    Err(_) => Outcome::TimedOut,
                };
                Completed { probe, outcome }
            }
            .boxed(),
        );

        self.hosts[host].in_flight += 1;
        self.stats.probes_sent += 1;
    }

    fn settle(&mut self, done: Completed) {
        let Completed { probe, outcome } = done;
        let congestion = self.congestion;
        let max_retries = self.max_retries;

        if let Outcome::Connected(rtt) | Outcome::Refused(rtt) = outcome {
            // Retransmitted probes give ambiguous samples
            if probe.attempt == 0 {
                self.timeouts.observe_rtt(rtt, self.min_timeout, self.max_timeout);
            }
        }

        let host = &mut self.hosts[probe.host];
        host.in_flight = host.in_flight.saturating_sub(1);

        match outcome {
            Outcome::Connected(_) | Outcome::Refused(_) => {
                self.stats.responses_received += 1;
                host.grow(&congestion);
                let open = matches!(outcome, Outcome::Connected(_));
                match probe.kind {
                    ProbeKind::Ping => host.status = HostStatus::Up,
                    ProbeKind::Port(port) => {
                        let state = if open { PortState::Open } else { PortState::Closed };
                        host.ports.push((port, state));
                        if open {
                            crate::log_port_discovery!(host.target, port, state.as_str());
                        }
                    }
                }
            }
            Outcome::TimedOut => {
                self.stats.timeouts += 1;
                host.shrink(&congestion);
                if probe.attempt < max_retries {
                    host.retransmit.push_back(probe.next_attempt());
                } else {
                    give_up(host, probe.kind);
                }
            }
            Outcome::Exhausted => {
                // Never reached the wire
                self.stats.probes_sent = self.stats.probes_sent.saturating_sub(1);
                host.shrink(&congestion);
                host.retry_stack.push(probe);
                debug!(target_host = %host.target, kind = ?probe.kind, cwnd = host.cwnd, "Out of sockets, probe requeued");
            }
            Outcome::Failed { transient, message } => {
                self.stats.errors += 1;
                debug!(target_host = %host.target, kind = ?probe.kind, error = %message, "Probe failed");
                if transient && probe.attempt < max_retries {
                    host.retry_stack.push(probe.next_attempt());
                } else {
                    give_up(host, probe.kind);
                }
            }
        }
    }
}

fn give_up(host: &mut HostState, kind: ProbeKind) {
    match kind {
        ProbeKind::Ping => host.status = HostStatus::Down,
        ProbeKind::Port(port) => host.ports.push((port, PortState::Filtered)),
    }
}

impl Probe {
    fn next_attempt(self) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            ..self
        }
    }
}

fn is_descriptor_exhaustion(error: &io::Error) -> bool {
    matches!(error.raw_os_error(), Some(EMFILE) | Some(ENFILE))
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::AddrInUse
            | io::ErrorKind::AddrNotAvailable
    )
}

#[async_trait]
impl ScanState for ConnectScanState {
    fn incomplete_hosts_remain(&self) -> bool {
        self.hosts.iter().any(|host| !self.host_complete(host))
    }

    fn is_raw_scan(&self) -> bool {
        self.mode.is_raw()
    }

    async fn begin_sniffer(&mut self) -> Result<()> {
        if !self.sniffer_started {
            warn!(
                mode = self.mode.as_str(),
                "Raw packet capture unavailable, falling back to TCP connect probes"
            );
            self.sniffer_started = true;
        }
        Ok(())
    }

    async fn do_pings(&mut self) -> Result<()> {
        for host in 0..self.hosts.len() {
            if self.hosts[host].status == HostStatus::Pending && self.can_send(host) {
                self.hosts[host].status = HostStatus::Pinging;
                self.launch(host, ProbeKind::Ping, 0);
            }
        }
        Ok(())
    }

    async fn do_outstanding_retransmits(&mut self) -> Result<()> {
        for host in 0..self.hosts.len() {
            while self.can_send(host) {
                let Some(probe) = self.hosts[host].retransmit.pop_front() else {
                    break;
                };
                self.launch(host, probe.kind, probe.attempt);
            }
        }
        Ok(())
    }

    async fn do_retry_stack_retransmits(&mut self) -> Result<()> {
        for host in 0..self.hosts.len() {
            while self.can_send(host) {
                let Some(probe) = self.hosts[host].retry_stack.pop() else {
                    break;
                };
                self.launch(host, probe.kind, probe.attempt);
            }
        }
        Ok(())
    }

    async fn do_new_probes(&mut self) -> Result<()> {
        if self.ping_only() {
            return Ok(());
        }
        for host in 0..self.hosts.len() {
            if self.hosts[host].status != HostStatus::Up {
                continue;
            }
            while self.can_send(host) && self.hosts[host].next_port < self.ports.len() {
                let port = self.ports[self.hosts[host].next_port];
                self.hosts[host].next_port += 1;
                self.launch(host, ProbeKind::Port(port), 0);
            }
        }
        Ok(())
    }

    async fn wait_for_responses(&mut self) -> Result<()> {
        if self.in_flight.is_empty() {
            return Ok(());
        }

        let deadline = self.probe_deadline();
        if let Ok(Some(done)) = timeout(deadline, self.in_flight.next()).await {
            self.received.push(done);
            while let Some(Some(done)) = self.in_flight.next().now_or_never() {
                self.received.push(done);
            }
        }
        Ok(())
    }

    async fn process_data(&mut self) -> Result<()> {
        for done in std::mem::take(&mut self.received) {
            self.settle(done);
        }
        self.flush_finished();
        Ok(())
    }

    fn completion_fraction(&self) -> f64 {
        if self.hosts.is_empty() {
            return 1.0;
        }
        let units = if self.ping_only() { 1 } else { self.ports.len().max(1) };

        let done: f64 = self
            .hosts
            .iter()
            .map(|host| {
                if self.host_complete(host) {
                    1.0
                } else {
                    host.finished_ports() as f64 / units as f64
                }
            })
            .sum();
        done / self.hosts.len() as f64
    }

    fn current_rate(&self) -> f64 {
        crate::telemetry::throughput(self.stats.probes_sent, self.created.elapsed())
    }

    fn probe_stats(&self) -> ProbeStats {
        self.stats
    }

    fn timeouts(&self) -> TimeoutProfile {
        self.timeouts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    fn local_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.engine.host_discovery = false;
        config.engine.max_retries = 0;
        config
    }

    /// A listening port and a port that was just released (refuses connects)
    async fn open_and_closed_ports() -> (TcpListener, u16, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = {
            let spare = TcpListener::bind("127.0.0.1:0").await.unwrap();
            spare.local_addr().unwrap().port()
        };
        (listener, open, closed)
    }

    #[test]
    fn test_parse_port_specification() {
        let ports = parse_port_specification("22,80,443").unwrap();
        assert_eq!(ports, vec![22, 80, 443]);

        let ports = parse_port_specification("1-10").unwrap();
        assert_eq!(ports, (1..=10).collect::<Vec<u16>>());

        let ports = parse_port_specification("22, 80-82 ,443").unwrap();
        assert_eq!(ports, vec![22, 80, 81, 82, 443]);

        assert!(parse_port_specification("90-80").is_err());
        assert!(parse_port_specification("http").is_err());
        assert!(parse_port_specification("70000").is_err());
    }

    #[test]
    fn test_port_spec_dedups_in_order() {
        let spec = PortSpec::parse("443,22,80,22,80-81").unwrap();
        assert_eq!(spec.as_slice(), &[443, 22, 80, 81]);
        assert_eq!(spec.len(), 4);
        assert!(PortSpec::parse(" , ").is_err());
    }

    #[test]
    fn test_scan_target_parsing() {
        let target = ScanTarget::parse("192.168.1.1").unwrap();
        assert_eq!(target.ip(), IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(target.hostname(), None);
        assert_eq!(target.to_string(), "192.168.1.1");

        assert!(ScanTarget::parse("not-an-ip").is_err());
    }

    #[tokio::test]
    async fn test_resolve_accepts_literal_and_localhost() {
        let target = ScanTarget::resolve("10.1.2.3").await.unwrap();
        assert_eq!(target.hostname(), None);

        let target = ScanTarget::resolve("localhost").await.unwrap();
        assert!(target.ip().is_loopback());
        assert_eq!(target.hostname(), Some("localhost"));
    }

    #[test]
    fn test_window_grows_and_halves() {
        let params = CongestionParams {
            max_cwnd: 8,
            host_initial_cwnd: 2,
            low_cwnd: 1,
            slow_incr: 2,
            ca_incr: 1,
        };
        let mut host = HostState {
            target: ScanTarget::parse("127.0.0.1").unwrap(),
            status: HostStatus::Up,
            reported: false,
            cwnd: 2,
            in_flight: 0,
            next_port: 0,
            retransmit: VecDeque::new(),
            retry_stack: Vec::new(),
            ports: Vec::new(),
        };

        host.grow(&params);
        assert_eq!(host.cwnd, 4);
        host.grow(&params);
        assert_eq!(host.cwnd, 5);
        for _ in 0..10 {
            host.grow(&params);
        }
        assert_eq!(host.cwnd, 8);

        host.shrink(&params);
        assert_eq!(host.cwnd, 4);
        for _ in 0..5 {
            host.shrink(&params);
        }
        assert_eq!(host.cwnd, 1);
    }

    #[tokio::test]
    async fn test_connect_scan_classifies_local_ports() {
        let (_listener, open, closed) = open_and_closed_ports().await;
        let config = local_config();
        let engine = ConnectEngine::new(&config);
        let targets = vec![ScanTarget::parse("127.0.0.1").unwrap()];
        let ports = PortSpec::from_ports([open, closed]);

        let mut state = engine
            .create_state(
                &targets,
                &ports,
                ScanMode::TcpConnect,
                config.timing.seed_profile(),
                config.congestion,
            )
            .unwrap();
        let summary = drive_to_completion(&mut state, 0, &ProgressSignal::new())
            .await
            .unwrap();

        assert_eq!(summary.stats.probes_sent, 2);
        assert_eq!(summary.stats.responses_received, 2);
        assert_eq!(state.completion_fraction(), 1.0);

        let reports = state.host_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].open_ports().collect::<Vec<_>>(), vec![open]);
        assert!(reports[0].ports.contains(&(closed, PortState::Closed)));

        assert_eq!(engine.take_results(), reports);
        assert!(engine.take_results().is_empty());
    }

    #[tokio::test]
    async fn test_host_discovery_marks_local_host_up() {
        let (_listener, open, _) = open_and_closed_ports().await;
        let mut config = local_config();
        config.engine.host_discovery = true;
        config.engine.ping_port = open;
        let engine = ConnectEngine::new(&config);

        let mut state = engine
            .create_state(
                &[ScanTarget::parse("127.0.0.1").unwrap()],
                &PortSpec::from_ports([open]),
                ScanMode::PingSweep,
                config.timing.seed_profile(),
                config.congestion,
            )
            .unwrap();
        drive_to_completion(&mut state, 0, &ProgressSignal::new())
            .await
            .unwrap();

        let reports = state.host_reports();
        assert_eq!(reports[0].status, HostStatus::Up);
        assert!(reports[0].ports.is_empty());
        assert_eq!(state.probe_stats().probes_sent, 1);
    }

    #[tokio::test]
    async fn test_raw_mode_falls_back_to_connect() {
        let (_listener, open, _) = open_and_closed_ports().await;
        let config = local_config();
        let engine = ConnectEngine::new(&config);

        let profile = engine
            .baseline_scan(
                &[ScanTarget::parse("127.0.0.1").unwrap()],
                &PortSpec::from_ports([open]),
                ScanMode::SynScan,
                None,
                &ProgressSignal::new(),
            )
            .await
            .unwrap();

        assert!(profile.timeout >= config.timing.min_rtt_timeout());
        assert!(profile.timeout <= config.timing.max_rtt_timeout());
    }

    #[tokio::test]
    async fn test_baseline_answers_progress_requests() {
        let (_listener, open, closed) = open_and_closed_ports().await;
        let engine = ConnectEngine::new(&local_config());
        let progress = ProgressSignal::new();
        progress.request();

        engine
            .baseline_scan(
                &[ScanTarget::parse("127.0.0.1").unwrap()],
                &PortSpec::from_ports([open, closed]),
                ScanMode::TcpConnect,
                None,
                &progress,
            )
            .await
            .unwrap();

        assert!(!progress.take());
    }

    /// Ports that refuse connections: bound once, then released
    async fn released_ports(count: usize) -> Vec<u16> {
        let mut listeners = Vec::with_capacity(count);
        for _ in 0..count {
            listeners.push(TcpListener::bind("127.0.0.1:0").await.unwrap());
        }
        listeners.iter().map(|l| l.local_addr().unwrap().port()).collect()
    }

    #[tokio::test]
    async fn test_parallel_shards_share_socket_budget() {
        use crate::{
            dispatcher::{Dispatcher, MergePolicy},
            partition::partition,
            strategy::NoopStrategy,
            telemetry::TelemetryCounters,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let mut ports = released_ports(40).await;
        ports.push(open);
        let ports = PortSpec::from_ports(ports);

        let mut config = local_config();
        config.engine.max_open_sockets = 3;
        let engine = Arc::new(ConnectEngine::new(&config));
        let targets = vec![ScanTarget::parse("127.0.0.1").unwrap(); 4];

        let dispatcher = Dispatcher::new(
            Arc::clone(&engine),
            Arc::new(NoopStrategy),
            ProgressSignal::new(),
            4,
            MergePolicy::default(),
        );
        let result = dispatcher
            .dispatch(
                partition(&targets, 4),
                &ports,
                ScanMode::TcpConnect,
                config.timing.seed_profile(),
                config.congestion,
                Arc::new(TelemetryCounters::new()),
            )
            .await
            .unwrap();

        assert_eq!(result.shards.len(), 4);
        assert_eq!(engine.connect_slots.available_permits(), 3);

        let reports = engine.take_results();
        assert_eq!(reports.len(), 4);
        for report in &reports {
            assert_eq!(report.ports.len(), ports.len());
            assert!(report.ports.iter().all(|(_, state)| *state != PortState::Filtered));
            assert_eq!(report.open_ports().collect::<Vec<_>>(), vec![open]);
        }
    }

    #[tokio::test]
    async fn test_descriptor_exhaustion_requeues_probe() {
        let (_listener, _, closed) = open_and_closed_ports().await;
        let config = local_config();
        let engine = ConnectEngine::new(&config);
        let mut state = engine.build_state(
            &[ScanTarget::parse("127.0.0.1").unwrap()],
            &PortSpec::from_ports([closed]),
            ScanMode::TcpConnect,
            config.timing.seed_profile(),
            config.congestion,
        );

        let before = state.hosts[0].cwnd;
        let probe = Probe {
            host: 0,
            kind: ProbeKind::Port(closed),
            attempt: 0,
        };
        state.hosts[0].next_port = 1;
        state.hosts[0].in_flight = 1;
        state.stats.probes_sent = 1;
        state.settle(Completed {
            probe,
            outcome: Outcome::Exhausted,
        });

        assert!(state.hosts[0].ports.is_empty());
        assert_eq!(state.hosts[0].retry_stack, vec![probe]);
        assert_eq!(state.hosts[0].cwnd, (before / 2).max(config.congestion.low_cwnd).max(1));
        assert_eq!(state.stats.probes_sent, 0);
        assert_eq!(state.stats.errors, 0);

        drive_to_completion(&mut state, 0, &ProgressSignal::new())
            .await
            .unwrap();
        assert_eq!(state.host_reports()[0].ports, vec![(closed, PortState::Closed)]);
    }

    #[test]
    fn test_descriptor_exhaustion_detection() {
        assert!(is_descriptor_exhaustion(&io::Error::from_raw_os_error(EMFILE)));
        assert!(is_descriptor_exhaustion(&io::Error::from_raw_os_error(ENFILE)));
        assert!(!is_descriptor_exhaustion(&io::Error::from(io::ErrorKind::ConnectionReset)));
    }

    #[tokio::test]
    async fn test_global_window_caps_in_flight() {
        let (_listener, open, closed) = open_and_closed_ports().await;
        let mut config = local_config();
        config.congestion.max_cwnd = 1;
        let engine = ConnectEngine::new(&config);

        let mut state = engine
            .create_state(
                &[ScanTarget::parse("127.0.0.1").unwrap()],
                &PortSpec::from_ports([open, closed]),
                ScanMode::TcpConnect,
                config.timing.seed_profile(),
                config.congestion,
            )
            .unwrap();
        state.do_new_probes().await.unwrap();
        assert_eq!(state.in_flight.len(), 1);

        let summary = drive_to_completion(&mut state, 0, &ProgressSignal::new())
            .await
            .unwrap();
        assert_eq!(summary.stats.probes_sent, 2);
    }

    #[test]
    fn test_zero_window_rejected() {
        let engine = ConnectEngine::new(&AppConfig::default());
        let congestion = CongestionParams {
            max_cwnd: 0,
            ..CongestionParams::default()
        };
        let result = engine.create_state(
            &[],
            &PortSpec::from_ports([80]),
            ScanMode::TcpConnect,
            TimingConfig::default().seed_profile(),
            congestion,
        );
        assert!(result.is_err());
    }
}
