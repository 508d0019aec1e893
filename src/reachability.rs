//! Internet reachability checks
//!
//! Two probe styles are supported: a single ICMP echo through the system
//! `ping` tool, or a bare TCP connect to port 53 of a public DNS server.
//! Targets are tried in the configured order, each up to the retry budget.

use crate::config::InternetAccessConfig;
use crate::error::UnknownCheckMethod;
use crate::models::ReachabilityResult;
use crate::parser;
use crate::retry::RetryPolicy;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::process::Command;

const PING_TIMEOUT_SECS: &str = "5";
const DNS_PORT: u16 = 53;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMethod {
    Ping,
    Dns,
}

impl FromStr for CheckMethod {
    type Err = UnknownCheckMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ping" => Ok(Self::Ping),
            "dns" => Ok(Self::Dns),
            _ => Err(UnknownCheckMethod(s.to_string())),
        }
    }
}

/// Low-level network probes
#[async_trait]
pub trait Prober: Send + Sync {
    /// One echo request; returns the round-trip time in milliseconds
    async fn ping(&self, addr: &str) -> Result<f64>;

    /// Open (and drop) a TCP connection to `addr:53`
    async fn connect_dns(&self, addr: &str, timeout: Duration) -> Result<()>;
}

/// Probes using the system `ping` binary and real sockets
pub struct SystemProber;

#[async_trait]
impl Prober for SystemProber {
    async fn ping(&self, addr: &str) -> Result<f64> {
        let mut cmd = Command::new("ping");
        if cfg!(windows) {
            cmd.args([addr, "/n", "1"]);
        } else {
            cmd.args([addr, "-c", "1", "-W", PING_TIMEOUT_SECS]);
        }

        let output = cmd
            .output()
            .await
            .with_context(|| format!("failed to run ping {addr}"))?;

        if !output.status.success() {
            bail!(
                "ping {} exited with {}: {}",
                addr,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parser::parse_ping_time(&stdout)
            .ok_or_else(|| anyhow!("no round-trip time in ping output: {}", stdout.trim()))
    }

    async fn connect_dns(&self, addr: &str, timeout: Duration) -> Result<()> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((addr, DNS_PORT)))
            .await
            .map_err(|_| anyhow!("connection to {addr}:{DNS_PORT} timed out after {timeout:?}"))?
            .with_context(|| format!("connection to {addr}:{DNS_PORT} failed"))?;
        drop(stream);
        Ok(())
    }
}

/// Anything that can answer "is the internet up right now?"
#[async_trait]
pub trait ReachabilityCheck: Send + Sync {
    async fn check(&self) -> ReachabilityResult;
}

pub struct ReachabilityChecker {
    settings: InternetAccessConfig,
    retry: RetryPolicy,
    prober: Arc<dyn Prober>,
}

impl ReachabilityChecker {
    pub fn new(settings: InternetAccessConfig, retry: RetryPolicy) -> Self {
        Self::with_prober(settings, retry, Arc::new(SystemProber))
    }

    pub fn with_prober(
        settings: InternetAccessConfig,
        retry: RetryPolicy,
        prober: Arc<dyn Prober>,
    ) -> Self {
        Self {
            settings,
            retry,
            prober,
        }
    }

    async fn check_ping(&self) -> ReachabilityResult {
        let mut last_error = String::from("Ping failed - no ping addresses configured");

        for addr in &self.settings.ping_addrs {
            let mut retry = self.retry.start(last_error);
            while let Some(attempt) = retry.next_attempt() {
                tracing::debug!("Attempting ping to {} (try {})", addr, attempt);
                let started = Instant::now();
                match self.prober.ping(addr).await {
                    Ok(latency) => {
                        let run_ms = started.elapsed().as_secs_f64() * 1000.0;
                        let message = format!(
                            "(ping {addr} {latency:6.1} ms, command run time {run_ms:6.1} ms)"
                        );
                        // A slow answer is a verdict, not a transient error
                        return if latency < self.settings.ping_max_time {
                            ReachabilityResult::up(message)
                        } else {
                            ReachabilityResult::down(message)
                        };
                    }
                    Err(e) => retry.record(format!("Ping errored: {e:#}")),
                }
            }
            last_error = retry.into_last_error();
            tracing::info!("Ping to <{}> failed. Trying next server, if specified.", addr);
        }

        ReachabilityResult::down(last_error)
    }

    async fn check_dns(&self) -> ReachabilityResult {
        let mut last_error = String::from("DNS check failed - no DNS addresses configured");

        for addr in &self.settings.dns_addrs {
            let mut retry = self.retry.start(last_error);
            while let Some(attempt) = retry.next_attempt() {
                tracing::debug!("Attempting socket connection to {} (try {})", addr, attempt);
                let started = Instant::now();
                match self
                    .prober
                    .connect_dns(addr, self.settings.dns_timeout)
                    .await
                {
                    Ok(()) => {
                        let run_ms = started.elapsed().as_secs_f64() * 1000.0;
                        return ReachabilityResult::up(format!(
                            "(DNS server {addr}, command run time {run_ms:6.1} ms)"
                        ));
                    }
                    Err(e) => retry.record(format!("DNS connection errored: {e:#}")),
                }
            }
            last_error = retry.into_last_error();
            tracing::info!(
                "DNS connection to <{}> failed. Trying next server, if specified.",
                addr
            );
        }

        ReachabilityResult::down(last_error)
    }
}

#[async_trait]
impl ReachabilityCheck for ReachabilityChecker {
    async fn check(&self) -> ReachabilityResult {
        match self.settings.method.parse::<CheckMethod>() {
            Ok(CheckMethod::Ping) => self.check_ping().await,
            Ok(CheckMethod::Dns) => self.check_dns().await,
            Err(e) => ReachabilityResult::down(format!("Reachability check failed - {e}")),
        }
    }
}
