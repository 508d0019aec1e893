//! The service loop: outage detection, WAN IP change tracking, config reload
//!
//! The loop wakes every `TICK` and runs a status cycle whenever the status
//! deadline has passed. A cycle that finds the internet down stays in an
//! outage wait until reachability returns, then waits out the recovery
//! delay and sends the "outage ended" notice. A healthy cycle polls the
//! modem (diagnostics), the router (WAN IP) and, on its own slower cadence,
//! the external IP page.

use crate::config::{Config, ConfigSource, DeviceConfig, MAX_PERIOD};
use crate::device::{DeviceClient, DeviceKind, DeviceSession};
use crate::external_ip::{ExternalIpClient, ExternalIpSource};
use crate::notify::Notifications;
use crate::reachability::{ReachabilityCheck, ReachabilityChecker};
use crate::report::status_line;
use crate::retry::RetryPolicy;
use crate::state::WanIpStore;
use anyhow::Result;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Outer loop granularity
pub const TICK: Duration = Duration::from_secs(10);

const OUTAGE_ENDED: &str = "NOTICE:  HOME INTERNET OUTAGE ENDED";
const WAN_IP_CHANGED: &str = "NOTICE:  HOME WAN IP CHANGED";

/// Everything built from one configuration generation.
///
/// Device sessions are closed when the bundle is closed or dropped.
pub struct Components {
    pub checker: Box<dyn ReachabilityCheck>,
    pub modem: Option<Box<dyn DeviceClient>>,
    pub router: Option<Box<dyn DeviceClient>>,
    pub external_ip: Option<Box<dyn ExternalIpSource>>,
    pub notifications: Notifications,
}

impl Components {
    pub fn close(&mut self) {
        for device in [self.modem.as_mut(), self.router.as_mut()].into_iter().flatten() {
            device.close();
        }
    }
}

impl Drop for Components {
    fn drop(&mut self) {
        self.close();
    }
}

/// Builds `Components` for a configuration
pub trait ComponentFactory: Send + Sync {
    fn build(&self, config: &Config) -> Result<Components>;
}

/// Real network clients
pub struct LiveComponents;

impl LiveComponents {
    fn device(
        kind: DeviceKind,
        config: Option<&DeviceConfig>,
        retry: RetryPolicy,
    ) -> Result<Option<Box<dyn DeviceClient>>> {
        let Some(config) = config else {
            return Ok(None);
        };
        let retry = config.retries.map_or(retry, RetryPolicy::new);
        let session = DeviceSession::new(kind, config.clone(), retry)?;
        Ok(Some(Box::new(session)))
    }
}

impl ComponentFactory for LiveComponents {
    fn build(&self, config: &Config) -> Result<Components> {
        let retry = RetryPolicy::new(config.global.n_retries);

        let external_ip: Option<Box<dyn ExternalIpSource>> = match &config.external_wan_ip {
            Some(ext) => Some(Box::new(ExternalIpClient::new(ext, retry)?)),
            None => None,
        };

        Ok(Components {
            checker: Box::new(ReachabilityChecker::new(
                config.internet_access.clone(),
                retry,
            )),
            modem: Self::device(DeviceKind::Modem, config.modem.as_ref(), retry)?,
            router: Self::device(DeviceKind::Router, config.router.as_ref(), retry)?,
            external_ip,
            notifications: Notifications::from_config(&config.notify)?,
        })
    }
}

/// Next-due instants for the two recurring checks
#[derive(Debug, Clone, Copy)]
pub struct PollSchedule {
    next_status: Instant,
    next_external: Instant,
}

impl PollSchedule {
    pub fn starting_at(now: Instant) -> Self {
        Self {
            next_status: now,
            next_external: now,
        }
    }

    /// Make both checks due immediately
    pub fn reset(&mut self, now: Instant) {
        *self = Self::starting_at(now);
    }

    pub fn status_due(&self, now: Instant) -> bool {
        now >= self.next_status
    }

    pub fn external_due(&self, now: Instant) -> bool {
        now >= self.next_external
    }

    /// Move the deadline forward from where it was, not from now, so a slow
    /// cycle does not shift the cadence
    pub fn advance_status(&mut self, period: Duration) {
        self.next_status = advance(self.next_status, period);
    }

    pub fn advance_external(&mut self, period: Duration) {
        self.next_external = advance(self.next_external, period);
    }
}

fn advance(deadline: Instant, period: Duration) -> Instant {
    deadline
        .checked_add(period)
        .unwrap_or_else(|| deadline + MAX_PERIOD)
}

/// Render an outage length like `0:05:07` or `1 day, 2:00:00`
pub fn format_outage(period: Duration) -> String {
    let secs = period.as_secs();
    let days = secs / 86_400;
    let rem = secs % 86_400;
    let clock = format!("{}:{:02}:{:02}", rem / 3600, (rem % 3600) / 60, rem % 60);
    match days {
        0 => clock,
        1 => format!("1 day, {clock}"),
        n => format!("{n} days, {clock}"),
    }
}

/// Sleep unless cancelled first; returns false on cancellation
async fn pause(cancel: &CancellationToken, period: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(period) => true,
    }
}

pub struct Supervisor {
    config: Config,
    source: Box<dyn ConfigSource>,
    factory: Box<dyn ComponentFactory>,
    components: Components,
    schedule: PollSchedule,
    store: WanIpStore,
    saved_wan_ip: String,
}

impl Supervisor {
    pub fn new(
        config: Config,
        source: Box<dyn ConfigSource>,
        factory: Box<dyn ComponentFactory>,
    ) -> Result<Self> {
        let components = factory.build(&config)?;
        let store = WanIpStore::new(config.global.wan_ip_path());
        let saved_wan_ip = store.load()?;

        Ok(Self {
            config,
            source,
            factory,
            components,
            schedule: PollSchedule::starting_at(Instant::now()),
            store,
            saved_wan_ip,
        })
    }

    pub fn saved_wan_ip(&self) -> &str {
        &self.saved_wan_ip
    }

    /// Loop until `cancel` fires, then close all device sessions
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        tracing::info!("Starting service loop...");
        tracing::info!(
            "Status check every {}, external WAN IP check every {}",
            humantime::format_duration(self.config.global.status_recheck_period),
            humantime::format_duration(self.config.global.external_wan_recheck_period)
        );
        tracing::info!("WAN IP file: {}", self.store.path().display());
        if self.components.notifications.is_empty() {
            tracing::warn!("No notification sinks configured, notices will only be logged");
        }

        while !cancel.is_cancelled() {
            if !self.tick(&cancel).await {
                break;
            }
            if !pause(&cancel, TICK).await {
                break;
            }
        }

        self.shutdown();
        Ok(())
    }

    /// One outer-loop pass: pick up config changes, then run the status
    /// cycle if it is due. Returns false if cancelled mid-cycle.
    pub async fn tick(&mut self, cancel: &CancellationToken) -> bool {
        self.reload_config();

        if !self.schedule.status_due(Instant::now()) {
            return true;
        }

        let finished = self.run_cycle(cancel).await;
        self.schedule
            .advance_status(self.config.global.status_recheck_period);
        finished
    }

    fn shutdown(&mut self) {
        tracing::warn!("Cleanup");
        self.components.close();
    }

    fn reload_config(&mut self) {
        let config = match self.source.reload_if_changed() {
            Ok(Some(config)) => config,
            Ok(None) => return,
            Err(e) => {
                tracing::error!("Config reload failed, keeping previous settings: {:#}", e);
                return;
            }
        };

        // Device field layouts may have changed, so sessions are rebuilt rather than patched
        match self.factory.build(&config) {
            Ok(components) => {
                tracing::warn!("NOTE - The config file has been reloaded.");
                let mut previous = std::mem::replace(&mut self.components, components);
                previous.close();
                self.config = config;
                self.schedule.reset(Instant::now());
            }
            Err(e) => {
                tracing::error!("Reloaded config rejected, keeping previous settings: {:#}", e);
            }
        }
    }

    async fn run_cycle(&mut self, cancel: &CancellationToken) -> bool {
        let access = self.components.checker.check().await;
        if !access.up {
            return self.wait_out_outage(cancel).await;
        }

        tracing::info!("{}", status_line("Internet access:", "Working", &access.message));
        self.poll_modem().await;
        self.poll_router().await;
        self.poll_external_ip().await;
        true
    }

    async fn wait_out_outage(&mut self, cancel: &CancellationToken) -> bool {
        let started = Instant::now();
        tracing::warn!("INTERNET ACCESS LOST");

        loop {
            // Can we still get past the router to the modem?
            if let Some(modem) = self.components.modem.as_mut() {
                let reading = modem.get_data().await;
                tracing::info!(
                    "{}",
                    status_line("Modem status:", &reading.value, &reading.message)
                );
            }

            let access = self.components.checker.check().await;
            tracing::debug!("Reachability check returned {}, {}", access.up, access.message);

            if access.up {
                let outage = started.elapsed();
                let delay = self.config.global.recovery_delay;
                tracing::info!(
                    "Doing <{}> internet access recovery delay",
                    humantime::format_duration(delay)
                );
                if !pause(cancel, delay).await {
                    return false;
                }

                let body = format!("Outage time:  {}", format_outage(outage));
                self.components.notifications.send(OUTAGE_ENDED, &body).await;
                self.schedule.reset(Instant::now());
                return true;
            }

            if !pause(cancel, self.config.global.outage_recheck_period).await {
                return false;
            }
        }
    }

    async fn poll_modem(&mut self) {
        let Some(modem) = self.components.modem.as_mut() else {
            return;
        };
        let reading = modem.get_data().await;
        let line = status_line("Modem status:", &reading.value, &reading.message);
        if reading.ok {
            tracing::info!("{}", line);
        } else {
            tracing::warn!("{}", line);
        }
    }

    async fn poll_router(&mut self) {
        let Some(router) = self.components.router.as_mut() else {
            return;
        };
        let reading = router.get_data().await;
        if !reading.ok {
            tracing::warn!(
                "Failed getting WAN IP address from {}: {}",
                router.name(),
                reading.message
            );
            return;
        }

        tracing::info!(
            "{}",
            status_line("Router reported WAN IP:", &reading.value, &reading.message)
        );
        if reading.value == self.saved_wan_ip {
            return;
        }

        let body = format!(
            "New WAN IP: <{}>, Prior WAN IP: <{}>.",
            reading.value, self.saved_wan_ip
        );
        self.components.notifications.send(WAN_IP_CHANGED, &body).await;

        // Persist regardless of how delivery went
        if let Err(e) = self.store.save(&reading.value) {
            tracing::error!("Failed to persist WAN IP {}: {:#}", reading.value, e);
        }
        self.saved_wan_ip = reading.value;
    }

    async fn poll_external_ip(&mut self) {
        let Some(external) = self.components.external_ip.as_ref() else {
            return;
        };
        if !self.schedule.external_due(Instant::now()) {
            return;
        }

        let reading = external.get_external_wan_ip().await;
        match reading.ip.as_deref() {
            Some(ip) => {
                tracing::info!(
                    "{}",
                    status_line("Externally reported WAN IP:", &reading.message, "")
                );
                if !self.saved_wan_ip.is_empty() && ip != self.saved_wan_ip {
                    tracing::warn!(
                        "Externally reported WAN IP {} differs from router WAN IP {}",
                        ip,
                        self.saved_wan_ip
                    );
                }
            }
            None => {
                tracing::warn!("Failed getting externally reported WAN IP: {}", reading.message)
            }
        }
        self.schedule
            .advance_external(self.config.global.external_wan_recheck_period);
    }
}
