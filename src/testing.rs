//! Test doubles shared by the unit tests

use crate::config::{Config, ConfigSource};
use crate::device::DeviceClient;
use crate::error::ConfigError;
use crate::external_ip::ExternalIpSource;
use crate::models::{DeviceReading, ExternalIpReading, ReachabilityResult};
use crate::notify::{Notifications, Notifier};
use crate::reachability::ReachabilityCheck;
use crate::supervisor::{ComponentFactory, Components};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub type Shared<T> = Arc<Mutex<T>>;

/// Records every delivered notification
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    pub sent: Shared<Vec<(String, String)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn notify(&self, subject: &str, body: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }
}

pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    fn name(&self) -> &str {
        "broken"
    }

    async fn notify(&self, _subject: &str, _body: &str) -> Result<()> {
        bail!("delivery refused")
    }
}

/// Plays back a reachability script; reports up once the script runs out
struct ScriptedChecker {
    script: Shared<VecDeque<bool>>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ReachabilityCheck for ScriptedChecker {
    async fn check(&self) -> ReachabilityResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let up = self.script.lock().unwrap().pop_front().unwrap_or(true);
        if up {
            ReachabilityResult::up("(ping 10.0.0.1   10.0 ms, command run time   11.0 ms)")
        } else {
            ReachabilityResult::down("Ping errored: unreachable")
        }
    }
}

/// A device whose label records which build and config it came from
struct FakeDevice {
    label: String,
    value: Shared<Option<String>>,
    polls: Shared<Vec<String>>,
    closed: Shared<Vec<String>>,
    open: bool,
}

#[async_trait]
impl DeviceClient for FakeDevice {
    fn name(&self) -> &str {
        &self.label
    }

    async fn get_data(&mut self) -> DeviceReading {
        self.polls.lock().unwrap().push(self.label.clone());
        match self.value.lock().unwrap().clone() {
            Some(value) => DeviceReading::ok(value, "(command run time    1.0 ms)"),
            None => DeviceReading::failed(format!("{} access errored", self.label)),
        }
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.closed.lock().unwrap().push(self.label.clone());
        }
    }
}

struct FakeExternalIp {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ExternalIpSource for FakeExternalIp {
    async fn get_external_wan_ip(&self) -> ExternalIpReading {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ExternalIpReading::found("198.51.100.1", "198.51.100.1     (command run time    2.0 ms)")
    }
}

/// Component factory handing out fakes wired to shared observation handles.
///
/// Device labels look like `Router#2@http://router.lan/`: device name, build
/// generation, then the configured status page.
#[derive(Clone, Default)]
pub struct Harness {
    pub reachability: Shared<VecDeque<bool>>,
    pub checks: Arc<AtomicUsize>,
    pub router_ip: Shared<Option<String>>,
    pub modem_state: Shared<Option<String>>,
    pub polls: Shared<Vec<String>>,
    pub closed: Shared<Vec<String>>,
    pub external_calls: Arc<AtomicUsize>,
    pub sent: Shared<Vec<(String, String)>>,
    pub builds: Arc<AtomicUsize>,
    pub fail_notifications: bool,
    /// While set, `build` fails as a bad status pattern would
    pub reject_builds: Arc<AtomicBool>,
}

impl Harness {
    pub fn script_reachability(&self, script: &[bool]) {
        self.reachability.lock().unwrap().extend(script.iter().copied());
    }

    pub fn set_router_ip(&self, ip: &str) {
        *self.router_ip.lock().unwrap() = Some(ip.to_string());
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn polls(&self) -> Vec<String> {
        self.polls.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }

    fn device(
        &self,
        name: &str,
        generation: usize,
        page: &str,
        value: &Shared<Option<String>>,
    ) -> Box<dyn DeviceClient> {
        Box::new(FakeDevice {
            label: format!("{name}#{generation}@{page}"),
            value: value.clone(),
            polls: self.polls.clone(),
            closed: self.closed.clone(),
            open: true,
        })
    }
}

impl ComponentFactory for Harness {
    fn build(&self, config: &Config) -> Result<Components> {
        if self.reject_builds.load(Ordering::SeqCst) {
            bail!("invalid regex for `router.status_re`");
        }
        let generation = self.builds.fetch_add(1, Ordering::SeqCst) + 1;

        let notifications = if self.fail_notifications {
            Notifications::new(vec![Box::new(FailingNotifier)])
        } else {
            Notifications::new(vec![Box::new(RecordingNotifier {
                sent: self.sent.clone(),
            })])
        };

        Ok(Components {
            checker: Box::new(ScriptedChecker {
                script: self.reachability.clone(),
                calls: self.checks.clone(),
            }),
            modem: config
                .modem
                .as_ref()
                .map(|m| self.device("Modem", generation, &m.status_page, &self.modem_state)),
            router: config
                .router
                .as_ref()
                .map(|r| self.device("Router", generation, &r.status_page, &self.router_ip)),
            external_ip: config.external_wan_ip.as_ref().map(|_| {
                Box::new(FakeExternalIp {
                    calls: self.external_calls.clone(),
                }) as Box<dyn ExternalIpSource>
            }),
            notifications,
        })
    }
}

/// Config source whose next reload is set by the test
#[derive(Clone, Default)]
pub struct ScriptedSource {
    pub pending: Shared<Option<Config>>,
    /// Makes the next reload report a broken file
    pub fail_next: Arc<AtomicBool>,
}

impl ConfigSource for ScriptedSource {
    fn reload_if_changed(&mut self) -> Result<Option<Config>, ConfigError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ConfigError::invalid("global.n_retries", "must be at least 1"));
        }
        Ok(self.pending.lock().unwrap().take())
    }
}
