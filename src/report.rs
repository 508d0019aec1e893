//! Fixed-width status lines and the run-once status report

use crate::supervisor::Components;
use std::fmt;

/// Column width of the label ("Internet access:", "Modem status:", ...)
pub const LABEL_WIDTH: usize = 28;
/// Column width of the value ("Working", an IP address, a link state)
pub const VALUE_WIDTH: usize = 16;

pub fn status_line(label: &str, value: &str, detail: &str) -> String {
    format!("{label:<LABEL_WIDTH$} {value:<VALUE_WIDTH$} {detail}")
        .trim_end()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLine {
    pub healthy: bool,
    pub text: String,
}

/// One pass over every configured check, as printed by a one-shot run
#[derive(Debug, Default)]
pub struct StatusReport {
    pub lines: Vec<ReportLine>,
}

impl StatusReport {
    pub async fn collect(components: &mut Components, saved_wan_ip: &str) -> Self {
        let mut report = Self::default();

        let access = components.checker.check().await;
        let state = if access.up { "Working" } else { "NONE" };
        report.push(access.up, status_line("Internet access:", state, &access.message));

        if let Some(modem) = components.modem.as_mut() {
            let reading = modem.get_data().await;
            report.push(
                reading.ok,
                status_line("Modem status:", &reading.value, &reading.message),
            );
        }

        if let Some(router) = components.router.as_mut() {
            let reading = router.get_data().await;
            if reading.ok {
                report.push(
                    true,
                    status_line("Router reported WAN IP:", &reading.value, &reading.message),
                );
                if reading.value != saved_wan_ip {
                    report.push(true, status_line("Prior stored WAN IP:", saved_wan_ip, ""));
                }
            } else {
                report.push(
                    false,
                    format!("Failed getting WAN IP address from router: {}", reading.message),
                );
            }
        }

        if let Some(external) = components.external_ip.as_ref() {
            let reading = external.get_external_wan_ip().await;
            if reading.ok {
                report.push(true, status_line("Externally reported WAN IP:", &reading.message, ""));
            } else {
                report.push(
                    false,
                    format!("Failed getting externally reported WAN IP: {}", reading.message),
                );
            }
        }

        report
    }

    fn push(&mut self, healthy: bool, text: String) {
        self.lines.push(ReportLine { healthy, text });
    }

    pub fn is_healthy(&self) -> bool {
        self.lines.iter().all(|l| l.healthy)
    }

    /// Healthy lines at info, the rest at warn
    pub fn log(&self) {
        for line in &self.lines {
            if line.healthy {
                tracing::info!("{}", line.text);
            } else {
                tracing::warn!("{}", line.text);
            }
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line.text)?;
        }
        Ok(())
    }
}
