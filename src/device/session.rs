//! Stateful HTML admin page session for one router or modem
//!
//! The session keeps its cookies and a form payload between calls. The
//! payload starts with the configured credentials and extra fields; when one
//! of those fields is an anti-forgery token, every page the device returns is
//! searched for a fresh token and the payload updated before the next POST.

use crate::config::DeviceConfig;
use crate::device::{DeviceClient, DeviceKind};
use crate::http::{HttpClient, Page};
use crate::models::DeviceReading;
use crate::parser::{self, Extractor};
use crate::retry::RetryPolicy;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Ordered form fields posted to the device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormPayload {
    fields: Vec<(String, String)>,
}

impl FormPayload {
    /// Replace the value of `key`, or append it
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.fields.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn as_slice(&self) -> &[(String, String)] {
        &self.fields
    }
}

/// Token tracking state for devices that expect a CSRF field echoed back
#[derive(Debug)]
struct CsrfTracking {
    key: String,
    extractor: Extractor,
}

pub struct DeviceSession {
    name: String,
    config: DeviceConfig,
    client: Option<HttpClient>,
    payload: FormPayload,
    csrf: Option<CsrfTracking>,
    status: Extractor,
    retry: RetryPolicy,
}

impl DeviceSession {
    /// Build a session from config; fails if a configured pattern is invalid
    pub fn new(kind: DeviceKind, config: DeviceConfig, retry: RetryPolicy) -> Result<Self> {
        let key = kind.to_string().to_lowercase();
        let status = Extractor::spanning(&format!("{key}.status_re"), &config.status_re)?;

        let mut payload = FormPayload::default();
        if let Some(field) = &config.username_field {
            payload.set(field, config.username.clone());
            payload.set(&config.password_field, config.password.clone());
        }

        let mut csrf_key = None;
        for (field, value) in parser::parse_form_fields(&config.additional_keys) {
            if field.to_lowercase().contains("csrf") {
                csrf_key = Some(field.clone());
            }
            payload.set(&field, value);
        }

        let csrf = match csrf_key {
            Some(field) => Some(CsrfTracking {
                key: field,
                extractor: Extractor::new(&format!("{key}.csrf_re"), &config.csrf_re)?,
            }),
            None => None,
        };

        let client = HttpClient::with_session(config.timeout)?;

        tracing::debug!(
            "{} session created for {} (csrf mode: {})",
            kind,
            config.status_page,
            csrf.is_some()
        );

        Ok(Self {
            name: kind.to_string(),
            config,
            client: Some(client),
            payload,
            csrf,
            status,
            retry,
        })
    }

    pub fn is_csrf_mode(&self) -> bool {
        self.csrf.is_some()
    }

    pub fn payload(&self) -> &FormPayload {
        &self.payload
    }

    fn client(&self) -> Result<&HttpClient> {
        self.client
            .as_ref()
            .with_context(|| format!("{} session is closed", self.name))
    }

    /// GET the status page, or POST the payload to it in CSRF mode
    async fn fetch_status(&mut self) -> Result<Page> {
        let client = self.client()?;
        if self.csrf.is_none() {
            return client.get(&self.config.status_page).await;
        }

        let page = client
            .post_form(&self.config.status_page, self.payload.as_slice())
            .await?;
        self.update_csrf(&page.body);
        Ok(page)
    }

    async fn login(&mut self) -> Result<()> {
        tracing::debug!("{} login executed", self.name);
        let Some(login_page) = self.config.login_page.as_deref() else {
            return Ok(());
        };

        let page = self
            .client()?
            .post_form(login_page, self.payload.as_slice())
            .await?;
        tracing::debug!("{} login page answered {}", self.name, page.status);
        self.update_csrf(&page.body);
        Ok(())
    }

    fn update_csrf(&mut self, body: &str) {
        let Some(csrf) = &self.csrf else { return };
        match csrf.extractor.extract(body) {
            Some(token) => {
                let key = csrf.key.clone();
                self.payload.set(&key, token);
            }
            // Keep the previous token and let the device decide
            None => tracing::warn!("No csrf response from the {}", self.name),
        }
    }

    fn login_required(&self, body: &str) -> bool {
        self.config
            .login_required_text
            .as_deref()
            .is_some_and(|marker| !marker.is_empty() && body.contains(marker))
    }

    /// One attempt: fetch, log in if asked to, fetch again, extract
    async fn attempt(&mut self) -> Result<(Option<String>, Duration)> {
        let started = Instant::now();
        let mut page = self.fetch_status().await?;
        let mut elapsed = started.elapsed();

        if self.login_required(&page.body) {
            self.login().await?;
            let started = Instant::now();
            page = self.fetch_status().await?;
            elapsed = started.elapsed();
        }

        Ok((self.status.extract(&page.body), elapsed))
    }
}

#[async_trait]
impl DeviceClient for DeviceSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_data(&mut self) -> DeviceReading {
        let mut retry = self
            .retry
            .start(format!("Invalid web page response from {}", self.name));

        while let Some(attempt) = retry.next_attempt() {
            tracing::debug!("{} try {}", self.name, attempt);
            match self.attempt().await {
                Ok((Some(value), elapsed)) => {
                    let run_ms = elapsed.as_secs_f64() * 1000.0;
                    return DeviceReading::ok(value, format!("(command run time {run_ms:6.1} ms)"));
                }
                // No match is retried like a transient error but leaves the message alone
                Ok((None, _)) => {
                    tracing::debug!("{} status page did not match the status pattern", self.name)
                }
                Err(e) => retry.record(format!("{} access errored: {e:#}", self.name)),
            }
        }

        DeviceReading::failed(retry.into_last_error())
    }

    fn close(&mut self) {
        if self.client.take().is_some() {
            tracing::debug!("{} session closed", self.name);
        }
    }
}
