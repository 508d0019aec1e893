//! HTTP client with timeouts and optional cookie support
//!
//! Device admin pages answer logged-out clients with error pages (403, CSRF
//! errors) whose text is what tells us to log in, so non-2xx responses are
//! returned to the caller instead of being turned into errors.

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A fetched page
#[derive(Debug, Clone)]
pub struct Page {
    pub status: StatusCode,
    pub body: String,
}

pub struct HttpClient {
    inner: Client,
    accepts_invalid_certs: bool,
}

impl HttpClient {
    /// Client for a LAN device admin page: keeps cookies between requests and
    /// accepts the self-signed certificates home routers and modems serve
    pub fn with_session(timeout: Duration) -> Result<Self> {
        Self::build(timeout, true)
    }

    /// Client for public pages: no cookie store, certificates verified
    pub fn stateless(timeout: Duration) -> Result<Self> {
        Self::build(timeout, false)
    }

    pub fn accepts_invalid_certs(&self) -> bool {
        self.accepts_invalid_certs
    }

    fn build(timeout: Duration, device: bool) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0 (X11; Linux x86_64) Chrome/120.0"),
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .cookie_store(device)
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .default_headers(headers)
            .danger_accept_invalid_certs(device)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner: client,
            accepts_invalid_certs: device,
        })
    }

    pub async fn get(&self, url: &str) -> Result<Page> {
        let resp = self
            .inner
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;
        Self::read(url, resp).await
    }

    pub async fn post_form<T>(&self, url: &str, form: &T) -> Result<Page>
    where
        T: serde::Serialize + ?Sized,
    {
        let resp = self
            .inner
            .post(url)
            .form(form)
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;
        Self::read(url, resp).await
    }

    async fn read(url: &str, resp: reqwest::Response) -> Result<Page> {
        let status = resp.status();
        if !status.is_success() {
            tracing::debug!("{} answered {}", url, status);
        }
        let body = resp
            .text()
            .await
            .with_context(|| format!("Failed to read body from {url}"))?;
        Ok(Page { status, body })
    }
}
