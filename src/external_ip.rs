//! WAN IP as seen from outside, via a third-party "what is my IP" page

use crate::config::ExternalIpConfig;
use crate::http::HttpClient;
use crate::models::ExternalIpReading;
use crate::parser::Extractor;
use crate::retry::RetryPolicy;
use anyhow::Result;
use async_trait::async_trait;
use std::time::{Duration, Instant};

#[async_trait]
pub trait ExternalIpSource: Send + Sync {
    async fn get_external_wan_ip(&self) -> ExternalIpReading;
}

/// Single GET plus regex; keeps no cookies or other state between calls
pub struct ExternalIpClient {
    url: String,
    extractor: Extractor,
    client: HttpClient,
    retry: RetryPolicy,
}

impl ExternalIpClient {
    pub fn new(config: &ExternalIpConfig, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            url: config.url.clone(),
            extractor: Extractor::new("external_wan_ip.re", &config.re)?,
            client: HttpClient::stateless(config.timeout)?,
            retry,
        })
    }

    async fn fetch(&self) -> Result<(Option<String>, Duration)> {
        let started = Instant::now();
        let page = self.client.get(&self.url).await?;
        let elapsed = started.elapsed();
        Ok((self.extractor.extract(&page.body), elapsed))
    }
}

#[async_trait]
impl ExternalIpSource for ExternalIpClient {
    async fn get_external_wan_ip(&self) -> ExternalIpReading {
        let mut retry = self.retry.start(format!(
            "Invalid web page response from external webpage {}",
            self.url
        ));

        while let Some(attempt) = retry.next_attempt() {
            tracing::debug!("External WAN IP page try {}", attempt);
            match self.fetch().await {
                Ok((Some(ip), elapsed)) => {
                    let run_ms = elapsed.as_secs_f64() * 1000.0;
                    let message = format!("{ip:<16} (command run time {run_ms:6.1} ms)");
                    return ExternalIpReading::found(ip, message);
                }
                Ok((None, _)) => {}
                Err(e) => {
                    retry.record(format!("Checking external WAN IP page errored: {e:#}"))
                }
            }
        }

        ExternalIpReading::failed(retry.into_last_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ExternalIpClient {
        let cfg = ExternalIpConfig {
            url: format!("{}/ip", server.uri()),
            re: r"Current IP Address: ([\d.]+)".to_string(),
            timeout: Duration::from_secs(2),
        };
        ExternalIpClient::new(&cfg, RetryPolicy::new(2)).unwrap()
    }

    #[tokio::test]
    async fn test_reports_ip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ip"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><body>Current IP Address: 198.51.100.23</body></html>",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let reading = client(&server).get_external_wan_ip().await;

        assert!(reading.ok, "{}", reading.message);
        assert_eq!(reading.ip.as_deref(), Some("198.51.100.23"));
        assert!(reading.message.starts_with("198.51.100.23"));
        assert!(reading.message.contains("command run time"));
    }

    #[tokio::test]
    async fn test_public_page_certificates_verified() {
        let server = MockServer::start().await;
        assert!(!client(&server).client.accepts_invalid_certs());
    }

    #[tokio::test]
    async fn test_unmatched_page_exhausts_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ip"))
            .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
            .expect(2)
            .mount(&server)
            .await;

        let reading = client(&server).get_external_wan_ip().await;

        assert!(!reading.ok);
        assert!(reading.ip.is_none());
        assert!(reading.message.contains("Invalid web page response"));
    }

    #[tokio::test]
    async fn test_transport_error_reported() {
        let cfg = ExternalIpConfig {
            url: "http://127.0.0.1:1/ip".to_string(),
            re: r"([\d.]+)".to_string(),
            timeout: Duration::from_secs(1),
        };
        let reading = ExternalIpClient::new(&cfg, RetryPolicy::new(1))
            .unwrap()
            .get_external_wan_ip()
            .await;

        assert!(!reading.ok);
        assert!(reading.message.contains("errored"));
    }
}
