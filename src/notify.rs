//! Notification delivery
//!
//! Delivery is best effort: a sink that fails is logged and skipped, and
//! nothing here can stop the service loop.

use crate::config::NotifyConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, subject: &str, body: &str) -> Result<()>;
}

/// POSTs `{"subject": .., "body": ..}` to a URL
pub struct WebhookNotifier {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .context("Failed to build webhook client")?;
        Ok(Self {
            name: format!("webhook <{url}>"),
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, subject: &str, body: &str) -> Result<()> {
        let payload = serde_json::json!({
            "subject": subject,
            "body": body,
        });

        let resp = self.client.post(&self.url).json(&payload).send().await?;
        let status = resp.status();
        if !status.is_success() {
            bail!("webhook answered {}", status);
        }
        Ok(())
    }
}

/// Pipes a plain-text message into a sendmail-compatible command (`<mailer> -t`)
pub struct MailCommandNotifier {
    mailer: String,
    to: Vec<String>,
}

impl MailCommandNotifier {
    pub fn new(mailer: &str, to: Vec<String>) -> Self {
        Self {
            mailer: mailer.to_string(),
            to,
        }
    }

    fn message(&self, subject: &str, body: &str) -> String {
        format!(
            "To: {}\nSubject: {}\nContent-Type: text/plain; charset=utf-8\n\n{}\n",
            self.to.join(", "),
            subject,
            body
        )
    }
}

#[async_trait]
impl Notifier for MailCommandNotifier {
    fn name(&self) -> &str {
        "email"
    }

    async fn notify(&self, subject: &str, body: &str) -> Result<()> {
        let mut child = Command::new(&self.mailer)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to run {}", self.mailer))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(self.message(subject, body).as_bytes())
                .await
                .context("failed to write message to mailer")?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.mailer,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// All configured sinks
#[derive(Default)]
pub struct Notifications {
    sinks: Vec<Box<dyn Notifier>>,
}

impl Notifications {
    pub fn new(sinks: Vec<Box<dyn Notifier>>) -> Self {
        Self { sinks }
    }

    pub fn from_config(config: &NotifyConfig) -> Result<Self> {
        let mut sinks: Vec<Box<dyn Notifier>> = Vec::new();
        for url in &config.notif_list {
            sinks.push(Box::new(WebhookNotifier::new(url)?));
        }
        if !config.email_to.is_empty() {
            sinks.push(Box::new(MailCommandNotifier::new(
                &config.mailer,
                config.email_to.clone(),
            )));
        }
        Ok(Self::new(sinks))
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Deliver to every sink; failures are logged, never returned
    pub async fn send(&self, subject: &str, body: &str) {
        if self.sinks.is_empty() {
            tracing::warn!("{} - {}", subject, body);
            return;
        }

        for sink in &self.sinks {
            match sink.notify(subject, body).await {
                Ok(()) => tracing::info!("Sent <{}> via {}", subject, sink.name()),
                Err(e) => tracing::warn!("{} error for <{}>: {:#}", sink.name(), subject, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingNotifier, RecordingNotifier};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_webhook_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json(serde_json::json!({
                "subject": "NOTICE:  HOME WAN IP CHANGED",
                "body": "New WAN IP: <5.6.7.8>, Prior WAN IP: <1.2.3.4>.",
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let hook = WebhookNotifier::new(&format!("{}/hook", server.uri())).unwrap();
        hook.notify(
            "NOTICE:  HOME WAN IP CHANGED",
            "New WAN IP: <5.6.7.8>, Prior WAN IP: <1.2.3.4>.",
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_webhook_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let hook = WebhookNotifier::new(&server.uri()).unwrap();
        assert!(hook.notify("s", "b").await.is_err());
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_stop_others() {
        let recorder = RecordingNotifier::default();
        let sent = recorder.sent.clone();
        let notifications =
            Notifications::new(vec![Box::new(FailingNotifier), Box::new(recorder)]);

        notifications.send("subject", "body").await;

        assert_eq!(
            *sent.lock().unwrap(),
            vec![("subject".to_string(), "body".to_string())]
        );
    }

    #[test]
    fn test_from_config_builds_sinks() {
        let cfg = NotifyConfig {
            notif_list: vec!["http://hooks.local/a".to_string()],
            email_to: vec!["me@example.com".to_string()],
            mailer: "sendmail".to_string(),
        };
        let notifications = Notifications::from_config(&cfg).unwrap();
        assert_eq!(notifications.sinks.len(), 2);
        assert!(Notifications::from_config(&NotifyConfig::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_mail_message_headers() {
        let mail = MailCommandNotifier::new(
            "sendmail",
            vec!["a@example.com".to_string(), "b@example.com".to_string()],
        );
        let msg = mail.message("Subj", "Body");
        assert!(msg.starts_with("To: a@example.com, b@example.com\nSubject: Subj\n"));
        assert!(msg.ends_with("\n\nBody\n"));
    }
}
