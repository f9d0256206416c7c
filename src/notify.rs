//! Operator notifications
//!
//! Delivery is best-effort: a failed notification is logged and never turns a
//! successful (or already failed) operation into a different outcome.

use std::time::Duration;

use serde::Serialize;

use crate::config::settings::NotifierSettings;
use crate::error::{StackError, StackResult};

/// Sends a short message somewhere an operator will see it
pub trait Notifier {
    fn send(&self, subject: &str, body: &str) -> StackResult<()>;
}

/// Send and swallow any failure
pub fn notify_best_effort(notifier: &dyn Notifier, subject: &str, body: &str) {
    if let Err(e) = notifier.send(subject, body) {
        tracing::warn!(subject, error = %e, "notification failed");
    }
}

/// Drops every message (no notifier configured)
#[derive(Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn send(&self, subject: &str, _body: &str) -> StackResult<()> {
        tracing::debug!(subject, "no notifier configured; message dropped");
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    body: &'a str,
    host: &'a str,
}

/// Posts `{"subject", "body", "host"}` as JSON to a webhook
pub struct WebhookNotifier {
    url: String,
    host: String,
    client: reqwest::blocking::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, host: impl Into<String>) -> StackResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| StackError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            url: url.into(),
            host: host.into(),
            client,
        })
    }
}

impl Notifier for WebhookNotifier {
    fn send(&self, subject: &str, body: &str) -> StackResult<()> {
        let payload = WebhookPayload {
            subject,
            body,
            host: &self.host,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .map_err(|e| StackError::Service(format!("Webhook request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(StackError::Service(format!(
                "Webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Build the notifier described by the settings
pub fn from_settings(settings: &NotifierSettings, host: &str) -> Box<dyn Notifier> {
    match &settings.webhook_url {
        Some(url) => match WebhookNotifier::new(url.clone(), host) {
            Ok(notifier) => Box::new(notifier),
            Err(e) => {
                tracing::warn!(error = %e, "webhook notifier unavailable; notifications disabled");
                Box::new(NullNotifier)
            }
        },
        None => Box::new(NullNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        fn send(&self, _subject: &str, _body: &str) -> StackResult<()> {
            Err(StackError::Service("smtp down".into()))
        }
    }

    #[test]
    fn test_best_effort_swallows_failures() {
        notify_best_effort(&FailingNotifier, "subject", "body");
    }

    #[test]
    fn test_unreachable_webhook_is_error_not_panic() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook", "host-a").unwrap();
        assert!(notifier.send("s", "b").is_err());
    }

    #[test]
    fn test_from_settings_without_url() {
        let notifier = from_settings(&NotifierSettings::default(), "host-a");
        assert!(notifier.send("s", "b").is_ok());
    }
}
