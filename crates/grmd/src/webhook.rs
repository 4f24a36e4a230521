//! Webhook notification transport.
//!
//! POSTs `{channel, destination, message}` as JSON. Any transport
//! error or non-2xx response is a delivery failure: the core leaves
//! the issue's flag unset and retries on the next scheduled run.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use grm_core::error::GrmError;
use grm_core::notify::{Channel, Notifier};

pub struct WebhookNotifier {
    client: reqwest::blocking::Client,
    url: String,
}

#[derive(Serialize)]
struct Payload<'a> {
    channel: Channel,
    destination: &'a str,
    message: &'a str,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build webhook HTTP client")?;
        Ok(Self { client, url })
    }
}

impl Notifier for WebhookNotifier {
    fn send(&self, channel: Channel, destination: &str, message: &str) -> Result<(), GrmError> {
        let response = self
            .client
            .post(&self.url)
            .json(&Payload {
                channel,
                destination,
                message,
            })
            .send()
            .map_err(|e| GrmError::NotificationFailed {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(GrmError::NotificationFailed {
                channel: channel.to_string(),
                reason: format!("webhook returned {}", response.status()),
            })
        }
    }
}

/// Stand-in transport when no webhook is configured. The notification
/// job is not scheduled in that case; this exists so the other jobs
/// can still build a [`grm_core::reconcile::JobContext`].
pub struct DisabledNotifier;

impl Notifier for DisabledNotifier {
    fn send(&self, channel: Channel, _destination: &str, _message: &str) -> Result<(), GrmError> {
        Err(GrmError::NotificationFailed {
            channel: channel.to_string(),
            reason: "notification transport not configured".into(),
        })
    }
}
