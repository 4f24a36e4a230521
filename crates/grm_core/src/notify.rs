//! Notification contract: the core only needs "send this message to
//! this destination over this channel" with a boolean outcome. The
//! transport mechanics (SMS gateway, SMTP) live outside the core.

use std::sync::Mutex;

use serde::Serialize;

use crate::error::GrmError;
use crate::model::{ContactChannel, Issue};

/// Delivery channel of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Email,
}

impl Channel {
    /// Transport for a stored contact type; `None` when the type has
    /// no transport (anything besides phone and email).
    pub fn for_contact(contact: &ContactChannel) -> Option<Channel> {
        match contact {
            ContactChannel::PhoneNumber => Some(Channel::Sms),
            ContactChannel::Email => Some(Channel::Email),
            ContactChannel::Other(_) => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Sms => write!(f, "sms"),
            Channel::Email => write!(f, "email"),
        }
    }
}

/// The three once-only notification events of an issue's lifecycle,
/// each backed by a boolean flag on the issue document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    /// Issue confirmed and open for processing.
    Accepted,
    /// Issue rejected.
    Rejected,
    /// Issue reached a final status.
    Closed,
}

impl NotificationEvent {
    pub fn all() -> [NotificationEvent; 3] {
        [
            NotificationEvent::Accepted,
            NotificationEvent::Rejected,
            NotificationEvent::Closed,
        ]
    }
}

/// Citizen-facing message for an event, using the tracking code when
/// the issue already has one.
pub fn message_for(event: NotificationEvent, issue: &Issue) -> String {
    let code = issue
        .internal_code
        .as_deref()
        .filter(|c| !c.is_empty())
        .unwrap_or(issue.id.as_str());
    match event {
        NotificationEvent::Accepted => format!(
            "Your grievance {code} has been received and is being processed."
        ),
        NotificationEvent::Rejected => format!(
            "Your grievance {code} could not be accepted. Please contact your local office for details."
        ),
        NotificationEvent::Closed => {
            format!("Your grievance {code} has been resolved and is now closed.")
        }
    }
}

/// Outbound notification transport.
pub trait Notifier {
    /// Returns `Ok(())` only on confirmed delivery; any failure means
    /// the caller must not mark the event as sent.
    fn send(&self, channel: Channel, destination: &str, message: &str) -> Result<(), GrmError>;
}

/// In-memory transport that records every send. Used in tests and as a
/// dry-run transport.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Channel, String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(Channel, String, String)> {
        self.sent.lock().expect("notifier lock poisoned").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, channel: Channel, destination: &str, message: &str) -> Result<(), GrmError> {
        let mut sent = self.sent.lock().expect("notifier lock poisoned");
        sent.push((channel, destination.to_string(), message.to_string()));
        Ok(())
    }
}

/// Transport that refuses every delivery. Used in tests for the
/// retry-on-next-run path.
#[derive(Debug, Default)]
pub struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn send(&self, channel: Channel, _destination: &str, _message: &str) -> Result<(), GrmError> {
        Err(GrmError::NotificationFailed {
            channel: channel.to_string(),
            reason: "transport unavailable".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::confirmed_issue;

    #[test]
    fn test_channel_mapping() {
        assert_eq!(
            Channel::for_contact(&ContactChannel::PhoneNumber),
            Some(Channel::Sms)
        );
        assert_eq!(
            Channel::for_contact(&ContactChannel::Email),
            Some(Channel::Email)
        );
        assert_eq!(
            Channel::for_contact(&ContactChannel::Other("whatsapp".into())),
            None
        );
    }

    #[test]
    fn test_message_prefers_internal_code() {
        let mut issue = confirmed_issue("i-1");
        let message = message_for(NotificationEvent::Accepted, &issue);
        assert!(message.contains("i-1"));

        issue.internal_code = Some("WTR-c1-42".into());
        let message = message_for(NotificationEvent::Closed, &issue);
        assert!(message.contains("WTR-c1-42"));
        assert!(!message.contains("i-1 "));
    }
}
