/// Notification delivery: the seam between watchdog transitions and whatever
/// channel the host uses to surface alerts.
use serde::Serialize;
use std::collections::BTreeMap;

/// Severity attached to a notification, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationState {
    Normal,
    Alert,
    Warn,
    Alarm,
}

/// A single notification addressed to a watchdog's notification path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub state: NotificationState,
    pub message: String,
}

impl Notification {
    pub fn new(state: NotificationState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
        }
    }
}

/// Receives notifications raised by watchdogs.
///
/// Calls happen synchronously inside a tick; implementations must not block.
pub trait NotificationSink {
    fn notify(&mut self, path: &str, notification: Notification);
}

/// Sink that logs every notification and remembers the latest one per path.
#[derive(Debug, Default)]
pub struct NotificationLog {
    latest: BTreeMap<String, Notification>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest notification per path, ordered by path.
    pub fn latest(&self) -> &BTreeMap<String, Notification> {
        &self.latest
    }
}

impl NotificationSink for NotificationLog {
    fn notify(&mut self, path: &str, notification: Notification) {
        match notification.state {
            NotificationState::Normal | NotificationState::Alert => {
                tracing::info!(path, state = ?notification.state, "{}", notification.message)
            }
            NotificationState::Warn => {
                tracing::warn!(path, "{}", notification.message)
            }
            NotificationState::Alarm => {
                tracing::error!(path, "{}", notification.message)
            }
        }
        self.latest.insert(path.to_string(), notification);
    }
}

/// Test sink recording every notification in delivery order.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub sent: Vec<(String, Notification)>,
}

#[cfg(test)]
impl NotificationSink for RecordingSink {
    fn notify(&mut self, path: &str, notification: Notification) {
        self.sent.push((path.to_string(), notification));
    }
}
