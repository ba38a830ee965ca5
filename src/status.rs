/// Status reporting: the per-watchdog view served over HTTP and written to
/// `status.json` after every sample.
use crate::data_dir::write_atomic;
use crate::notify::{Notification, NotificationLog};
use crate::registry::Registry;
use crate::watchdog::{Action, Watchdog, WatchdogState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Status of one watchdog.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchdogStatus {
    pub interface: String,
    pub threshold: f64,
    pub current_state: WatchdogState,
    /// `"<exception_count> / <heartbeat>"`.
    pub exception_rate: String,
    pub failure_ratio: f64,
    pub state_history: Vec<String>,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_count: Option<u32>,
    pub problem_count: u32,
    pub problems_since_file_creation: u32,
    pub problems_in_last_session: u32,
}

impl WatchdogStatus {
    pub fn from_watchdog(watchdog: &Watchdog, heartbeat: u64) -> Self {
        let failure_ratio = if heartbeat == 0 {
            0.0
        } else {
            f64::from(watchdog.exception_count) / heartbeat as f64
        };
        Self {
            interface: watchdog.interface.clone(),
            threshold: watchdog.threshold,
            current_state: watchdog.state,
            exception_rate: format!("{} / {}", watchdog.exception_count, heartbeat),
            failure_ratio,
            state_history: watchdog
                .state_history
                .iter()
                .map(ToString::to_string)
                .collect(),
            action: watchdog.action,
            restart_count: watchdog.restart_count,
            problem_count: watchdog.problem_count,
            problems_since_file_creation: watchdog.problems_since_file_creation,
            problems_in_last_session: watchdog.problems_in_last_session,
        }
    }
}

/// Everything the status surfaces report, captured after a sample.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub pid: u32,
    pub plugin_status: String,
    pub heartbeat: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub watchdogs: BTreeMap<String, WatchdogStatus>,
    pub notifications: BTreeMap<String, Notification>,
}

impl StatusSnapshot {
    pub fn capture(registry: &Registry, notifications: &NotificationLog) -> Self {
        let heartbeat = registry.heartbeat();
        Self {
            pid: std::process::id(),
            plugin_status: registry.status().to_string(),
            heartbeat,
            last_update: Some(Utc::now()),
            watchdogs: registry
                .watchdogs()
                .iter()
                .map(|w| (w.name.clone(), WatchdogStatus::from_watchdog(w, heartbeat)))
                .collect(),
            notifications: notifications.latest().clone(),
        }
    }
}

/// Manages the status file lifecycle.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Atomically write the snapshot to the status file.
    pub fn write(&self, snapshot: &StatusSnapshot) -> Result<(), StatusError> {
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| StatusError::Serialize { source: e })?;
        write_atomic(&self.path, json.as_bytes()).map_err(|e| StatusError::Write {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Read back the last written status.
    pub fn read(&self) -> Result<serde_json::Value, StatusError> {
        let contents = std::fs::read_to_string(&self.path).map_err(|e| StatusError::Read {
            path: self.path.clone(),
            source: e,
        })?;
        serde_json::from_str(&contents).map_err(|e| StatusError::Serialize { source: e })
    }
}

/// Errors from status file operations.
#[derive(Debug)]
pub enum StatusError {
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusError::Serialize { source } => write!(f, "invalid status data: {source}"),
            StatusError::Write { path, source } => {
                write!(f, "failed to write status file {}: {source}", path.display())
            }
            StatusError::Read { path, source } => {
                write!(f, "failed to read status file {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatusError::Serialize { source } => Some(source),
            StatusError::Write { source, .. } => Some(source),
            StatusError::Read { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpoint;
    use crate::config::WatchdogEntry;
    use crate::notify::NotificationSink;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn registry() -> Registry {
        Registry::build(
            &[
                WatchdogEntry {
                    interface: Some("can0".to_string()),
                    threshold: Some(1.0),
                    ..Default::default()
                },
                WatchdogEntry {
                    interface: Some("nmea".to_string()),
                    ..Default::default()
                },
            ],
            "p",
            &Checkpoint::default(),
        )
    }

    #[test]
    fn test_snapshot_reports_rate_and_history() {
        let mut registry = registry();
        let mut log = NotificationLog::new();
        registry.start(&mut log);
        let mut samples = HashMap::new();
        samples.insert("nmea".to_string(), 4.0);
        for _ in 0..4 {
            registry.on_sample(&samples, &mut log);
        }

        let snapshot = StatusSnapshot::capture(&registry, &log);
        assert_eq!(snapshot.heartbeat, 4);
        assert_eq!(snapshot.plugin_status, "watching interfaces can0, nmea");

        let can0 = &snapshot.watchdogs["can0-0"];
        assert_eq!(can0.current_state, WatchdogState::Problem);
        assert_eq!(can0.exception_rate, "4 / 4");
        assert_eq!(can0.failure_ratio, 1.0);
        assert_eq!(can0.threshold, 1.0);
        assert_eq!(can0.problem_count, 2);
        assert_eq!(can0.state_history.len(), 2);
        assert!(can0.state_history[1].ends_with(" 3 3 problem"));

        let nmea = &snapshot.watchdogs["nmea-0"];
        assert_eq!(nmea.current_state, WatchdogState::Normal);
        assert_eq!(nmea.exception_rate, "0 / 4");
        assert_eq!(nmea.failure_ratio, 0.0);

        assert_eq!(snapshot.notifications.len(), 2);
    }

    #[test]
    fn test_ratio_before_first_sample_is_zero() {
        let registry = registry();
        let snapshot = StatusSnapshot::capture(&registry, &NotificationLog::new());
        assert_eq!(snapshot.watchdogs["can0-0"].failure_ratio, 0.0);
        assert_eq!(snapshot.watchdogs["can0-0"].exception_rate, "0 / 0");
    }

    #[test]
    fn test_status_json_uses_camel_case() {
        let registry = registry();
        let mut log = NotificationLog::new();
        log.notify(
            "notifications.plugins.p.watchdogs.can0-0",
            Notification::new(crate::notify::NotificationState::Alert, "hello"),
        );
        let snapshot = StatusSnapshot::capture(&registry, &log);
        let value = serde_json::to_value(&snapshot).unwrap();
        let can0 = &value["watchdogs"]["can0-0"];
        assert_eq!(can0["interface"], "can0");
        assert_eq!(can0["currentState"], "starting");
        assert_eq!(can0["action"], "none");
        assert!(can0.get("restartCount").is_none());
        assert!(can0["stateHistory"].is_array());
        assert_eq!(value["pluginStatus"], "watching interfaces can0, nmea");
        assert_eq!(
            value["notifications"]["notifications.plugins.p.watchdogs.can0-0"]["state"],
            "alert"
        );
    }

    #[test]
    fn test_status_file_write_and_read() {
        let dir = tempdir().unwrap();
        let sf = StatusFile::new(dir.path().join("status.json"));
        let snapshot = StatusSnapshot::capture(&registry(), &NotificationLog::new());

        sf.write(&snapshot).unwrap();
        let value = sf.read().unwrap();
        assert_eq!(value["heartbeat"], 0);
        assert_eq!(value["pid"], std::process::id());
    }

    #[test]
    fn test_status_file_read_missing_fails() {
        let dir = tempdir().unwrap();
        let sf = StatusFile::new(dir.path().join("status.json"));
        let err = sf.read().unwrap_err();
        assert!(matches!(err, StatusError::Read { .. }));
        assert!(err.to_string().contains("failed to read status file"));
    }
}
