/// Restart checkpoint: the few per-watchdog counters that must survive the
/// process exit a `restart-server` action causes.
///
/// The file is read once at startup and replaced wholesale before every
/// restart-triggering exit and on shutdown. Per-session counters and state
/// history are not persisted.
use crate::data_dir::write_atomic;
use crate::watchdog::Watchdog;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Persisted counters for one watchdog, keyed by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointEntry {
    pub name: String,
    #[serde(default)]
    pub problems_in_last_session: u32,
    #[serde(default)]
    pub problems_since_file_creation: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_count: Option<u32>,
}

impl CheckpointEntry {
    fn from_watchdog(watchdog: &Watchdog) -> Self {
        Self {
            name: watchdog.name.clone(),
            problems_in_last_session: watchdog.problems_since_last_restart,
            problems_since_file_creation: watchdog.problems_since_file_creation,
            restart_count: watchdog.restart_count,
        }
    }
}

/// The checkpoint file contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    #[serde(default)]
    pub file_created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub watchdogs: Vec<CheckpointEntry>,
}

impl Checkpoint {
    /// The entry recorded for `name`. When the file lists a name more than
    /// once the last occurrence wins.
    pub fn entry(&self, name: &str) -> Option<&CheckpointEntry> {
        self.watchdogs.iter().rev().find(|e| e.name == name)
    }
}

/// Reads and writes the checkpoint file.
pub struct CheckpointStore {
    path: PathBuf,
    file_created: Option<DateTime<Utc>>,
}

impl CheckpointStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file_created: None,
        }
    }

    /// Load the checkpoint, falling back to an empty one when the file is
    /// missing, unreadable or malformed. Never fails.
    pub fn load(&mut self) -> Checkpoint {
        let checkpoint = match std::fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str::<Checkpoint>(&contents) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        path = %self.path.display(),
                        "ignoring malformed checkpoint"
                    );
                    Checkpoint::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no checkpoint found");
                Checkpoint::default()
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %self.path.display(),
                    "failed to read checkpoint"
                );
                Checkpoint::default()
            }
        };
        self.file_created = checkpoint.file_created;
        checkpoint
    }

    /// Atomically replace the checkpoint with the counters of `watchdogs`.
    pub fn save(&mut self, watchdogs: &[Watchdog]) -> Result<(), CheckpointError> {
        let file_created = *self.file_created.get_or_insert_with(Utc::now);
        let checkpoint = Checkpoint {
            file_created: Some(file_created),
            watchdogs: watchdogs.iter().map(CheckpointEntry::from_watchdog).collect(),
        };
        let json = serde_json::to_string_pretty(&checkpoint)
            .map_err(|e| CheckpointError::Serialize { source: e })?;

        write_atomic(&self.path, json.as_bytes()).map_err(|e| CheckpointError::Write {
            path: self.path.clone(),
            source: e,
        })?;

        tracing::debug!(
            path = %self.path.display(),
            watchdogs = checkpoint.watchdogs.len(),
            "checkpoint written"
        );
        Ok(())
    }
}

/// Errors from checkpoint writes.
#[derive(Debug)]
pub enum CheckpointError {
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointError::Serialize { source } => {
                write!(f, "failed to serialize checkpoint: {source}")
            }
            CheckpointError::Write { path, source } => {
                write!(f, "failed to write checkpoint {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for CheckpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CheckpointError::Serialize { source } => Some(source),
            CheckpointError::Write { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchdog::{Action, WatchdogSpec};
    use tempfile::tempdir;

    fn watchdog(name: &str) -> Watchdog {
        Watchdog::new(
            WatchdogSpec {
                name: name.to_string(),
                interface: "can0".to_string(),
                threshold: 0.0,
                start_action_threshold: 3,
                stop_action_threshold: 6,
                action: Action::RestartServer,
                notification_path: format!("notifications.test.{name}"),
            },
            None,
        )
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let mut store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        let checkpoint = store.load();
        assert_eq!(checkpoint, Checkpoint::default());
    }

    #[test]
    fn test_malformed_file_loads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, "{not json").unwrap();
        let mut store = CheckpointStore::new(path);
        assert!(store.load().watchdogs.is_empty());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let mut wd = watchdog("can0");
        wd.problems_since_file_creation = 7;
        wd.problems_since_last_restart = 2;
        wd.restart_count = Some(2);
        let mut idle = watchdog("nmea");
        idle.problems_since_file_creation = 1;

        let mut store = CheckpointStore::new(path.clone());
        store.save(&[wd, idle]).unwrap();

        let mut reloaded = CheckpointStore::new(path);
        let checkpoint = reloaded.load();
        assert!(checkpoint.file_created.is_some());
        let entry = checkpoint.entry("can0").unwrap();
        assert_eq!(entry.problems_since_file_creation, 7);
        assert_eq!(entry.problems_in_last_session, 2);
        assert_eq!(entry.restart_count, Some(2));
        assert_eq!(checkpoint.entry("nmea").unwrap().restart_count, None);
        assert!(checkpoint.entry("missing").is_none());
    }

    #[test]
    fn test_absent_restart_count_is_omitted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let mut store = CheckpointStore::new(path.clone());
        store.save(&[watchdog("can0")]).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let entry = &parsed["watchdogs"][0];
        assert_eq!(entry["name"], "can0");
        assert_eq!(entry["problemsSinceFileCreation"], 0);
        assert!(entry.get("restartCount").is_none());
    }

    #[test]
    fn test_reads_legacy_shadow_options_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(
            &path,
            r#"{"fileCreated":"2024-05-01T10:00:00.000Z","watchdogs":[
                {"name":"can0-0","problemsSinceFileCreation":3},
                {"name":"can0-0","problemsInLastSession":1,"problemsSinceFileCreation":9,"restartCount":1}
            ]}"#,
        )
        .unwrap();

        let mut store = CheckpointStore::new(path);
        let checkpoint = store.load();
        let entry = checkpoint.entry("can0-0").unwrap();
        assert_eq!(entry.problems_since_file_creation, 9);
        assert_eq!(entry.restart_count, Some(1));
    }

    #[test]
    fn test_file_created_is_preserved_across_saves() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(
            &path,
            r#"{"fileCreated":"2024-05-01T10:00:00Z","watchdogs":[]}"#,
        )
        .unwrap();

        let mut store = CheckpointStore::new(path.clone());
        store.load();
        store.save(&[watchdog("can0")]).unwrap();

        let checkpoint = CheckpointStore::new(path).load();
        assert_eq!(
            checkpoint.file_created.unwrap().to_rfc3339(),
            "2024-05-01T10:00:00+00:00"
        );
    }

    #[test]
    fn test_save_to_nonexistent_dir_fails() {
        let mut store = CheckpointStore::new(PathBuf::from("/nonexistent/dir/checkpoint.json"));
        let err = store.save(&[watchdog("can0")]).unwrap_err();
        assert!(matches!(err, CheckpointError::Write { .. }));
        assert!(err.to_string().contains("failed to write checkpoint"));
    }
}
