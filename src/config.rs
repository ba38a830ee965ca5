use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from interface-watchdog.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct AppConfig {
    pub plugin: PluginConfig,
    pub storage: StorageConfig,
    pub restart: RestartConfig,
    pub serve: ServeConfig,
    pub watchdogs: Vec<WatchdogEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Identifier used to build default notification paths.
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    /// Pause between writing the checkpoint and exiting, so pending
    /// notifications can flush.
    pub delay_ms: u64,
    /// Exit status used when the process ends to be restarted.
    pub exit_code: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

/// One raw `[[watchdogs]]` entry as written by the user.
///
/// Every field is optional so a single bad entry is rejected on its own
/// during registry construction instead of failing the whole file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WatchdogEntry {
    pub interface: Option<String>,
    pub name: Option<String>,
    pub threshold: Option<f64>,
    #[serde(alias = "startActionThreshold")]
    pub start_action_threshold: Option<i64>,
    #[serde(alias = "stopActionThreshold")]
    pub stop_action_threshold: Option<i64>,
    pub action: Option<String>,
    #[serde(alias = "notificationPath")]
    pub notification_path: Option<String>,
}

// --- Default implementations ---

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            id: "interfacewatchdog".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".interface-watchdog"),
        }
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            delay_ms: 1000,
            exit_code: 75,
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1".to_string(),
            port: 3100,
        }
    }
}

/// Load configuration from `path`.
///
/// A missing file yields the defaults (no watchdogs); an unreadable or
/// unparsable file is an error.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(AppConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Errors from loading the configuration file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}
