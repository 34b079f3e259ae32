//! Daemon configuration loaded from TOML.
//!
//! Every key is optional; a missing file means all defaults.
//!
//! ```toml
//! poll_interval_secs = 2
//! snapshot_timeout_secs = 5
//! catalog_refresh_secs = 300
//! flush_failure_warn_threshold = 3
//! week_mode = "calendar_monday"
//! blacklist = ["unitycrashhandler64.exe", "crashreporter.exe"]
//! ledger_path = "/home/me/.local/share/ptm/playtime.json"
//! catalog_path = "/home/me/.config/ptm/catalog.toml"
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ptm_core::WeekMode;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

// ============================================================================
// Constants
// ============================================================================

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV_VAR: &str = "PTM_CONFIG";

/// Directory name used under the platform config/data/state dirs.
pub const APP_DIR: &str = "ptm";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_SNAPSHOT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_CATALOG_REFRESH_SECS: u64 = 300;
pub const DEFAULT_FLUSH_FAILURE_WARN_THRESHOLD: u32 = 3;

/// Helper processes that share names with games or ship alongside them.
pub const DEFAULT_BLACKLIST: &[&str] = &[
    "unitycrashhandler.exe",
    "unitycrashhandler64.exe",
    "uninstall.exe",
    "crashreporter.exe",
];

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

// ============================================================================
// Config
// ============================================================================

/// Runtime configuration of the polling daemon.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub poll_interval_secs: u64,
    pub snapshot_timeout_secs: u64,
    pub catalog_refresh_secs: u64,
    pub flush_failure_warn_threshold: u32,
    #[serde(deserialize_with = "deserialize_week_mode")]
    pub week_mode: WeekMode,
    pub blacklist: Vec<String>,
    pub ledger_path: PathBuf,
    pub catalog_path: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            snapshot_timeout_secs: DEFAULT_SNAPSHOT_TIMEOUT_SECS,
            catalog_refresh_secs: DEFAULT_CATALOG_REFRESH_SECS,
            flush_failure_warn_threshold: DEFAULT_FLUSH_FAILURE_WARN_THRESHOLD,
            week_mode: WeekMode::default(),
            blacklist: DEFAULT_BLACKLIST.iter().map(|s| s.to_string()).collect(),
            ledger_path: default_ledger_path(),
            catalog_path: default_catalog_path(),
        }
    }
}

impl DaemonConfig {
    /// Loads the config from `$PTM_CONFIG` or the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Loads the config from a specific file. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Poll interval, never shorter than one second.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Upper bound on a single process snapshot.
    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_secs(self.snapshot_timeout_secs.max(1))
    }

    /// Catalog reload period. Zero disables periodic reloads.
    pub fn catalog_refresh(&self) -> Option<Duration> {
        (self.catalog_refresh_secs > 0).then(|| Duration::from_secs(self.catalog_refresh_secs))
    }
}

/// Accepts the `WeekMode` names plus the short `monday` / `sunday` forms.
fn deserialize_week_mode<'de, D>(deserializer: D) -> Result<WeekMode, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse::<WeekMode>().map_err(serde::de::Error::custom)
}

// ============================================================================
// Paths
// ============================================================================

/// Config file path: `$PTM_CONFIG`, else `<config_dir>/ptm/config.toml`.
pub fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_ENV_VAR) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(APP_DIR)
        .join("config.toml")
}

/// Default ledger location: `<data_dir>/ptm/playtime.json`.
pub fn default_ledger_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(APP_DIR)
        .join("playtime.json")
}

/// Default catalog location: `<config_dir>/ptm/catalog.toml`.
pub fn default_catalog_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(APP_DIR)
        .join("catalog.toml")
}
