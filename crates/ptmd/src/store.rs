//! Ledger persistence - crash-safe JSON file.
//!
//! # File Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "records": {
//!     "G1": { "totalSeconds": 125, "dailySeconds": {"2024-03-14": 125},
//!             "lastOpenedAt": "...", "lastClosedAt": "..." }
//!   }
//! }
//! ```
//!
//! Unknown fields are ignored so older daemons can read newer files.
//!
//! # Atomic Writes
//!
//! A flush writes a temp file in the same directory, syncs it, then renames it
//! over the ledger and syncs the directory (Unix). A crash leaves either the
//! previous file or the new one, and a reported success survives a crash.
//!
//! # Corrupt Files
//!
//! A file that cannot be parsed, has an unknown version, or breaks the
//! `total == sum(daily)` invariant is renamed aside (`*.corrupt-<timestamp>`)
//! and the daemon starts from an empty ledger.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use ptm_core::{CatalogId, Ledger, PlaytimeRecord};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Current on-disk schema version.
pub const LEDGER_VERSION: u32 = 1;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while loading or flushing the ledger.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Stored ledger exists but is not a valid ledger
    #[error("corrupt ledger {path}: {reason}")]
    CorruptState { path: PathBuf, reason: String },

    /// Filesystem error
    #[error("ledger I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Ledger could not be serialized
    #[error("failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

// ============================================================================
// On-Disk Structure
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    #[serde(default)]
    records: BTreeMap<CatalogId, PlaytimeRecord>,
}

// ============================================================================
// Ledger Store
// ============================================================================

/// Persistence gateway for the playtime ledger.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the last flushed ledger.
    ///
    /// A missing or blank file is an empty ledger, not an error.
    pub fn load(&self) -> Result<Ledger, StoreError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No ledger file, starting empty");
            return Ok(Ledger::new());
        }

        let content = fs::read_to_string(&self.path).map_err(|e| StoreError::io(&self.path, e))?;
        if content.trim().is_empty() {
            return Ok(Ledger::new());
        }

        let corrupt = |reason: String| StoreError::CorruptState {
            path: self.path.clone(),
            reason,
        };

        let file: LedgerFile =
            serde_json::from_str(&content).map_err(|e| corrupt(e.to_string()))?;
        if file.version != LEDGER_VERSION {
            return Err(corrupt(format!(
                "unsupported version {} (expected {LEDGER_VERSION})",
                file.version
            )));
        }

        let ledger = Ledger::from_records(file.records);
        ledger.validate().map_err(|e| corrupt(e.to_string()))?;
        Ok(ledger)
    }

    /// Loads the ledger, falling back to an empty one on any failure.
    ///
    /// A file that exists but cannot be loaded is renamed aside first so the
    /// next flush never overwrites it.
    pub fn load_or_recover(&self) -> Ledger {
        let error = match self.load() {
            Ok(ledger) => {
                info!(
                    path = %self.path.display(),
                    games = ledger.len(),
                    "Loaded playtime ledger"
                );
                return ledger;
            }
            Err(e) => e,
        };

        if !self.path.exists() {
            warn!(error = %error, "Failed to read ledger, starting from empty ledger");
            return Ledger::new();
        }

        match self.quarantine() {
            Ok(moved_to) => warn!(
                error = %error,
                preserved_as = %moved_to.display(),
                "Unreadable ledger preserved, starting from empty ledger"
            ),
            Err(e) => warn!(
                error = %error,
                rename_error = %e,
                "Unreadable ledger could not be moved aside, starting from empty ledger"
            ),
        }
        Ledger::new()
    }

    /// Atomically replaces the ledger file with `ledger`.
    pub fn flush(&self, ledger: &Ledger) -> Result<(), StoreError> {
        let file = LedgerFile {
            version: LEDGER_VERSION,
            records: ledger.records().clone(),
        };
        let content = serde_json::to_string_pretty(&file)?;

        let parent_dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent_dir).map_err(|e| StoreError::io(&parent_dir, e))?;

        let mut temp_file =
            NamedTempFile::new_in(&parent_dir).map_err(|e| StoreError::io(&parent_dir, e))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|e| StoreError::io(temp_file.path(), e))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| StoreError::io(temp_file.path(), e))?;
        temp_file
            .persist(&self.path)
            .map_err(|e| StoreError::io(&self.path, e.error))?;
        sync_dir(&parent_dir)?;

        debug!(path = %self.path.display(), games = ledger.len(), "Ledger flushed");
        Ok(())
    }

    /// Renames the current file to `<name>.corrupt-<timestamp>`.
    fn quarantine(&self) -> Result<PathBuf, StoreError> {
        let stamp = Local::now().format("%Y%m%dT%H%M%S");
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ledger".to_string());
        let target = self.path.with_file_name(format!("{file_name}.corrupt-{stamp}"));
        fs::rename(&self.path, &target).map_err(|e| StoreError::io(&self.path, e))?;
        Ok(target)
    }
}

/// Makes the rename itself durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), StoreError> {
    fs::File::open(dir)
        .and_then(|handle| handle.sync_all())
        .map_err(|e| StoreError::io(dir, e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), StoreError> {
    Ok(())
}
