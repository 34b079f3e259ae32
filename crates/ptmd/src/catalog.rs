//! Catalog provider - loads the set of trackable games from a TOML file.
//!
//! The file is produced by an external scanner (or written by hand):
//!
//! ```toml
//! [[games]]
//! id = "1245620"
//! name = "ELDEN RING"
//! executables = ["eldenring.exe", "start_protected_game.exe"]
//!
//! [[games]]
//! id = "1145360"
//! name = "Hades"
//! executable = "Hades.exe"
//! ```
//!
//! # Refresh Semantics
//!
//! A refresh that fails to read or parse the file keeps the previous catalog.
//! A file that parses but lists no games is a real empty catalog.

use std::path::{Path, PathBuf};

use ptm_core::{Catalog, GameEntry};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while loading a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Catalog file does not exist
    #[error("catalog file not found: {0}")]
    NotFound(PathBuf),

    /// Failed to read the catalog file
    #[error("failed to read catalog {path}: {message}")]
    Read { path: PathBuf, message: String },

    /// Catalog file is malformed
    #[error("failed to parse catalog {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

// ============================================================================
// Source Trait
// ============================================================================

/// Anything that can produce the current catalog.
pub trait CatalogSource: Send {
    fn load(&self) -> Result<Catalog, CatalogError>;
}

// ============================================================================
// File Catalog
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    games: Vec<GameSpec>,
}

#[derive(Debug, Deserialize)]
struct GameSpec {
    id: String,
    name: Option<String>,
    executable: Option<String>,
    #[serde(default)]
    executables: Vec<String>,
}

/// Catalog backed by a TOML file on disk.
#[derive(Debug, Clone)]
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CatalogSource for FileCatalog {
    fn load(&self) -> Result<Catalog, CatalogError> {
        if !self.path.exists() {
            return Err(CatalogError::NotFound(self.path.clone()));
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| CatalogError::Read {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        parse_catalog(&content).map_err(|message| CatalogError::Parse {
            path: self.path.clone(),
            message,
        })
    }
}

/// Parses catalog TOML into a `Catalog`.
///
/// Games without any executable are skipped with a warning.
pub fn parse_catalog(content: &str) -> Result<Catalog, String> {
    let file: CatalogFile = toml::from_str(content).map_err(|e| e.to_string())?;

    let mut entries = Vec::new();
    for game in file.games {
        let display_name = game.name.clone().unwrap_or_else(|| game.id.clone());
        let executables: Vec<String> = game
            .executable
            .into_iter()
            .chain(game.executables)
            .filter(|exe| !exe.trim().is_empty())
            .collect();

        if executables.is_empty() {
            warn!(catalog_id = %game.id, "Catalog entry has no executable, skipping");
            continue;
        }

        for exe in executables {
            entries.push(GameEntry::new(&exe, display_name.clone(), game.id.clone()));
        }
    }

    Ok(Catalog::from_entries(entries))
}
