//! Game catalog: the set of trackable games and the executables that identify them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Stable identifier of a game in the catalog.
///
/// Usually the platform's app id (e.g., Steam's "1245620"). It is the key of
/// the persisted ledger, so it must not change between catalog refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogId(String);

impl CatalogId {
    /// Creates a new CatalogId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CatalogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CatalogId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CatalogId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for CatalogId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Executable Name Normalization
// ============================================================================

/// Reduces an executable name or path to the lowercase base filename.
///
/// Both `/` and `\` are treated as separators so Windows paths reported
/// on any host normalize the same way.
///
/// ```
/// use ptm_core::normalize_executable;
///
/// assert_eq!(normalize_executable(r"D:\Steam\common\ELDEN RING\eldenring.exe"), "eldenring.exe");
/// assert_eq!(normalize_executable("Game.EXE"), "game.exe");
/// ```
pub fn normalize_executable(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .trim();
    base.to_lowercase()
}

// ============================================================================
// Game Entry
// ============================================================================

/// One trackable executable and the game it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEntry {
    /// Lowercase base filename used as the match key
    executable_name: String,
    /// Human readable game name
    display_name: String,
    /// Ledger key
    catalog_id: CatalogId,
}

impl GameEntry {
    /// Creates an entry, normalizing the executable name.
    pub fn new(
        executable_name: &str,
        display_name: impl Into<String>,
        catalog_id: impl Into<CatalogId>,
    ) -> Self {
        Self {
            executable_name: normalize_executable(executable_name),
            display_name: display_name.into(),
            catalog_id: catalog_id.into(),
        }
    }

    pub fn executable_name(&self) -> &str {
        &self.executable_name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn catalog_id(&self) -> &CatalogId {
        &self.catalog_id
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Immutable lookup table from executable name to game.
///
/// Several executables may share one `CatalogId` (launcher plus game binary).
/// If two entries claim the same executable, the first one wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    by_executable: HashMap<String, GameEntry>,
}

impl Catalog {
    /// Creates an empty catalog (no games trackable).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a catalog from entries.
    pub fn from_entries(entries: impl IntoIterator<Item = GameEntry>) -> Self {
        let mut by_executable = HashMap::new();
        for entry in entries {
            if entry.executable_name.is_empty() {
                continue;
            }
            by_executable
                .entry(entry.executable_name.clone())
                .or_insert(entry);
        }
        Self { by_executable }
    }

    /// Looks up a game by executable name or path (case-insensitive, base filename).
    pub fn lookup(&self, executable: &str) -> Option<&GameEntry> {
        self.by_executable.get(&normalize_executable(executable))
    }

    /// Returns true if any executable maps to this catalog id.
    pub fn contains_id(&self, catalog_id: &CatalogId) -> bool {
        self.by_executable
            .values()
            .any(|entry| &entry.catalog_id == catalog_id)
    }

    /// Returns the display name for a catalog id, if known.
    pub fn display_name(&self, catalog_id: &CatalogId) -> Option<&str> {
        self.by_executable
            .values()
            .find(|entry| &entry.catalog_id == catalog_id)
            .map(|entry| entry.display_name.as_str())
    }

    /// Returns the distinct catalog ids in this catalog.
    pub fn catalog_ids(&self) -> BTreeSet<&CatalogId> {
        self.by_executable
            .values()
            .map(|entry| &entry.catalog_id)
            .collect()
    }

    /// Number of executables (not games) in the catalog.
    pub fn len(&self) -> usize {
        self.by_executable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_executable.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &GameEntry> {
        self.by_executable.values()
    }
}
