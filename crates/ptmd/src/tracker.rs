//! Session tracker - turns process snapshots into game sessions.
//!
//! The tracker is a pure state machine: it owns the open sessions and the
//! current catalog, and converts each snapshot into [`TrackerEvent`]s. It
//! never touches the ledger itself; the polling task applies the events.
//!
//! # Session Rules
//!
//! - A catalog id is "present" when at least one non-blacklisted process
//!   matches one of its executables.
//! - Any number of matching processes form one logical session per catalog id.
//! - A session opens on the first cycle its game is present and closes on the
//!   first cycle no matching process remains. Time is only counted at close.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Local};
use ptm_core::{normalize_executable, Catalog, CatalogId};
use tracing::{debug, info};

use crate::snapshot::ProcessInfo;

// ============================================================================
// Types
// ============================================================================

/// A game currently detected as running. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningSession {
    pub catalog_id: CatalogId,
    /// PID of the first matching process seen for this session
    pub process_handle: u32,
    pub started_at: DateTime<Local>,
}

/// State change produced by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    /// A game started running.
    Opened {
        catalog_id: CatalogId,
        pid: u32,
        at: DateTime<Local>,
    },
    /// A game stopped running; `elapsed_secs` is ready to be added to the ledger.
    Closed {
        catalog_id: CatalogId,
        started_at: DateTime<Local>,
        closed_at: DateTime<Local>,
        elapsed_secs: u64,
    },
}

impl TrackerEvent {
    pub fn catalog_id(&self) -> &CatalogId {
        match self {
            Self::Opened { catalog_id, .. } | Self::Closed { catalog_id, .. } => catalog_id,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

// ============================================================================
// Session Tracker
// ============================================================================

/// Diffs successive process snapshots into session open/close events.
#[derive(Debug)]
pub struct SessionTracker {
    catalog: Catalog,
    blacklist: HashSet<String>,
    sessions: HashMap<CatalogId, RunningSession>,
}

impl SessionTracker {
    /// Creates a tracker. Blacklist names are normalized here.
    pub fn new(catalog: Catalog, blacklist: impl IntoIterator<Item = String>) -> Self {
        Self {
            catalog,
            blacklist: blacklist
                .into_iter()
                .map(|name| normalize_executable(&name))
                .collect(),
            sessions: HashMap::new(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Open sessions, ordered by catalog id.
    pub fn open_sessions(&self) -> Vec<&RunningSession> {
        let mut sessions: Vec<&RunningSession> = self.sessions.values().collect();
        sessions.sort_by(|a, b| a.catalog_id.cmp(&b.catalog_id));
        sessions
    }

    pub fn is_running(&self, catalog_id: &CatalogId) -> bool {
        self.sessions.contains_key(catalog_id)
    }

    /// Processes one snapshot taken at `now`.
    ///
    /// Returns close events before open events, each group ordered by catalog id.
    pub fn poll(&mut self, snapshot: &[ProcessInfo], now: DateTime<Local>) -> Vec<TrackerEvent> {
        let present = self.match_processes(snapshot);

        let mut events = self.close_where(now, |id| !present.contains_key(id));

        for (catalog_id, pid) in present {
            if self.sessions.contains_key(&catalog_id) {
                continue;
            }
            info!(catalog_id = %catalog_id, pid, "Game session opened");
            self.sessions.insert(
                catalog_id.clone(),
                RunningSession {
                    catalog_id: catalog_id.clone(),
                    process_handle: pid,
                    started_at: now,
                },
            );
            events.push(TrackerEvent::Opened {
                catalog_id,
                pid,
                at: now,
            });
        }

        events
    }

    /// Swaps in a new catalog, closing sessions for games it no longer lists.
    pub fn replace_catalog(&mut self, catalog: Catalog, now: DateTime<Local>) -> Vec<TrackerEvent> {
        self.catalog = catalog;
        let catalog = &self.catalog;
        let stale: HashSet<CatalogId> = self
            .sessions
            .keys()
            .filter(|id| !catalog.contains_id(id))
            .cloned()
            .collect();
        self.close_where(now, |id| stale.contains(id))
    }

    /// Closes every open session; used on orderly shutdown.
    pub fn close_all(&mut self, now: DateTime<Local>) -> Vec<TrackerEvent> {
        self.close_where(now, |_| true)
    }

    /// Catalog ids present in the snapshot, with the lowest matching PID.
    fn match_processes(&self, snapshot: &[ProcessInfo]) -> BTreeMap<CatalogId, u32> {
        let mut present: BTreeMap<CatalogId, u32> = BTreeMap::new();
        for process in snapshot {
            let name = normalize_executable(&process.executable_name);
            if self.blacklist.contains(&name) {
                continue;
            }
            let Some(entry) = self.catalog.lookup(&name) else {
                continue;
            };
            present
                .entry(entry.catalog_id().clone())
                .and_modify(|pid| *pid = (*pid).min(process.pid))
                .or_insert(process.pid);
        }
        present
    }

    fn close_where(
        &mut self,
        now: DateTime<Local>,
        should_close: impl Fn(&CatalogId) -> bool,
    ) -> Vec<TrackerEvent> {
        let mut closing: Vec<CatalogId> = self
            .sessions
            .keys()
            .filter(|id| should_close(id))
            .cloned()
            .collect();
        closing.sort();

        let mut events = Vec::with_capacity(closing.len());
        for catalog_id in closing {
            let Some(session) = self.sessions.remove(&catalog_id) else {
                continue;
            };
            let elapsed_secs = u64::try_from((now - session.started_at).num_seconds()).unwrap_or(0);
            info!(
                catalog_id = %catalog_id,
                pid = session.process_handle,
                elapsed_secs,
                "Game session closed"
            );
            events.push(TrackerEvent::Closed {
                catalog_id,
                started_at: session.started_at,
                closed_at: now,
                elapsed_secs,
            });
        }
        if !events.is_empty() {
            debug!(closed = events.len(), open = self.sessions.len(), "Sessions closed");
        }
        events
    }
}
