//! Shared, lock-guarded playtime ledger.
//!
//! The polling task is the only writer; presentation code reads through
//! cloned handles from other tasks or threads. Every operation takes the lock
//! for exactly one increment or one query and never does I/O while holding it.
//! Flushing works from [`LedgerHandle::snapshot`], a copy taken under the lock.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Local, NaiveDate};
use ptm_core::{CatalogId, Ledger, PlaytimeTotals, TimeWindow, WeekMode};

use crate::tracker::TrackerEvent;

#[derive(Debug, Default)]
struct LedgerState {
    ledger: Ledger,
    /// Bumped on every mutation; compared against the last flushed value.
    generation: u64,
}

/// Cheap-to-clone handle to the shared ledger.
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    inner: Arc<Mutex<LedgerState>>,
    week_mode: WeekMode,
}

impl LedgerHandle {
    pub fn new(ledger: Ledger, week_mode: WeekMode) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LedgerState {
                ledger,
                generation: 0,
            })),
            week_mode,
        }
    }

    pub fn week_mode(&self) -> WeekMode {
        self.week_mode
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        // A panicking reader cannot leave the ledger half-updated, so keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    pub fn record_open(&self, catalog_id: &CatalogId, opened_at: DateTime<Local>) {
        let mut state = self.lock();
        state.ledger.record_open(catalog_id, opened_at);
        state.generation += 1;
    }

    pub fn increment(&self, catalog_id: &CatalogId, elapsed_secs: u64, closed_at: DateTime<Local>) {
        let mut state = self.lock();
        state.ledger.increment(catalog_id, elapsed_secs, closed_at);
        state.generation += 1;
    }

    /// Applies tracker events in order, one lock acquisition per event.
    pub fn apply(&self, events: &[TrackerEvent]) {
        for event in events {
            match event {
                TrackerEvent::Opened { catalog_id, at, .. } => self.record_open(catalog_id, *at),
                TrackerEvent::Closed {
                    catalog_id,
                    closed_at,
                    elapsed_secs,
                    ..
                } => self.increment(catalog_id, *elapsed_secs, *closed_at),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Seconds played in a window ending today (local date).
    pub fn query(&self, catalog_id: &CatalogId, window: TimeWindow) -> u64 {
        self.query_on(catalog_id, window, Local::now().date_naive())
    }

    pub fn query_on(&self, catalog_id: &CatalogId, window: TimeWindow, today: NaiveDate) -> u64 {
        self.lock()
            .ledger
            .query(catalog_id, window, today, self.week_mode)
    }

    pub fn list_all(&self) -> Vec<(CatalogId, PlaytimeTotals)> {
        self.list_all_on(Local::now().date_naive())
    }

    pub fn list_all_on(&self, today: NaiveDate) -> Vec<(CatalogId, PlaytimeTotals)> {
        self.lock().ledger.list_all(today, self.week_mode)
    }

    /// Every game, most played today first.
    pub fn list_by_today(&self) -> Vec<(CatalogId, PlaytimeTotals)> {
        self.list_by_today_on(Local::now().date_naive())
    }

    pub fn list_by_today_on(&self, today: NaiveDate) -> Vec<(CatalogId, PlaytimeTotals)> {
        self.lock().ledger.list_by_today(today, self.week_mode)
    }

    pub fn today_ranking(&self) -> Vec<(CatalogId, u64)> {
        self.today_ranking_on(Local::now().date_naive())
    }

    pub fn today_ranking_on(&self, today: NaiveDate) -> Vec<(CatalogId, u64)> {
        self.lock().ledger.today_ranking(today)
    }

    // ------------------------------------------------------------------------
    // Flush Support
    // ------------------------------------------------------------------------

    /// Current mutation count.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Copy of the ledger together with the generation it reflects.
    pub fn snapshot(&self) -> (Ledger, u64) {
        let state = self.lock();
        (state.ledger.clone(), state.generation)
    }
}
