//! Polling loop for the PTM daemon.
//!
//! One task drives the whole engine:
//! - every poll interval: take a bounded process snapshot, feed it to the
//!   [`SessionTracker`], apply the resulting events to the ledger, flush
//! - every catalog refresh interval: reload the catalog, closing sessions for
//!   games that disappeared
//! - on cancellation: close all open sessions at shutdown time and flush
//!
//! This task is the only ledger writer. Events are also published on a
//! broadcast channel for presentation subscribers.
//!
//! # Panic-Free Guarantees
//!
//! All code follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Snapshot, catalog, and flush failures are logged and retried, never fatal

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Local;
use ptm_core::Catalog;
use tokio::sync::broadcast;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::CatalogSource;
use crate::config::DaemonConfig;
use crate::ledger::LedgerHandle;
use crate::snapshot::{acquire_snapshot, SnapshotSource};
use crate::store::LedgerStore;
use crate::tracker::{SessionTracker, TrackerEvent};

/// Capacity of the tracker event broadcast channel.
const EVENT_BUFFER: usize = 100;

/// Timing knobs of the polling loop, taken from [`DaemonConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub snapshot_timeout: Duration,
    pub catalog_refresh: Option<Duration>,
    pub flush_failure_warn_threshold: u32,
}

impl From<&DaemonConfig> for MonitorSettings {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            snapshot_timeout: config.snapshot_timeout(),
            catalog_refresh: config.catalog_refresh(),
            flush_failure_warn_threshold: config.flush_failure_warn_threshold.max(1),
        }
    }
}

/// State owned by the polling task.
pub struct PlaytimeMonitor<S, C> {
    tracker: SessionTracker,
    source: Arc<Mutex<S>>,
    catalog_source: C,
    ledger: LedgerHandle,
    store: LedgerStore,
    settings: MonitorSettings,
    event_sender: broadcast::Sender<TrackerEvent>,
    /// Ledger generation last written to disk
    flushed_generation: u64,
    consecutive_flush_failures: u32,
}

impl<S, C> PlaytimeMonitor<S, C>
where
    S: SnapshotSource,
    C: CatalogSource + Clone + 'static,
{
    /// Creates the monitor, loading the initial catalog.
    ///
    /// An unavailable catalog starts the tracker with no games; the next
    /// successful refresh fills it in.
    pub fn new(
        settings: MonitorSettings,
        blacklist: Vec<String>,
        source: S,
        catalog_source: C,
        ledger: LedgerHandle,
        store: LedgerStore,
    ) -> Self {
        let catalog = match catalog_source.load() {
            Ok(catalog) => {
                info!(
                    executables = catalog.len(),
                    games = catalog.catalog_ids().len(),
                    "Catalog loaded"
                );
                catalog
            }
            Err(e) => {
                warn!(error = %e, "Catalog unavailable, no games trackable until next refresh");
                Catalog::empty()
            }
        };

        let (event_sender, _) = broadcast::channel(EVENT_BUFFER);
        let flushed_generation = ledger.generation();

        Self {
            tracker: SessionTracker::new(catalog, blacklist),
            source: Arc::new(Mutex::new(source)),
            catalog_source,
            ledger,
            store,
            settings,
            event_sender,
            flushed_generation,
            consecutive_flush_failures: 0,
        }
    }

    /// Subscribes to session open/close events.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.event_sender.subscribe()
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    /// True when the in-memory ledger has changes not yet on disk.
    pub fn is_dirty(&self) -> bool {
        self.ledger.generation() != self.flushed_generation
    }

    /// Runs one poll cycle: snapshot, diff, apply, flush.
    ///
    /// A failed snapshot skips the diff but still retries a pending flush.
    pub async fn poll_once(&mut self) {
        match acquire_snapshot(self.source.clone(), self.settings.snapshot_timeout).await {
            Ok(processes) => {
                let events = self.tracker.poll(&processes, Local::now());
                self.publish(events);
            }
            Err(e) => {
                warn!(error = %e, "Process snapshot failed, skipping cycle");
            }
        }
        self.flush_if_dirty().await;
    }

    /// Reloads the catalog. A failed reload keeps the previous catalog.
    pub async fn refresh_catalog(&mut self) {
        let source = self.catalog_source.clone();
        let loaded = match tokio::task::spawn_blocking(move || source.load()).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Catalog refresh task failed, keeping previous catalog");
                return;
            }
        };

        match loaded {
            Ok(catalog) => {
                if catalog == *self.tracker.catalog() {
                    debug!("Catalog unchanged");
                    return;
                }
                if catalog.is_empty() {
                    warn!("Catalog refresh returned no games, closing open sessions");
                } else {
                    info!(executables = catalog.len(), "Catalog refreshed");
                }
                let events = self.tracker.replace_catalog(catalog, Local::now());
                self.publish(events);
                self.flush_if_dirty().await;
            }
            Err(e) => {
                warn!(error = %e, "Catalog refresh failed, keeping previous catalog");
            }
        }
    }

    /// Closes every open session at the current time and flushes.
    pub async fn shutdown(&mut self) {
        let events = self.tracker.close_all(Local::now());
        if !events.is_empty() {
            info!(closed = events.len(), "Closing open sessions for shutdown");
        }
        self.publish(events);
        self.flush_if_dirty().await;
        if self.is_dirty() {
            warn!(
                path = %self.store.path().display(),
                "Final ledger flush failed, recent playtime was not saved"
            );
        }
    }

    fn publish(&self, events: Vec<TrackerEvent>) {
        if events.is_empty() {
            return;
        }
        self.ledger.apply(&events);
        for event in events {
            // No subscribers is fine
            let _ = self.event_sender.send(event);
        }
    }

    /// Writes the ledger if it changed since the last successful flush.
    ///
    /// The copy is taken under the ledger lock, and only when something
    /// changed; disk I/O happens outside it.
    async fn flush_if_dirty(&mut self) {
        if !self.is_dirty() {
            return;
        }
        let (snapshot, generation) = self.ledger.snapshot();

        let store = self.store.clone();
        let result = tokio::task::spawn_blocking(move || store.flush(&snapshot))
            .await
            .map_err(|e| e.to_string())
            .and_then(|r| r.map_err(|e| e.to_string()));

        match result {
            Ok(()) => {
                if self.consecutive_flush_failures > 0 {
                    info!(
                        failures = self.consecutive_flush_failures,
                        "Ledger flush recovered"
                    );
                }
                self.flushed_generation = generation;
                self.consecutive_flush_failures = 0;
            }
            Err(error) => {
                self.consecutive_flush_failures = self.consecutive_flush_failures.saturating_add(1);
                if self.consecutive_flush_failures >= self.settings.flush_failure_warn_threshold {
                    warn!(
                        error = %error,
                        consecutive_failures = self.consecutive_flush_failures,
                        path = %self.store.path().display(),
                        "Ledger is not durable: repeated flush failures"
                    );
                } else {
                    debug!(error = %error, "Ledger flush failed, will retry next cycle");
                }
            }
        }
    }
}

/// Spawns the polling task.
///
/// Uses cooperative shutdown via CancellationToken; on cancellation all open
/// sessions are closed and flushed before the task completes, so callers
/// should await the handle before exiting.
pub fn spawn_monitor_task<S, C>(
    mut monitor: PlaytimeMonitor<S, C>,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()>
where
    S: SnapshotSource,
    C: CatalogSource + Clone + 'static,
{
    tokio::spawn(async move {
        let mut poll_tick = interval(monitor.settings.poll_interval);
        poll_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut catalog_tick = monitor.settings.catalog_refresh.map(|period| {
            let mut tick = interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick
        });

        info!(
            poll_interval_secs = monitor.settings.poll_interval.as_secs(),
            snapshot_timeout_secs = monitor.settings.snapshot_timeout.as_secs(),
            catalog_refresh_secs = ?monitor.settings.catalog_refresh.map(|d| d.as_secs()),
            "Playtime monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Playtime monitor shutting down");
                    monitor.shutdown().await;
                    break;
                }

                _ = poll_tick.tick() => {
                    monitor.poll_once().await;
                }

                _ = async {
                    match catalog_tick.as_mut() {
                        Some(tick) => { tick.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    monitor.refresh_catalog().await;
                }
            }
        }

        debug!("Playtime monitor task completed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogError;
    use crate::snapshot::{ProcessInfo, SnapshotError};
    use ptm_core::{CatalogId, GameEntry, Ledger, TimeWindow, WeekMode};
    use std::collections::VecDeque;
    use tempfile::TempDir;

    /// Replays scripted snapshots, then repeats the last one.
    struct ScriptedSource {
        script: VecDeque<Result<Vec<ProcessInfo>, String>>,
        last: Vec<ProcessInfo>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Vec<ProcessInfo>, String>>) -> Self {
            Self {
                script: script.into(),
                last: Vec::new(),
            }
        }
    }

    impl SnapshotSource for ScriptedSource {
        fn snapshot(&mut self) -> Result<Vec<ProcessInfo>, SnapshotError> {
            match self.script.pop_front() {
                Some(Ok(processes)) => {
                    self.last = processes.clone();
                    Ok(processes)
                }
                Some(Err(message)) => Err(SnapshotError::Enumeration(message)),
                None => Ok(self.last.clone()),
            }
        }
    }

    /// Catalog whose content can be swapped or broken between refreshes.
    #[derive(Clone)]
    struct SharedCatalog(Arc<Mutex<Option<Catalog>>>);

    impl SharedCatalog {
        fn with(catalog: Catalog) -> Self {
            Self(Arc::new(Mutex::new(Some(catalog))))
        }

        fn set(&self, catalog: Option<Catalog>) {
            *self.0.lock().unwrap() = catalog;
        }
    }

    impl CatalogSource for SharedCatalog {
        fn load(&self) -> Result<Catalog, CatalogError> {
            self.0
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| CatalogError::NotFound("memory".into()))
        }
    }

    fn game_catalog() -> Catalog {
        Catalog::from_entries(vec![GameEntry::new("game.exe", "Game", "G1")])
    }

    fn settings() -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_millis(10),
            snapshot_timeout: Duration::from_secs(2),
            catalog_refresh: None,
            flush_failure_warn_threshold: 2,
        }
    }

    fn monitor_with(
        dir: &TempDir,
        script: Vec<Result<Vec<ProcessInfo>, String>>,
        catalog: SharedCatalog,
    ) -> (PlaytimeMonitor<ScriptedSource, SharedCatalog>, LedgerHandle, LedgerStore) {
        let ledger = LedgerHandle::new(Ledger::new(), WeekMode::Rolling);
        let store = LedgerStore::new(dir.path().join("playtime.json"));
        let monitor = PlaytimeMonitor::new(
            settings(),
            vec![],
            ScriptedSource::new(script),
            catalog,
            ledger.clone(),
            store.clone(),
        );
        (monitor, ledger, store)
    }

    fn game() -> Vec<ProcessInfo> {
        vec![ProcessInfo::new(7, "game.exe")]
    }

    #[tokio::test]
    async fn test_poll_open_close_flushes() {
        let dir = TempDir::new().unwrap();
        let (mut monitor, ledger, store) =
            monitor_with(&dir, vec![Ok(game()), Ok(vec![])], SharedCatalog::with(game_catalog()));
        let mut events = monitor.subscribe();

        monitor.poll_once().await;
        assert!(monitor.tracker().is_running(&CatalogId::new("G1")));
        assert!(matches!(events.try_recv(), Ok(TrackerEvent::Opened { .. })));
        assert!(!monitor.is_dirty(), "open is flushed immediately");

        monitor.poll_once().await;
        assert!(matches!(events.try_recv(), Ok(TrackerEvent::Closed { .. })));
        assert!(!monitor.is_dirty());

        let persisted = store.load().unwrap();
        let record = persisted.record(&CatalogId::new("G1")).unwrap();
        assert!(record.last_opened_at().is_some());
        assert!(record.last_closed_at().is_some());
        assert_eq!(
            record.total_seconds(),
            ledger.query(&CatalogId::new("G1"), TimeWindow::Total)
        );
    }

    #[tokio::test]
    async fn test_snapshot_failure_keeps_sessions() {
        let dir = TempDir::new().unwrap();
        let (mut monitor, _ledger, _store) = monitor_with(
            &dir,
            vec![Ok(game()), Err("permission denied".into()), Ok(game())],
            SharedCatalog::with(game_catalog()),
        );
        let mut events = monitor.subscribe();

        monitor.poll_once().await;
        monitor.poll_once().await;
        monitor.poll_once().await;

        assert!(monitor.tracker().is_running(&CatalogId::new("G1")));
        assert!(matches!(events.try_recv(), Ok(TrackerEvent::Opened { .. })));
        assert!(events.try_recv().is_err(), "no close on failed snapshot");
    }

    #[tokio::test]
    async fn test_catalog_refresh_failure_keeps_previous() {
        let dir = TempDir::new().unwrap();
        let catalog = SharedCatalog::with(game_catalog());
        let (mut monitor, _ledger, _store) = monitor_with(&dir, vec![Ok(game())], catalog.clone());

        monitor.poll_once().await;
        catalog.set(None);
        monitor.refresh_catalog().await;

        assert!(monitor.tracker().is_running(&CatalogId::new("G1")));
        assert_eq!(monitor.tracker().catalog().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_catalog_closes_sessions() {
        let dir = TempDir::new().unwrap();
        let catalog = SharedCatalog::with(game_catalog());
        let (mut monitor, _ledger, store) = monitor_with(&dir, vec![Ok(game())], catalog.clone());

        monitor.poll_once().await;
        catalog.set(Some(Catalog::empty()));
        monitor.refresh_catalog().await;

        assert!(monitor.tracker().open_sessions().is_empty());
        let persisted = store.load().unwrap();
        assert!(persisted
            .record(&CatalogId::new("G1"))
            .and_then(|r| r.last_closed_at())
            .is_some());
    }

    #[tokio::test]
    async fn test_flush_failure_is_retried() {
        let dir = TempDir::new().unwrap();
        // Ledger path points into a regular file, so the parent cannot be created.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let ledger = LedgerHandle::new(Ledger::new(), WeekMode::Rolling);
        let mut monitor = PlaytimeMonitor::new(
            settings(),
            vec![],
            ScriptedSource::new(vec![Ok(game()), Ok(vec![])]),
            SharedCatalog::with(game_catalog()),
            ledger.clone(),
            LedgerStore::new(blocker.join("playtime.json")),
        );

        monitor.poll_once().await;
        monitor.poll_once().await;
        assert!(monitor.is_dirty());
        // Queries still see the increment.
        assert!(ledger.list_all().iter().any(|(id, _)| id.as_str() == "G1"));

        // Disk becomes writable again.
        std::fs::remove_file(&blocker).unwrap();
        monitor.poll_once().await;
        assert!(!monitor.is_dirty());
        assert!(blocker.join("playtime.json").exists());
    }

    #[tokio::test]
    async fn test_clean_cycle_does_not_rewrite_ledger() {
        let dir = TempDir::new().unwrap();
        let (mut monitor, ledger, store) =
            monitor_with(&dir, vec![Ok(vec![])], SharedCatalog::with(game_catalog()));

        ledger.increment(&CatalogId::new("G1"), 30, Local::now());
        monitor.poll_once().await;
        assert!(store.path().exists());

        // Nothing changed since the last flush, so the file is not recreated.
        std::fs::remove_file(store.path()).unwrap();
        monitor.poll_once().await;
        monitor.poll_once().await;
        assert!(!monitor.is_dirty());
        assert!(!store.path().exists());

        ledger.increment(&CatalogId::new("G1"), 5, Local::now());
        monitor.poll_once().await;
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn test_shutdown_closes_and_flushes() {
        let dir = TempDir::new().unwrap();
        let (mut monitor, _ledger, store) =
            monitor_with(&dir, vec![Ok(game())], SharedCatalog::with(game_catalog()));

        monitor.poll_once().await;
        monitor.shutdown().await;

        assert!(monitor.tracker().open_sessions().is_empty());
        let persisted = store.load().unwrap();
        let record = persisted.record(&CatalogId::new("G1")).unwrap();
        assert!(record.last_closed_at().is_some());
    }

    #[tokio::test]
    async fn test_spawned_task_stops_on_cancel() {
        let dir = TempDir::new().unwrap();
        let (monitor, _ledger, store) =
            monitor_with(&dir, vec![Ok(game())], SharedCatalog::with(game_catalog()));
        let cancel_token = CancellationToken::new();

        let handle = spawn_monitor_task(monitor, cancel_token.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_token.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("monitor should stop")
            .expect("monitor should not panic");

        let persisted = store.load().unwrap();
        assert!(persisted
            .record(&CatalogId::new("G1"))
            .and_then(|r| r.last_closed_at())
            .is_some());
    }
}
