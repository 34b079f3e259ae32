//! Process snapshots - point-in-time views of the running process list.
//!
//! # Async Safety
//!
//! Refreshing the process table is blocking work. [`acquire_snapshot`] runs
//! the source on the blocking pool under a timeout so the polling loop never
//! waits on the OS for longer than the configured bound.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A poisoned or busy source is reported as an error, never a panic

use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

use sysinfo::{ProcessesToUpdate, System};
use thiserror::Error;

// ============================================================================
// Types
// ============================================================================

/// One running process as seen by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessInfo {
    /// Opaque OS process identifier
    pub pid: u32,
    /// Executable base filename (case preserved)
    pub executable_name: String,
}

impl ProcessInfo {
    pub fn new(pid: u32, executable_name: impl Into<String>) -> Self {
        Self {
            pid,
            executable_name: executable_name.into(),
        }
    }
}

/// Errors that can occur while taking a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The OS refused or failed to enumerate processes
    #[error("process enumeration failed: {0}")]
    Enumeration(String),

    /// The snapshot did not complete within the timeout
    #[error("process snapshot timed out after {0:?}")]
    Timeout(Duration),

    /// A previous snapshot is still running on the blocking pool
    #[error("previous snapshot still in progress")]
    Busy,

    /// The blocking task failed to run to completion
    #[error("snapshot task failed: {0}")]
    TaskFailed(String),
}

// ============================================================================
// Source Trait
// ============================================================================

/// Produces the current set of running processes.
///
/// Implementations may block; callers run them via [`acquire_snapshot`].
pub trait SnapshotSource: Send + 'static {
    fn snapshot(&mut self) -> Result<Vec<ProcessInfo>, SnapshotError>;
}

/// Snapshot source backed by the `sysinfo` crate.
///
/// Keeps one `System` across calls so refreshes only diff the process table.
pub struct SysinfoSnapshotSource {
    system: System,
}

impl SysinfoSnapshotSource {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoSnapshotSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSource for SysinfoSnapshotSource {
    fn snapshot(&mut self) -> Result<Vec<ProcessInfo>, SnapshotError> {
        let refreshed = self.system.refresh_processes(ProcessesToUpdate::All, true);
        if refreshed == 0 {
            return Err(SnapshotError::Enumeration(
                "no processes visible".to_string(),
            ));
        }

        let processes = self
            .system
            .processes()
            .iter()
            .filter_map(|(pid, process)| {
                // Prefer the exe path's file name; `name()` is truncated on some platforms.
                let executable_name = process
                    .exe()
                    .and_then(|path| path.file_name())
                    .map(|name| name.to_string_lossy().into_owned())
                    .or_else(|| {
                        let name = process.name().to_string_lossy().into_owned();
                        (!name.is_empty()).then_some(name)
                    })?;
                Some(ProcessInfo::new(pid.as_u32(), executable_name))
            })
            .collect();

        Ok(processes)
    }
}

// ============================================================================
// Bounded Acquisition
// ============================================================================

/// Takes one snapshot on the blocking pool, bounded by `timeout`.
///
/// If a timed-out snapshot is still holding the source, later calls fail
/// fast with [`SnapshotError::Busy`] instead of queueing behind it.
pub async fn acquire_snapshot<S: SnapshotSource>(
    source: Arc<Mutex<S>>,
    timeout: Duration,
) -> Result<Vec<ProcessInfo>, SnapshotError> {
    let task = tokio::task::spawn_blocking(move || match source.try_lock() {
        Ok(mut guard) => guard.snapshot(),
        Err(TryLockError::WouldBlock) => Err(SnapshotError::Busy),
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().snapshot(),
    });

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(SnapshotError::TaskFailed(e.to_string())),
        Err(_) => Err(SnapshotError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticSource(Vec<ProcessInfo>);

    impl SnapshotSource for StaticSource {
        fn snapshot(&mut self) -> Result<Vec<ProcessInfo>, SnapshotError> {
            Ok(self.0.clone())
        }
    }

    struct SlowSource;

    impl SnapshotSource for SlowSource {
        fn snapshot(&mut self) -> Result<Vec<ProcessInfo>, SnapshotError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_acquire_returns_source_output() {
        let source = Arc::new(Mutex::new(StaticSource(vec![ProcessInfo::new(
            42, "game.exe",
        )])));
        let processes = acquire_snapshot(source, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(processes, vec![ProcessInfo::new(42, "game.exe")]);
    }

    #[tokio::test]
    async fn test_acquire_times_out_then_reports_busy() {
        let source = Arc::new(Mutex::new(SlowSource));

        let first = acquire_snapshot(source.clone(), Duration::from_millis(20)).await;
        assert!(matches!(first, Err(SnapshotError::Timeout(_))));

        let second = acquire_snapshot(source.clone(), Duration::from_millis(100)).await;
        assert!(matches!(second, Err(SnapshotError::Busy)));

        // Once the slow call drains, the source is usable again.
        tokio::time::sleep(Duration::from_millis(400)).await;
        let third = acquire_snapshot(source, Duration::from_secs(1)).await;
        assert!(third.is_ok());
    }

    #[test]
    fn test_sysinfo_source_sees_current_process() {
        let mut source = SysinfoSnapshotSource::new();
        let processes = source.snapshot().unwrap();
        let me = std::process::id();
        assert!(processes.iter().any(|p| p.pid == me));
    }
}
