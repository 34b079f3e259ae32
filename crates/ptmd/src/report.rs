//! Event-driven playtime report.
//!
//! Subscribes to tracker events and, whenever a session closes, reads today's
//! ranking from the shared ledger and logs it. This is the in-daemon example
//! of a presentation consumer: it only reads through a [`LedgerHandle`] and
//! never touches tracker state.

use ptm_core::{format_duration, CatalogId};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ledger::LedgerHandle;
use crate::tracker::TrackerEvent;

/// Maximum number of games included in a ranking log line.
pub const RANKING_LIMIT: usize = 5;

/// Renders a ranking as `"id 2m5s, id 10s"`.
pub fn format_ranking(ranking: &[(CatalogId, u64)], limit: usize) -> String {
    ranking
        .iter()
        .take(limit)
        .map(|(id, secs)| format!("{id} {}", format_duration(*secs)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Spawns the report task.
pub fn spawn_report_task(
    ledger: LedgerHandle,
    mut events: broadcast::Receiver<TrackerEvent>,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => break,

                received = events.recv() => match received {
                    Ok(TrackerEvent::Closed { catalog_id, elapsed_secs, .. }) => {
                        let ranking = ledger.today_ranking();
                        info!(
                            catalog_id = %catalog_id,
                            session = %format_duration(elapsed_secs),
                            today = %format_ranking(&ranking, RANKING_LIMIT),
                            "Playtime updated"
                        );
                    }
                    Ok(TrackerEvent::Opened { .. }) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Report task lagged behind tracker events");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("Report task completed");
    })
}
