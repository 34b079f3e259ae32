//! PTM Core - Shared types for game playtime tracking
//!
//! This crate provides the domain types shared between the daemon (ptmd)
//! and the query CLI (ptm): the game catalog, the playtime ledger, time
//! windows, and duration formatting.
//!
//! Nothing here performs I/O. Persistence and process polling live in `ptmd`.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod catalog;
pub mod duration;
pub mod error;
pub mod ledger;
pub mod window;

// Re-exports for convenience
pub use catalog::{normalize_executable, Catalog, CatalogId, GameEntry};
pub use duration::{format_duration, parse_duration};
pub use error::{DomainError, DomainResult};
pub use ledger::{Ledger, PlaytimeRecord, PlaytimeTotals};
pub use window::{TimeWindow, WeekMode};
