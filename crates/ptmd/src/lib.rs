//! PTM Daemon - Process polling and playtime aggregation
//!
//! This crate provides the engine of the playtime daemon:
//! - `snapshot` - Bounded process snapshots (sysinfo)
//! - `tracker` - Session tracker turning snapshots into open/close events
//! - `ledger` - Lock-guarded shared ledger for the writer and readers
//! - `store` - Crash-safe ledger persistence
//! - `catalog` - Catalog provider (TOML file)
//! - `monitor` - The polling task tying it all together
//! - `report` - Event-driven reader that logs today's ranking
//! - `config` - Daemon configuration
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         ptmd daemon                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌────────────────┐   snapshot   ┌────────────────────────┐  │
//! │  │ SnapshotSource │─────────────▶│    PlaytimeMonitor     │  │
//! │  │   (sysinfo)    │              │  SessionTracker (owner)│  │
//! │  └────────────────┘              └───────┬────────┬───────┘  │
//! │                                  apply   │        │ events   │
//! │                                          ▼        ▼          │
//! │  ┌────────────────┐   snapshot   ┌────────────┐ ┌─────────┐  │
//! │  │  LedgerStore   │◀─────────────│LedgerHandle│◀│ report  │  │
//! │  │ (atomic JSON)  │   (no lock)  │  (Mutex)   │ │  task   │  │
//! │  └────────────────┘              └────────────┘ └─────────┘  │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod catalog;
pub mod config;
pub mod ledger;
pub mod monitor;
pub mod report;
pub mod snapshot;
pub mod store;
pub mod tracker;
