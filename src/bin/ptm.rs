//! PTM - query recorded game playtime
//!
//! Reads the ledger written by `ptmd` and prints playtime summaries.
//! Never writes: a corrupt ledger is reported, not repaired.
//!
//! # Usage
//!
//! ```text
//! ptm                # Today's ranking (default)
//! ptm today          # Today's ranking
//! ptm list           # Today / this week / total for every game, most played today first
//! ptm show 1245620   # Details for one game
//! ```

use std::process;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};

use ptm_core::{format_duration, Catalog, CatalogId, PlaytimeTotals, TimeWindow};
use ptmd::catalog::{CatalogSource, FileCatalog};
use ptmd::config::{config_file_path, DaemonConfig};
use ptmd::ledger::LedgerHandle;
use ptmd::store::LedgerStore;

/// PTM - game playtime summaries
#[derive(Parser, Debug)]
#[command(name = "ptm")]
#[command(about = "Show game playtime recorded by ptmd")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Games played today, most played first
    Today,
    /// Today, this week and total playtime for every game
    List,
    /// Playtime details for one game
    Show {
        /// Catalog id of the game
        id: String,
    },
}

/// Display name from the catalog, falling back to the id.
fn display_name<'a>(catalog: &'a Catalog, id: &'a CatalogId) -> &'a str {
    catalog.display_name(id).unwrap_or(id.as_str())
}

/// Today and this-week playtime summed over every game.
fn print_overall(rows: &[(CatalogId, PlaytimeTotals)]) {
    let overall: PlaytimeTotals = rows.iter().map(|(_, totals)| totals).sum();
    println!(
        "Today's playtime: {}    This week's playtime: {}",
        format_duration(overall.today),
        format_duration(overall.this_week)
    );
}

fn print_today(ledger: &LedgerHandle, catalog: &Catalog) {
    print_overall(&ledger.list_all());
    let ranking = ledger.today_ranking();
    if ranking.is_empty() {
        println!("No games played today.");
        return;
    }
    println!();
    for (rank, (id, secs)) in ranking.iter().enumerate() {
        println!(
            "{:>2}. {:<40} {:>10}",
            rank + 1,
            display_name(catalog, id),
            format_duration(*secs)
        );
    }
}

fn print_list(ledger: &LedgerHandle, catalog: &Catalog) {
    let rows = ledger.list_by_today();
    if rows.is_empty() {
        println!("No playtime recorded yet.");
        return;
    }
    print_overall(&rows);
    println!();
    println!(
        "{:<40} {:>10} {:>10} {:>12}",
        "GAME",
        "TODAY",
        "WEEK",
        "TOTAL"
    );
    for (id, totals) in &rows {
        println!(
            "{:<40} {:>10} {:>10} {:>12}",
            display_name(catalog, id),
            format_duration(totals.today),
            format_duration(totals.this_week),
            format_duration(totals.total)
        );
    }
    println!("(week: {})", ledger.week_mode().as_str());
}

fn print_show(ledger: &LedgerHandle, catalog: &Catalog, id: &CatalogId) -> bool {
    let all = ledger.list_all();
    if !all.iter().any(|(known, _)| known == id) {
        return false;
    }
    println!("{} ({id})", display_name(catalog, id));
    for window in [TimeWindow::Today, TimeWindow::ThisWeek, TimeWindow::Total] {
        println!(
            "  {:<10} {}",
            window.label(),
            format_duration(ledger.query(id, window))
        );
    }
    true
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = DaemonConfig::load()
        .with_context(|| format!("Failed to load config {}", config_file_path().display()))?;

    let store = LedgerStore::new(&config.ledger_path);
    let ledger = store
        .load()
        .with_context(|| format!("Failed to read ledger {}", store.path().display()))?;
    let ledger = LedgerHandle::new(ledger, config.week_mode);

    // Names are cosmetic; ids are shown when the catalog is unavailable.
    let catalog = FileCatalog::new(&config.catalog_path)
        .load()
        .unwrap_or_default();

    match args.command.unwrap_or(Command::Today) {
        Command::Today => {
            println!("Today ({})", Local::now().format("%Y-%m-%d"));
            print_today(&ledger, &catalog);
        }
        Command::List => print_list(&ledger, &catalog),
        Command::Show { id } => {
            let id = CatalogId::new(id);
            if !print_show(&ledger, &catalog, &id) {
                eprintln!("No playtime recorded for {id}");
                process::exit(1);
            }
        }
    }

    Ok(())
}
