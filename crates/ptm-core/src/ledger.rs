//! Playtime ledger: per-game cumulative and per-day playtime.
//!
//! The ledger is plain data. Locking and persistence are layered on top of it
//! by the daemon (`ptmd::ledger::LedgerHandle` and `ptmd::store::LedgerStore`).
//!
//! # Aggregate Invariant
//!
//! For every record, `total_seconds == sum(daily_seconds)`. Increments keep it
//! by construction: the elapsed time is split into whole-second parts, one per
//! local calendar day, and the parts always add up to the increment.

use std::collections::BTreeMap;
use std::iter::Sum;

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CatalogId, DomainError, DomainResult, TimeWindow, WeekMode};

// ============================================================================
// Playtime Record
// ============================================================================

/// Durable playtime history of one game.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaytimeRecord {
    #[serde(default)]
    total_seconds: u64,
    #[serde(default)]
    daily_seconds: BTreeMap<NaiveDate, u64>,
    #[serde(default)]
    last_opened_at: Option<DateTime<Local>>,
    #[serde(default)]
    last_closed_at: Option<DateTime<Local>>,
}

impl PlaytimeRecord {
    pub fn total_seconds(&self) -> u64 {
        self.total_seconds
    }

    pub fn daily_seconds(&self) -> &BTreeMap<NaiveDate, u64> {
        &self.daily_seconds
    }

    pub fn last_opened_at(&self) -> Option<DateTime<Local>> {
        self.last_opened_at
    }

    pub fn last_closed_at(&self) -> Option<DateTime<Local>> {
        self.last_closed_at
    }

    /// Seconds recorded on a single date.
    pub fn seconds_on(&self, date: NaiveDate) -> u64 {
        self.daily_seconds.get(&date).copied().unwrap_or(0)
    }

    /// Seconds recorded between two dates, both inclusive.
    pub fn seconds_between(&self, first: NaiveDate, last: NaiveDate) -> u64 {
        if first > last {
            return 0;
        }
        self.daily_seconds
            .range(first..=last)
            .fold(0u64, |acc, (_, secs)| acc.saturating_add(*secs))
    }

    /// Sum of all daily entries. Equals `total_seconds` for a consistent record.
    pub fn daily_sum(&self) -> u64 {
        self.daily_seconds
            .values()
            .fold(0u64, |acc, secs| acc.saturating_add(*secs))
    }

    /// Seconds in the given window, relative to `today`.
    pub fn seconds_in(&self, window: TimeWindow, today: NaiveDate, week_mode: WeekMode) -> u64 {
        match window {
            TimeWindow::Today => self.seconds_on(today),
            TimeWindow::ThisWeek => self.seconds_between(week_mode.week_start(today), today),
            TimeWindow::Total => self.total_seconds,
        }
    }

    fn add(&mut self, elapsed_secs: u64, closed_at: DateTime<Local>) {
        for (date, secs) in split_by_day(elapsed_secs, closed_at) {
            let slot = self.daily_seconds.entry(date).or_insert(0);
            *slot = slot.saturating_add(secs);
        }
        self.total_seconds = self.total_seconds.saturating_add(elapsed_secs);
        self.last_closed_at = Some(closed_at);
    }
}

/// Today / this week / total for one game, or summed over several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlaytimeTotals {
    pub today: u64,
    pub this_week: u64,
    pub total: u64,
}

impl<'a> Sum<&'a PlaytimeTotals> for PlaytimeTotals {
    fn sum<I: Iterator<Item = &'a PlaytimeTotals>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, totals| Self {
            today: acc.today.saturating_add(totals.today),
            this_week: acc.this_week.saturating_add(totals.this_week),
            total: acc.total.saturating_add(totals.total),
        })
    }
}

// ============================================================================
// Day Splitting
// ============================================================================

/// Local midnight at the start of `date`.
///
/// `None` when midnight does not exist locally (a DST gap at 00:00).
fn local_midnight(date: NaiveDate) -> Option<DateTime<Local>> {
    Local
        .from_local_datetime(&date.and_time(NaiveTime::MIN))
        .earliest()
}

/// Splits an interval ending at `closed_at` into whole seconds per local date.
///
/// Walks backwards from the close time one day at a time. Parts are returned
/// newest first and always sum to `elapsed_secs`.
fn split_by_day(elapsed_secs: u64, closed_at: DateTime<Local>) -> Vec<(NaiveDate, u64)> {
    let mut parts = Vec::new();
    let mut remaining = elapsed_secs;
    let mut day = closed_at.date_naive();
    let mut end = closed_at;

    while remaining > 0 {
        let Some(day_start) = local_midnight(day) else {
            parts.push((day, remaining));
            break;
        };

        let available = u64::try_from((end - day_start).num_seconds()).unwrap_or(0);
        let take = available.min(remaining);
        if take > 0 {
            parts.push((day, take));
            remaining -= take;
        }
        if remaining == 0 {
            break;
        }

        match day.pred_opt() {
            Some(previous) => {
                day = previous;
                end = day_start;
            }
            None => {
                parts.push((day, remaining));
                break;
            }
        }
    }

    parts
}

// ============================================================================
// Ledger
// ============================================================================

/// Mapping from catalog id to playtime record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ledger {
    records: BTreeMap<CatalogId, PlaytimeRecord>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a ledger from previously persisted records.
    ///
    /// Does not validate; call [`Ledger::validate`] on untrusted input.
    pub fn from_records(records: BTreeMap<CatalogId, PlaytimeRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &BTreeMap<CatalogId, PlaytimeRecord> {
        &self.records
    }

    pub fn record(&self, catalog_id: &CatalogId) -> Option<&PlaytimeRecord> {
        self.records.get(catalog_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Notes that a session for this game has started.
    pub fn record_open(&mut self, catalog_id: &CatalogId, opened_at: DateTime<Local>) {
        let record = self.records.entry(catalog_id.clone()).or_default();
        record.last_opened_at = Some(opened_at);
    }

    /// Adds a closed session's elapsed time.
    ///
    /// The interval `[closed_at - elapsed_secs, closed_at]` is attributed to
    /// the local dates it actually covered.
    pub fn increment(
        &mut self,
        catalog_id: &CatalogId,
        elapsed_secs: u64,
        closed_at: DateTime<Local>,
    ) {
        let record = self.records.entry(catalog_id.clone()).or_default();
        record.add(elapsed_secs, closed_at);
        debug!(
            catalog_id = %catalog_id,
            elapsed_secs,
            total_seconds = record.total_seconds,
            "Applied playtime increment"
        );
    }

    /// Seconds for one game in a window. Unknown games have zero.
    pub fn query(
        &self,
        catalog_id: &CatalogId,
        window: TimeWindow,
        today: NaiveDate,
        week_mode: WeekMode,
    ) -> u64 {
        self.records
            .get(catalog_id)
            .map(|record| record.seconds_in(window, today, week_mode))
            .unwrap_or(0)
    }

    /// Totals for every game, ordered by catalog id.
    pub fn list_all(&self, today: NaiveDate, week_mode: WeekMode) -> Vec<(CatalogId, PlaytimeTotals)> {
        self.records
            .iter()
            .map(|(id, record)| {
                let totals = PlaytimeTotals {
                    today: record.seconds_in(TimeWindow::Today, today, week_mode),
                    this_week: record.seconds_in(TimeWindow::ThisWeek, today, week_mode),
                    total: record.total_seconds,
                };
                (id.clone(), totals)
            })
            .collect()
    }

    /// Totals for every game, most played today first. Ties are ordered by
    /// catalog id.
    pub fn list_by_today(
        &self,
        today: NaiveDate,
        week_mode: WeekMode,
    ) -> Vec<(CatalogId, PlaytimeTotals)> {
        let mut all = self.list_all(today, week_mode);
        all.sort_by(|a, b| b.1.today.cmp(&a.1.today).then_with(|| a.0.cmp(&b.0)));
        all
    }

    /// Games played today, most played first. Ties are ordered by catalog id.
    pub fn today_ranking(&self, today: NaiveDate) -> Vec<(CatalogId, u64)> {
        let mut ranking: Vec<(CatalogId, u64)> = self
            .records
            .iter()
            .map(|(id, record)| (id.clone(), record.seconds_on(today)))
            .filter(|(_, secs)| *secs > 0)
            .collect();
        ranking.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranking
    }

    /// Checks the aggregate invariant on every record.
    pub fn validate(&self) -> DomainResult<()> {
        for (id, record) in &self.records {
            let daily_sum = record.daily_sum();
            if daily_sum != record.total_seconds {
                return Err(DomainError::InconsistentRecord {
                    catalog_id: id.clone(),
                    total_seconds: record.total_seconds,
                    daily_sum,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, min, s).single().unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn id(s: &str) -> CatalogId {
        CatalogId::new(s)
    }

    #[test]
    fn test_increment_creates_record() {
        let mut ledger = Ledger::new();
        let closed = at(2024, 3, 14, 10, 2, 5);
        ledger.increment(&id("G1"), 125, closed);

        let record = ledger.record(&id("G1")).unwrap();
        assert_eq!(record.total_seconds(), 125);
        assert_eq!(record.seconds_on(date(2024, 3, 14)), 125);
        assert_eq!(record.last_closed_at(), Some(closed));
        assert_eq!(record.last_opened_at(), None);
    }

    #[test]
    fn test_record_open_sets_last_opened() {
        let mut ledger = Ledger::new();
        let opened = at(2024, 3, 14, 10, 0, 0);
        ledger.record_open(&id("G1"), opened);

        let record = ledger.record(&id("G1")).unwrap();
        assert_eq!(record.last_opened_at(), Some(opened));
        assert_eq!(record.total_seconds(), 0);
        assert!(ledger.validate().is_ok());
    }

    #[test]
    fn test_midnight_split() {
        let mut ledger = Ledger::new();
        let opened = at(2024, 3, 14, 23, 59, 50);
        let closed = at(2024, 3, 15, 0, 0, 10);
        let elapsed = (closed - opened).num_seconds() as u64;
        ledger.increment(&id("G1"), elapsed, closed);

        let record = ledger.record(&id("G1")).unwrap();
        assert_eq!(record.seconds_on(date(2024, 3, 14)), 10);
        assert_eq!(record.seconds_on(date(2024, 3, 15)), 10);
        assert_eq!(record.total_seconds(), 20);
    }

    #[test]
    fn test_multi_day_split() {
        let mut ledger = Ledger::new();
        let opened = at(2024, 3, 12, 22, 0, 0);
        let closed = at(2024, 3, 14, 1, 0, 0);
        let elapsed = (closed - opened).num_seconds() as u64;
        ledger.increment(&id("G1"), elapsed, closed);

        let record = ledger.record(&id("G1")).unwrap();
        assert_eq!(record.seconds_on(date(2024, 3, 12)), 2 * 3600);
        assert_eq!(record.seconds_on(date(2024, 3, 13)), 24 * 3600);
        assert_eq!(record.seconds_on(date(2024, 3, 14)), 3600);
        assert_eq!(record.total_seconds(), elapsed);
    }

    #[test]
    fn test_close_exactly_at_midnight_belongs_to_previous_day() {
        let mut ledger = Ledger::new();
        ledger.increment(&id("G1"), 30, at(2024, 3, 15, 0, 0, 0));

        let record = ledger.record(&id("G1")).unwrap();
        assert_eq!(record.seconds_on(date(2024, 3, 14)), 30);
        assert!(!record.daily_seconds().contains_key(&date(2024, 3, 15)));
    }

    #[test]
    fn test_sub_second_close_time_keeps_invariant() {
        let mut ledger = Ledger::new();
        let closed = at(2024, 3, 15, 0, 0, 10) + Duration::milliseconds(700);
        ledger.increment(&id("G1"), 20, closed);

        let record = ledger.record(&id("G1")).unwrap();
        assert_eq!(record.seconds_on(date(2024, 3, 15)), 10);
        assert_eq!(record.seconds_on(date(2024, 3, 14)), 10);
        assert!(ledger.validate().is_ok());
    }

    #[test]
    fn test_zero_increment_updates_close_only() {
        let mut ledger = Ledger::new();
        let closed = at(2024, 3, 14, 12, 0, 0);
        ledger.increment(&id("G1"), 0, closed);

        let record = ledger.record(&id("G1")).unwrap();
        assert_eq!(record.total_seconds(), 0);
        assert!(record.daily_seconds().is_empty());
        assert_eq!(record.last_closed_at(), Some(closed));
    }

    #[test]
    fn test_invariant_holds_after_many_increments() {
        let mut ledger = Ledger::new();
        let mut closed = at(2024, 3, 1, 0, 0, 0);
        for i in 0..200u64 {
            let elapsed = (i * 7919) % 100_000;
            closed += Duration::seconds(((i * 104_729) % 90_000) as i64 + elapsed as i64);
            let game = if i % 3 == 0 { "A" } else { "B" };
            ledger.increment(&id(game), elapsed, closed);
            assert!(ledger.validate().is_ok(), "invariant broken at step {i}");
        }
    }

    #[test]
    fn test_query_windows() {
        let mut ledger = Ledger::new();
        // 2024-03-14 is a Thursday
        ledger.increment(&id("G1"), 100, at(2024, 3, 14, 12, 0, 0));
        ledger.increment(&id("G1"), 50, at(2024, 3, 11, 12, 0, 0));
        ledger.increment(&id("G1"), 25, at(2024, 3, 9, 12, 0, 0));
        ledger.increment(&id("G1"), 10, at(2024, 3, 1, 12, 0, 0));

        let today = date(2024, 3, 14);
        let g1 = id("G1");
        assert_eq!(ledger.query(&g1, TimeWindow::Today, today, WeekMode::Rolling), 100);
        assert_eq!(ledger.query(&g1, TimeWindow::ThisWeek, today, WeekMode::Rolling), 175);
        assert_eq!(
            ledger.query(&g1, TimeWindow::ThisWeek, today, WeekMode::CalendarMonday),
            150
        );
        assert_eq!(ledger.query(&g1, TimeWindow::Total, today, WeekMode::Rolling), 185);
        assert_eq!(
            ledger.query(&id("nope"), TimeWindow::Total, today, WeekMode::Rolling),
            0
        );
    }

    #[test]
    fn test_list_all_and_ranking() {
        let mut ledger = Ledger::new();
        let noon = at(2024, 3, 14, 12, 0, 0);
        ledger.increment(&id("B"), 300, noon);
        ledger.increment(&id("A"), 300, noon);
        ledger.increment(&id("C"), 900, noon);
        ledger.increment(&id("D"), 60, at(2024, 3, 13, 12, 0, 0));

        let today = date(2024, 3, 14);
        let ranking = ledger.today_ranking(today);
        let ids: Vec<&str> = ranking.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["C", "A", "B"]);
        assert_eq!(ranking[0].1, 900);

        let all = ledger.list_all(today, WeekMode::Rolling);
        assert_eq!(all.len(), 4);
        let (d_id, d_totals) = &all[3];
        assert_eq!(d_id.as_str(), "D");
        assert_eq!(
            *d_totals,
            PlaytimeTotals {
                today: 0,
                this_week: 60,
                total: 60
            }
        );
    }

    #[test]
    fn test_list_by_today_orders_and_sums() {
        let mut ledger = Ledger::new();
        let noon = at(2024, 3, 14, 12, 0, 0);
        ledger.increment(&id("A"), 120, noon);
        ledger.increment(&id("B"), 600, noon);
        ledger.increment(&id("C"), 120, noon);
        ledger.increment(&id("D"), 3600, at(2024, 3, 12, 12, 0, 0));
        ledger.increment(&id("E"), 45, at(2024, 2, 1, 12, 0, 0));

        let today = date(2024, 3, 14);
        let rows = ledger.list_by_today(today, WeekMode::CalendarMonday);
        let ids: Vec<&str> = rows.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A", "C", "D", "E"]);

        let overall: PlaytimeTotals = rows.iter().map(|(_, totals)| totals).sum();
        assert_eq!(
            overall,
            PlaytimeTotals {
                today: 840,
                this_week: 4440,
                total: 4485
            }
        );
        let empty: PlaytimeTotals = std::iter::empty::<&PlaytimeTotals>().sum();
        assert_eq!(empty, PlaytimeTotals::default());
    }

    #[test]
    fn test_validate_detects_mismatch() {
        let mut records = BTreeMap::new();
        records.insert(
            id("G1"),
            PlaytimeRecord {
                total_seconds: 99,
                daily_seconds: BTreeMap::from([(date(2024, 3, 14), 10)]),
                last_opened_at: None,
                last_closed_at: None,
            },
        );
        let ledger = Ledger::from_records(records);
        assert_eq!(
            ledger.validate(),
            Err(DomainError::InconsistentRecord {
                catalog_id: id("G1"),
                total_seconds: 99,
                daily_sum: 10,
            })
        );
    }

    #[test]
    fn test_record_serde_uses_camel_case_and_ignores_unknown() {
        let json = r#"{
            "totalSeconds": 20,
            "dailySeconds": {"2024-03-14": 10, "2024-03-15": 10},
            "lastOpenedAt": null,
            "futureField": {"nested": true}
        }"#;
        let record: PlaytimeRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.total_seconds(), 20);
        assert_eq!(record.seconds_on(date(2024, 3, 15)), 10);
        assert_eq!(record.last_closed_at(), None);

        let out = serde_json::to_value(&record).unwrap();
        assert!(out.get("totalSeconds").is_some());
        assert!(out.get("dailySeconds").is_some());
    }
}
