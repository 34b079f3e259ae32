//! Query windows over a record's daily breakdown.

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::DomainError;

/// Time span a playtime query sums over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    /// The current local calendar date
    Today,
    /// The current week, as defined by [`WeekMode`]
    ThisWeek,
    /// Everything ever recorded
    Total,
}

impl TimeWindow {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::ThisWeek => "this week",
            Self::Total => "total",
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// What "this week" means.
///
/// Fixed by configuration rather than guessed from locale. The default is
/// the ISO week (Monday through Sunday).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekMode {
    /// Today plus the six preceding days
    Rolling,
    /// Calendar week starting on Monday
    #[default]
    CalendarMonday,
    /// Calendar week starting on Sunday
    CalendarSunday,
}

impl WeekMode {
    /// First date (inclusive) of the week containing `today`.
    #[must_use]
    pub fn week_start(&self, today: NaiveDate) -> NaiveDate {
        let back = match self {
            Self::Rolling => 6,
            Self::CalendarMonday => u64::from(today.weekday().num_days_from_monday()),
            Self::CalendarSunday => u64::from(today.weekday().num_days_from_sunday()),
        };
        today
            .checked_sub_days(Days::new(back))
            .unwrap_or(NaiveDate::MIN)
    }

    /// Returns true if `date` falls inside the week ending at `today`.
    ///
    /// Dates after `today` are never inside the window.
    #[must_use]
    pub fn contains(&self, date: NaiveDate, today: NaiveDate) -> bool {
        date >= self.week_start(today) && date <= today
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rolling => "rolling",
            Self::CalendarMonday => "calendar_monday",
            Self::CalendarSunday => "calendar_sunday",
        }
    }
}

impl FromStr for WeekMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rolling" => Ok(Self::Rolling),
            "calendar_monday" | "monday" => Ok(Self::CalendarMonday),
            "calendar_sunday" | "sunday" => Ok(Self::CalendarSunday),
            other => Err(DomainError::InvalidFieldValue {
                field: "week_mode".to_string(),
                value: other.to_string(),
                expected: "rolling, calendar_monday or calendar_sunday".to_string(),
            }),
        }
    }
}
