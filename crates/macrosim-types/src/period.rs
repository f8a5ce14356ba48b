//! Simulated calendar time.
//!
//! A [`Period`] is one tick of the simulation: a step counter anchored to a
//! calendar origin. Every step is exactly one calendar month, so the year
//! and month of a period are derived from the step count and never stored
//! independently. The step index is the source of truth for ordering.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Number of months in a calendar year.
const MONTHS_PER_YEAR: i64 = 12;

/// A calendar month (year plus month number 1-12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    /// Create a calendar month. Returns `None` if `month` is not in `1..=12`.
    pub const fn new(year: i32, month: u32) -> Option<Self> {
        if month == 0 || month > 12 {
            return None;
        }
        Some(Self { year, month })
    }

    /// The calendar year.
    pub const fn year(self) -> i32 {
        self.year
    }

    /// The month number, 1 (January) to 12 (December).
    pub const fn month(self) -> u32 {
        self.month
    }

    /// Months elapsed since year 0, month 1.
    fn ordinal(self) -> i64 {
        let month_offset = i64::from(self.month).saturating_sub(1);
        i64::from(self.year)
            .saturating_mul(MONTHS_PER_YEAR)
            .saturating_add(month_offset)
    }

    /// Rebuild a calendar month from an ordinal produced by [`Self::ordinal`].
    fn from_ordinal(ordinal: i64) -> Self {
        let year = i32::try_from(ordinal.div_euclid(MONTHS_PER_YEAR)).unwrap_or(i32::MAX);
        let month = u32::try_from(ordinal.rem_euclid(MONTHS_PER_YEAR).saturating_add(1))
            .unwrap_or(1);
        Self { year, month }
    }
}

impl Default for YearMonth {
    fn default() -> Self {
        Self {
            year: 2000,
            month: 1,
        }
    }
}

impl core::fmt::Display for YearMonth {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// One discrete simulated time step.
///
/// Periods are immutable values. The Circuit owns the single current period
/// and hands it to every phase call by reference; no global accessor exists.
///
/// Two periods compare by their step index. Periods of a single run share
/// the same origin, so the derived calendar fields order the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    step: u64,
    origin: YearMonth,
}

impl Period {
    /// Create the period `step` months after `origin`.
    pub const fn new(step: u64, origin: YearMonth) -> Self {
        Self { step, origin }
    }

    /// The first period of a run starting at `origin`.
    pub const fn first(origin: YearMonth) -> Self {
        Self { step: 0, origin }
    }

    /// Zero-based step index.
    pub const fn step(&self) -> u64 {
        self.step
    }

    /// The calendar month of step 0.
    pub const fn origin(&self) -> YearMonth {
        self.origin
    }

    /// The period immediately after this one, or `None` on step overflow.
    pub fn next(&self) -> Option<Self> {
        self.step.checked_add(1).map(|step| Self {
            step,
            origin: self.origin,
        })
    }

    /// The calendar month of this period.
    pub fn calendar(&self) -> YearMonth {
        let step = i64::try_from(self.step).unwrap_or(i64::MAX);
        YearMonth::from_ordinal(self.origin.ordinal().saturating_add(step))
    }

    /// The calendar year of this period.
    pub fn year(&self) -> i32 {
        self.calendar().year()
    }

    /// The month number (1-12) of this period.
    pub fn month(&self) -> u32 {
        self.calendar().month()
    }

    /// Signed number of steps from `self` to `other` (positive if `other`
    /// is later).
    pub fn distance_to(&self, other: &Self) -> i64 {
        let from = i64::try_from(self.step).unwrap_or(i64::MAX);
        let to = i64::try_from(other.step).unwrap_or(i64::MAX);
        to.saturating_sub(from)
    }

    /// The first calendar day of this period's month.
    pub fn first_day(&self) -> Option<NaiveDate> {
        let calendar = self.calendar();
        NaiveDate::from_ymd_opt(calendar.year(), calendar.month(), 1)
    }
}

impl PartialOrd for Period {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Period {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.step
            .cmp(&other.step)
            .then_with(|| self.origin.cmp(&other.origin))
    }
}

impl core::fmt::Display for Period {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.calendar())
    }
}
