use std::fmt;
use std::str::FromStr;

use chrono::{Month, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A ledger period: one calendar month of one year.
///
/// Ordering is by `(year, month)`, which is the same as ordering by
/// [`Period::ordinal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if !(1900..=9999).contains(&year) || !(1..=12).contains(&month) {
            return None;
        }
        Some(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Months since year 0, used for adjacency and sorting.
    pub fn ordinal(&self) -> i64 {
        i64::from(self.year) * 12 + i64::from(self.month) - 1
    }

    pub fn next(&self) -> Period {
        if self.month == 12 {
            Period { year: self.year + 1, month: 1 }
        } else {
            Period { year: self.year, month: self.month + 1 }
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next().first_day().pred_opt().unwrap_or(NaiveDate::MIN)
    }

    /// Whether `ts` falls inside `[first day 00:00, first day of next month 00:00)`.
    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        let date = ts.date();
        date >= self.first_day() && date < self.next().first_day()
    }

    /// Build a period from the ledger's separate year and month labels.
    ///
    /// Month labels seen in payroll sheets: `8`, `08`, `8월`, `Aug`, `August`.
    /// A combined `2025-08` in the month column wins over the year column.
    pub fn from_labels(year: &str, month: &str) -> Option<Period> {
        let month = month.trim();
        if month.contains('-') || month.contains('/') {
            return month.parse().ok();
        }
        let year = parse_year(year)?;
        Period::new(year, parse_month_label(month)?)
    }
}

fn parse_year(label: &str) -> Option<i32> {
    let label = label.trim();
    let label = label.strip_suffix('년').unwrap_or(label).trim();
    label.parse().ok()
}

fn parse_month_label(label: &str) -> Option<u32> {
    let label = label.strip_suffix('월').unwrap_or(label).trim();
    if label.is_empty() {
        return None;
    }
    if let Ok(n) = label.parse::<u32>() {
        return Some(n);
    }
    Month::from_str(label).ok().map(|m| m.number_from_month())
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodParseError(pub String);

impl fmt::Display for PeriodParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid period '{}' (expected YYYY-MM)", self.0)
    }
}

impl std::error::Error for PeriodParseError {}

impl FromStr for Period {
    type Err = PeriodParseError;

    /// Accepts `YYYY-MM`, `YYYY-M`, and `YYYY/MM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || PeriodParseError(s.to_string());
        let (year, month) = s.trim().split_once(['-', '/']).ok_or_else(err)?;
        let year: i32 = year.trim().parse().map_err(|_| err())?;
        let month: u32 = month.trim().parse().map_err(|_| err())?;
        Period::new(year, month).ok_or_else(err)
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
