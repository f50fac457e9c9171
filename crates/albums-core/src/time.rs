//! Month-bucket time helpers
//!
//! The log store partitions by calendar month. `MonthKey` is the bucket
//! key: it renders as `yyyy-MM`, orders chronologically, and knows its
//! own start/end instants for range intersection.

use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A calendar month bucket, e.g. `2024-03`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonthKey {
    /// Calendar year
    pub year: i32,
    /// Calendar month, 1-12
    pub month: u32,
}

impl MonthKey {
    /// Bucket for a given timestamp
    pub fn of(at: NaiveDateTime) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    /// Bucket for the current wall-clock time
    pub fn current() -> Self {
        Self::of(chrono::Local::now().naive_local())
    }

    /// First instant of the month
    pub fn start(&self) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .unwrap_or(NaiveDate::MIN)
            .and_hms_opt(0, 0, 0)
            .unwrap_or(NaiveDateTime::MIN)
    }

    /// First instant of the following month
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Last instant of the month (second precision, matching the log format)
    pub fn end(&self) -> NaiveDateTime {
        self.next().start() - chrono::Duration::seconds(1)
    }

    /// Parse a `yyyy-MM` string
    pub fn parse(s: &str) -> Option<Self> {
        let (year, month) = s.split_once('-')?;
        let year: i32 = year.parse().ok()?;
        let month: u32 = month.parse().ok()?;
        if !(1..=12).contains(&month) {
            return None;
        }
        Some(Self { year, month })
    }

    /// All months from `start` through `end`, inclusive
    pub fn range_inclusive(start: Self, end: Self) -> Vec<Self> {
        let mut months = Vec::new();
        let mut cursor = start;
        while cursor <= end {
            months.push(cursor);
            cursor = cursor.next();
        }
        months
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}
