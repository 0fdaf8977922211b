use chrono::{Datelike, NaiveDate, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

static ISO_WEEK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-W(\d{2})$").expect("static ISO week pattern"));

/// Date layouts accepted by the week column, tried in order.
pub const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IsoWeekError {
    #[error("'{0}' does not match YYYY-Www")]
    Malformed(String),

    #[error("week {week} does not exist in ISO year {year}")]
    OutOfRange { year: i32, week: u32 },
}

/// An ISO-8601 calendar week: Monday start, week 1 holds the year's first Thursday.
///
/// Ordering is chronological (year, then week), which is what the published
/// artifact sorts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IsoWeek {
    year: i32,
    week: u32,
}

impl IsoWeek {
    pub fn new(year: i32, week: u32) -> Result<Self, IsoWeekError> {
        if !(0..=9999).contains(&year) || week == 0 || week > weeks_in_year(year) {
            return Err(IsoWeekError::OutOfRange { year, week });
        }
        Ok(Self { year, week })
    }

    /// The ISO week containing `date`.
    pub fn from_date(date: NaiveDate) -> Self {
        let w = date.iso_week();
        Self {
            year: w.year(),
            week: w.week(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn week(&self) -> u32 {
        self.week
    }

    /// Monday of this week.
    pub fn monday(&self) -> Option<NaiveDate> {
        NaiveDate::from_isoywd_opt(self.year, self.week, Weekday::Mon)
    }
}

/// Number of ISO weeks (52 or 53) in `year`. December 28th always falls in
/// the last week of its ISO year.
pub fn weeks_in_year(year: i32) -> u32 {
    NaiveDate::from_ymd_opt(year, 12, 28)
        .map(|d| d.iso_week().week())
        .unwrap_or(52)
}

/// Parse a calendar date in any of [`DATE_FORMATS`].
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

impl fmt::Display for IsoWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-W{:02}", self.year, self.week)
    }
}

impl FromStr for IsoWeek {
    type Err = IsoWeekError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = ISO_WEEK_PATTERN
            .captures(s)
            .ok_or_else(|| IsoWeekError::Malformed(s.to_string()))?;
        let year: i32 = caps[1]
            .parse()
            .map_err(|_| IsoWeekError::Malformed(s.to_string()))?;
        let week: u32 = caps[2]
            .parse()
            .map_err(|_| IsoWeekError::Malformed(s.to_string()))?;
        Self::new(year, week)
    }
}

impl Serialize for IsoWeek {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IsoWeek {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
