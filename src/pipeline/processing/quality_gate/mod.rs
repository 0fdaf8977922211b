use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::constants::{DEFAULT_MAX_REJECTED_RATIO, DEFAULT_MIN_RECORDS};
use crate::domain::iso_week::IsoWeekError;
use crate::domain::{CanonicalRecord, IsoWeek, Metric, Pathogen};
use crate::error::{ConfigError, ThresholdExceededError};
use crate::pipeline::processing::normalize::{CandidateValue, RecordCandidate};
use crate::registry::FeedDescriptor;

/// Record fields the validator can reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Source,
    IsoWeek,
    Country,
    Pathogen,
    Metric,
    Value,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Source => "source",
            Field::IsoWeek => "iso_week",
            Field::Country => "country",
            Field::Pathogen => "pathogen",
            Field::Metric => "metric",
            Field::Value => "value",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Required field absent or empty
    Missing,
    /// Present but not coercible to the field's type
    WrongType,
    /// Outside the declared numeric or calendar range
    OutOfRange,
    /// Not a member of the field's enumeration
    UnknownVariant,
    /// Does not match the field's textual pattern
    Malformed,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Missing => "missing",
            RejectReason::WrongType => "wrong_type",
            RejectReason::OutOfRange => "out_of_range",
            RejectReason::UnknownVariant => "unknown_variant",
            RejectReason::Malformed => "malformed",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single row failed the record schema.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {reason} ({detail})")]
pub struct ValidationError {
    pub field: Field,
    pub reason: RejectReason,
    pub detail: String,
}

impl ValidationError {
    pub fn new(field: Field, reason: RejectReason, detail: impl Into<String>) -> Self {
        Self {
            field,
            reason,
            detail: detail.into(),
        }
    }

    fn missing(field: Field) -> Self {
        Self::new(field, RejectReason::Missing, "no value")
    }
}

/// Trait for implementing record schema checks
pub trait Validator {
    fn validate(&self, candidate: &RecordCandidate) -> Result<CanonicalRecord, ValidationError>;
}

/// Enforces the canonical record schema for one feed's declared scope.
pub struct SchemaValidator {
    countries: BTreeSet<String>,
}

impl SchemaValidator {
    pub fn new<I, S>(countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            countries: countries.into_iter().map(Into::into).collect(),
        }
    }

    pub fn for_feed(feed: &FeedDescriptor) -> Self {
        Self::new(feed.in_scope_codes())
    }

    fn check_week(raw: Option<&str>) -> Result<IsoWeek, ValidationError> {
        let raw = raw.ok_or_else(|| ValidationError::missing(Field::IsoWeek))?;
        raw.parse::<IsoWeek>().map_err(|e| match e {
            IsoWeekError::Malformed(_) => {
                ValidationError::new(Field::IsoWeek, RejectReason::Malformed, e.to_string())
            }
            IsoWeekError::OutOfRange { .. } => {
                ValidationError::new(Field::IsoWeek, RejectReason::OutOfRange, e.to_string())
            }
        })
    }

    fn check_country(&self, raw: Option<&str>) -> Result<String, ValidationError> {
        let raw = raw.ok_or_else(|| ValidationError::missing(Field::Country))?;
        let well_formed = raw.len() == 2 && raw.bytes().all(|b| b.is_ascii_uppercase());
        if !well_formed || !self.countries.contains(raw) {
            return Err(ValidationError::new(
                Field::Country,
                RejectReason::UnknownVariant,
                format!("'{raw}' is not one of {:?}", self.countries),
            ));
        }
        Ok(raw.to_string())
    }

    fn check_enum<T>(field: Field, raw: Option<&str>) -> Result<T, ValidationError>
    where
        T: std::str::FromStr,
        T::Err: fmt::Display,
    {
        let raw = raw.ok_or_else(|| ValidationError::missing(field))?;
        raw.parse::<T>()
            .map_err(|e| ValidationError::new(field, RejectReason::UnknownVariant, e.to_string()))
    }

    /// Country and value checks shared with audits of published records.
    pub fn check_record(&self, record: &CanonicalRecord) -> Result<(), ValidationError> {
        self.check_country(Some(&record.country))?;
        check_value(record.metric, record.value)?;
        Ok(())
    }
}

/// Range rules for a numeric value of `metric`. Returns the value with
/// negative zero folded to zero.
pub fn check_value(metric: Metric, value: f64) -> Result<f64, ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::new(
            Field::Value,
            RejectReason::OutOfRange,
            format!("{value} is not finite"),
        ));
    }
    if value < 0.0 {
        return Err(ValidationError::new(
            Field::Value,
            RejectReason::OutOfRange,
            format!("{value} is negative"),
        ));
    }
    if let Some(max) = metric.upper_bound() {
        if value > max {
            return Err(ValidationError::new(
                Field::Value,
                RejectReason::OutOfRange,
                format!("{value} exceeds {max} for {metric}"),
            ));
        }
    }
    Ok(if value == 0.0 { 0.0 } else { value })
}

impl Validator for SchemaValidator {
    fn validate(&self, candidate: &RecordCandidate) -> Result<CanonicalRecord, ValidationError> {
        let iso_week = Self::check_week(candidate.iso_week.as_deref())?;
        let country = self.check_country(candidate.country.as_deref())?;
        let pathogen: Pathogen = Self::check_enum(Field::Pathogen, candidate.pathogen.as_deref())?;
        let metric: Metric = Self::check_enum(Field::Metric, candidate.metric.as_deref())?;
        let value = match &candidate.value {
            CandidateValue::Missing => return Err(ValidationError::missing(Field::Value)),
            CandidateValue::Text(text) => {
                return Err(ValidationError::new(
                    Field::Value,
                    RejectReason::WrongType,
                    format!("'{text}' is not a number"),
                ))
            }
            CandidateValue::Number(n) => check_value(metric, *n)?,
        };

        Ok(CanonicalRecord {
            source: candidate.source,
            iso_week,
            country,
            pathogen,
            metric,
            value,
        })
    }
}

/// When a feed's rejections make its valid remainder untrustworthy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    /// Highest tolerated share of rejected rows among rows in scope.
    pub max_rejected_ratio: f64,
    /// Highest tolerated absolute number of rejected rows.
    pub max_rejected_count: Option<usize>,
    /// Fewest valid records a feed must yield.
    pub min_records: usize,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            max_rejected_ratio: DEFAULT_MAX_REJECTED_RATIO,
            max_rejected_count: None,
            min_records: DEFAULT_MIN_RECORDS,
        }
    }
}

impl ValidationPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.max_rejected_ratio) {
            return Err(ConfigError::Invalid(format!(
                "validation.max_rejected_ratio must be within [0, 1], got {}",
                self.max_rejected_ratio
            )));
        }
        Ok(())
    }

    pub fn check(&self, accepted: usize, rejected: usize) -> Result<(), ThresholdExceededError> {
        let considered = accepted + rejected;
        let exceeded = |limit: String| ThresholdExceededError {
            rejected,
            considered,
            accepted,
            limit,
        };

        if let Some(max) = self.max_rejected_count {
            if rejected > max {
                return Err(exceeded(format!("more than {max} rejected rows")));
            }
        }
        if considered > 0 {
            let ratio = rejected as f64 / considered as f64;
            if ratio > self.max_rejected_ratio {
                return Err(exceeded(format!(
                    "rejection ratio {:.3} above {:.3}",
                    ratio, self.max_rejected_ratio
                )));
            }
        }
        if accepted < self.min_records {
            return Err(exceeded(format!(
                "fewer than {} valid records",
                self.min_records
            )));
        }
        Ok(())
    }
}
