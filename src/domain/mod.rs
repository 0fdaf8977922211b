//! Canonical data shapes shared by every stage and by the published artifacts.

pub mod iso_week;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use iso_week::IsoWeek;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Originating feed of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "ECDC")]
    Ecdc,
}

impl Source {
    pub const ALL: &'static [Source] = &[Source::Ecdc];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Ecdc => "ECDC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Pathogen {
    #[serde(rename = "influenza")]
    Influenza,
    #[serde(rename = "RSV")]
    Rsv,
    #[serde(rename = "SARS-CoV-2")]
    SarsCov2,
}

impl Pathogen {
    pub const ALL: &'static [Pathogen] = &[Pathogen::Influenza, Pathogen::Rsv, Pathogen::SarsCov2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Pathogen::Influenza => "influenza",
            Pathogen::Rsv => "RSV",
            Pathogen::SarsCov2 => "SARS-CoV-2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    PositivityRate,
    Cases,
    Tests,
}

impl Metric {
    pub const ALL: &'static [Metric] = &[Metric::PositivityRate, Metric::Cases, Metric::Tests];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::PositivityRate => "positivity_rate",
            Metric::Cases => "cases",
            Metric::Tests => "tests",
        }
    }

    /// Inclusive upper bound on values of this metric, if any.
    pub fn upper_bound(&self) -> Option<f64> {
        match self {
            Metric::PositivityRate => Some(100.0),
            Metric::Cases | Metric::Tests => None,
        }
    }
}

macro_rules! canonical_names {
    ($ty:ty, $kind:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <$ty>::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| UnknownVariant {
                        kind: $kind,
                        value: s.to_string(),
                    })
            }
        }
    };
}

canonical_names!(Source, "source");
canonical_names!(Pathogen, "pathogen");
canonical_names!(Metric, "metric");

/// The unit of output: one weekly observation.
///
/// Field order here is the serialized field order of the published artifact
/// and therefore part of the content fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub source: Source,
    pub iso_week: IsoWeek,
    pub country: String,
    pub pathogen: Pathogen,
    pub metric: Metric,
    pub value: f64,
}

/// Uniqueness key of a published record. Derived ordering is the artifact's
/// sort order: week first, then the remaining key fields.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub iso_week: IsoWeek,
    pub source: Source,
    pub country: String,
    pub pathogen: Pathogen,
    pub metric: Metric,
}

impl CanonicalRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            iso_week: self.iso_week,
            source: self.source,
            country: self.country.clone(),
            pathogen: self.pathogen,
            metric: self.metric,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.source, self.iso_week, self.country, self.pathogen, self.metric
        )
    }
}

/// Status file published next to the artifact and read by the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDescriptor {
    /// Last successful fetch-and-validate cycle that produced the artifact.
    pub build_time: Option<DateTime<Utc>>,
    pub stale: bool,
    pub record_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
}

impl StatusDescriptor {
    pub fn fresh(build_time: DateTime<Utc>, record_count: usize, fingerprint: String) -> Self {
        Self {
            build_time: Some(build_time.trunc_subsecs(0)),
            stale: false,
            record_count,
            fingerprint: Some(fingerprint),
            degraded_reason: None,
        }
    }

    /// Status for a run that could not refresh: everything describing the
    /// published artifact is carried over from `previous`.
    pub fn degraded(previous: Option<&StatusDescriptor>, reason: impl Into<String>) -> Self {
        Self {
            build_time: previous.and_then(|p| p.build_time),
            stale: true,
            record_count: previous.map_or(0, |p| p.record_count),
            fingerprint: previous.and_then(|p| p.fingerprint.clone()),
            degraded_reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CanonicalRecord {
        CanonicalRecord {
            source: Source::Ecdc,
            iso_week: "2025-W37".parse().unwrap(),
            country: "IT".to_string(),
            pathogen: Pathogen::Influenza,
            metric: Metric::PositivityRate,
            value: 4.5,
        }
    }

    #[test]
    fn serializes_in_artifact_field_order() {
        let line = serde_json::to_string(&record()).unwrap();
        assert_eq!(
            line,
            r#"{"source":"ECDC","iso_week":"2025-W37","country":"IT","pathogen":"influenza","metric":"positivity_rate","value":4.5}"#
        );
    }

    #[test]
    fn canonical_names_round_trip() {
        for p in Pathogen::ALL {
            assert_eq!(p.as_str().parse::<Pathogen>().unwrap(), *p);
        }
        for m in Metric::ALL {
            assert_eq!(m.as_str().parse::<Metric>().unwrap(), *m);
        }
        let err = "Influenza".parse::<Pathogen>().unwrap_err();
        assert_eq!(err.kind, "pathogen");
    }

    #[test]
    fn degraded_status_keeps_previous_build() {
        let prev = StatusDescriptor::fresh(Utc::now(), 42, "sha256:ab".into());
        let degraded = StatusDescriptor::degraded(Some(&prev), "fetch timed out");
        assert!(degraded.stale);
        assert_eq!(degraded.build_time, prev.build_time);
        assert_eq!(degraded.record_count, 42);
        assert_eq!(degraded.fingerprint, prev.fingerprint);

        let first = StatusDescriptor::degraded(None, "unreachable");
        assert_eq!(first.build_time, None);
        assert_eq!(first.record_count, 0);
    }

    #[test]
    fn status_json_shape() {
        let status = StatusDescriptor::degraded(None, "x");
        let v = serde_json::to_value(&status).unwrap();
        assert!(v["build_time"].is_null());
        assert_eq!(v["stale"], true);
        assert_eq!(v["record_count"], 0);
        assert!(v.get("fingerprint").is_none());
    }
}
