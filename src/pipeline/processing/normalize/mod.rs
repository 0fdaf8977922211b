use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::domain::iso_week::{parse_date, IsoWeek};
use crate::domain::Source;
use crate::observability::metrics;
use crate::pipeline::processing::parser::{ParsedFeed, ParsedRow};
use crate::registry::FeedDescriptor;

/// A row mapped into the canonical shape but not yet validated.
///
/// Mapping never fails: anything the normalizer cannot interpret is carried
/// forward as-is so the validator can reject it with a field and reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordCandidate {
    /// Source line, for rejection logs.
    pub line: u64,
    pub source: Source,
    /// `YYYY-Www` when the cell was a date or already a week, else the raw cell.
    pub iso_week: Option<String>,
    pub country: Option<String>,
    /// Canonical pathogen name when the vocabulary matched, else the raw cell.
    pub pathogen: Option<String>,
    pub metric: Option<String>,
    pub value: CandidateValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CandidateValue {
    Missing,
    Number(f64),
    /// Text that did not coerce to a number.
    Text(String),
}

/// Why a row is outside the feed's declared scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    OutOfScope { country: String },
    NoObservation,
    Filtered { column: String },
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::OutOfScope { .. } => "out_of_scope",
            SkipReason::NoObservation => "no_observation",
            SkipReason::Filtered { .. } => "filtered",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NormalizeOutcome {
    Candidate(RecordCandidate),
    Skip(SkipReason),
}

/// Trait for normalizing parsed rows into canonical record candidates
pub trait Normalizer {
    fn normalize(&self, row: &ParsedRow) -> NormalizeOutcome;
}

/// Candidates of one feed plus skip counts by reason label.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub candidates: Vec<RecordCandidate>,
    pub skipped: BTreeMap<&'static str, usize>,
}

impl NormalizedBatch {
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }
}

/// The one normalizer; all feed-specific behavior comes from the descriptor.
pub struct FeedNormalizer<'a> {
    feed: &'a FeedDescriptor,
}

impl<'a> FeedNormalizer<'a> {
    pub fn new(feed: &'a FeedDescriptor) -> Self {
        Self { feed }
    }

    pub fn normalize_feed(&self, parsed: &ParsedFeed) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();
        for row in &parsed.rows {
            match self.normalize(row) {
                NormalizeOutcome::Candidate(c) => batch.candidates.push(c),
                NormalizeOutcome::Skip(reason) => {
                    *batch.skipped.entry(reason.label()).or_default() += 1;
                }
            }
        }
        metrics::normalize::batch_processed(batch.candidates.len(), &batch.skipped);
        debug!(
            "Normalized {} candidates, skipped {:?}",
            batch.candidates.len(),
            batch.skipped
        );
        batch
    }
}

fn non_empty(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Canonical week for a week-column cell: dates convert to the ISO week that
/// contains them, anything else passes through for validation.
pub fn normalize_week(raw: &str) -> Option<String> {
    let raw = non_empty(raw)?;
    match parse_date(raw) {
        Some(date) => Some(IsoWeek::from_date(date).to_string()),
        None => Some(raw.to_string()),
    }
}

/// Coerce a value cell. Missing-value tokens are handled by the caller.
pub fn coerce_value(raw: &str) -> CandidateValue {
    match non_empty(raw) {
        None => CandidateValue::Missing,
        Some(text) => match text.parse::<f64>() {
            Ok(n) => CandidateValue::Number(n),
            Err(_) => CandidateValue::Text(text.to_string()),
        },
    }
}

impl Normalizer for FeedNormalizer<'_> {
    fn normalize(&self, row: &ParsedRow) -> NormalizeOutcome {
        let feed = self.feed;
        let cols = &feed.columns;

        for filter in &feed.filters {
            let Some(cell) = row.cells.get(&filter.column) else {
                continue;
            };
            let cell = cell.trim();
            if !filter.values.iter().any(|v| v.eq_ignore_ascii_case(cell)) {
                return NormalizeOutcome::Skip(SkipReason::Filtered {
                    column: filter.column.clone(),
                });
            }
        }

        let country = match non_empty(row.get(&cols.country.name)) {
            None => None,
            Some(raw) => match feed.map_country(raw) {
                Some(code) => Some(code.to_string()),
                None => {
                    return NormalizeOutcome::Skip(SkipReason::OutOfScope {
                        country: raw.to_string(),
                    })
                }
            },
        };

        let raw_value = row.get(&cols.value.name);
        if feed.is_missing_value(raw_value) {
            return NormalizeOutcome::Skip(SkipReason::NoObservation);
        }

        let pathogen = non_empty(row.get(&cols.pathogen.name))
            .map(|raw| feed.map_pathogen(raw).unwrap_or(raw).to_string());
        let metric = non_empty(row.get(&cols.metric.name))
            .map(|raw| feed.map_metric(raw).unwrap_or(raw).to_string());

        NormalizeOutcome::Candidate(RecordCandidate {
            line: row.line,
            source: feed.source,
            iso_week: normalize_week(row.get(&cols.week.name)),
            country,
            pathogen,
            metric,
            value: coerce_value(raw_value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ColumnSpec, RowFilter};

    fn scenario_feed() -> FeedDescriptor {
        let mut feed = FeedDescriptor::ecdc_erviss();
        feed.columns.week = ColumnSpec::new("date");
        feed.columns.country = ColumnSpec::new("country");
        feed.columns.metric = ColumnSpec::new("metric");
        feed
    }

    fn row(cells: &[(&str, &str)]) -> ParsedRow {
        ParsedRow {
            line: 2,
            cells: cells.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    fn candidate(outcome: NormalizeOutcome) -> RecordCandidate {
        match outcome {
            NormalizeOutcome::Candidate(c) => c,
            other => panic!("expected candidate, got {other:?}"),
        }
    }

    #[test]
    fn maps_dated_row_to_canonical_shape() {
        let feed = scenario_feed();
        let c = candidate(FeedNormalizer::new(&feed).normalize(&row(&[
            ("date", "2025-09-08"),
            ("country", "IT"),
            ("pathogen", "influenza"),
            ("metric", "positivity_rate"),
            ("value", "4.5"),
        ])));
        assert_eq!(c.iso_week.as_deref(), Some("2025-W37"));
        assert_eq!(c.country.as_deref(), Some("IT"));
        assert_eq!(c.pathogen.as_deref(), Some("influenza"));
        assert_eq!(c.metric.as_deref(), Some("positivity_rate"));
        assert_eq!(c.value, CandidateValue::Number(4.5));
        assert_eq!(c.source, Source::Ecdc);
    }

    #[test]
    fn passes_week_strings_through() {
        assert_eq!(normalize_week("2025-W01").as_deref(), Some("2025-W01"));
        assert_eq!(normalize_week("31/12/2024").as_deref(), Some("2025-W01"));
        assert_eq!(normalize_week("last week").as_deref(), Some("last week"));
        assert_eq!(normalize_week("   "), None);
    }

    #[test]
    fn skips_rows_outside_scope() {
        let feed = FeedDescriptor::ecdc_erviss();
        let outcome = FeedNormalizer::new(&feed).normalize(&row(&[
            ("yearweek", "2025-W10"),
            ("countryname", "France"),
            ("pathogen", "RSV"),
            ("indicator", "detections"),
            ("value", "12"),
        ]));
        assert_eq!(
            outcome,
            NormalizeOutcome::Skip(SkipReason::OutOfScope {
                country: "France".into()
            })
        );
    }

    #[test]
    fn skips_missing_observations() {
        let feed = FeedDescriptor::ecdc_erviss();
        for token in ["NA", "", "null"] {
            let outcome = FeedNormalizer::new(&feed).normalize(&row(&[
                ("yearweek", "2025-W10"),
                ("countryname", "Italy"),
                ("pathogen", "RSV"),
                ("indicator", "detections"),
                ("value", token),
            ]));
            assert_eq!(outcome, NormalizeOutcome::Skip(SkipReason::NoObservation));
        }
    }

    #[test]
    fn carries_uninterpretable_cells_forward() {
        let feed = FeedDescriptor::ecdc_erviss();
        let c = candidate(FeedNormalizer::new(&feed).normalize(&row(&[
            ("yearweek", "week ten"),
            ("countryname", "ITA"),
            ("pathogen", "Metapneumovirus"),
            ("indicator", "admissions"),
            ("value", "twelve"),
        ])));
        assert_eq!(c.iso_week.as_deref(), Some("week ten"));
        assert_eq!(c.country.as_deref(), Some("IT"));
        assert_eq!(c.pathogen.as_deref(), Some("Metapneumovirus"));
        assert_eq!(c.metric.as_deref(), Some("admissions"));
        assert_eq!(c.value, CandidateValue::Text("twelve".into()));
    }

    #[test]
    fn empty_cells_become_missing_fields() {
        let feed = FeedDescriptor::ecdc_erviss();
        let c = candidate(FeedNormalizer::new(&feed).normalize(&row(&[
            ("yearweek", ""),
            ("countryname", ""),
            ("pathogen", " "),
            ("indicator", ""),
            ("value", "3"),
        ])));
        assert_eq!(c.iso_week, None);
        assert_eq!(c.country, None);
        assert_eq!(c.pathogen, None);
        assert_eq!(c.metric, None);
    }

    #[test]
    fn applies_row_filters() {
        let mut feed = FeedDescriptor::ecdc_erviss();
        feed.filters = vec![RowFilter::required("age", &["total"])];
        let normalizer = FeedNormalizer::new(&feed);
        let base = [
            ("yearweek", "2025-W10"),
            ("countryname", "Italy"),
            ("pathogen", "RSV"),
            ("indicator", "detections"),
            ("value", "12"),
        ];
        let mut kept = base.to_vec();
        kept.push(("age", "Total"));
        assert!(matches!(normalizer.normalize(&row(&kept)), NormalizeOutcome::Candidate(_)));

        let mut dropped = base.to_vec();
        dropped.push(("age", "0-4"));
        assert_eq!(
            normalizer.normalize(&row(&dropped)),
            NormalizeOutcome::Skip(SkipReason::Filtered { column: "age".into() })
        );
    }

    #[test]
    fn builtin_feed_keeps_only_all_ages_rows() {
        let feed = FeedDescriptor::ecdc_erviss();
        let normalizer = FeedNormalizer::new(&feed);
        let base = [
            ("yearweek", "2025-W10"),
            ("countryname", "Italy"),
            ("pathogen", "RSV"),
            ("indicator", "detections"),
            ("value", "12"),
        ];
        let mut band = base.to_vec();
        band.push(("age", "65+"));
        assert!(matches!(normalizer.normalize(&row(&band)), NormalizeOutcome::Skip(_)));

        let mut total = base.to_vec();
        total.push(("age", "total"));
        assert!(matches!(normalizer.normalize(&row(&total)), NormalizeOutcome::Candidate(_)));

        // without an age column every row is an all-ages row
        assert!(matches!(normalizer.normalize(&row(&base)), NormalizeOutcome::Candidate(_)));
    }

    #[test]
    fn coerces_numbers_including_non_finite_text() {
        assert_eq!(coerce_value("-1"), CandidateValue::Number(-1.0));
        assert_eq!(coerce_value(" 12 "), CandidateValue::Number(12.0));
        assert!(matches!(coerce_value("NaN"), CandidateValue::Number(n) if n.is_nan()));
        assert_eq!(coerce_value("1,5"), CandidateValue::Text("1,5".into()));
        assert_eq!(coerce_value(""), CandidateValue::Missing);
    }
}
