use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

use crate::domain::{CanonicalRecord, RecordKey};
use crate::observability::metrics;

/// The deduplicated, totally ordered record set of one run.
#[derive(Debug, Default)]
pub struct DedupedRecords {
    pub records: Vec<CanonicalRecord>,
    /// Records dropped because a later one shared their key.
    pub collisions: usize,
    /// Collisions where the dropped value differed from the kept one.
    pub conflicts: usize,
}

/// Collapse records sharing a key, keeping the last one seen, and order the
/// survivors by key.
///
/// Input order is the order records were read across feeds, so "last" means
/// the later row in the source document.
#[instrument(skip_all)]
pub fn dedupe_and_sort(records: impl IntoIterator<Item = CanonicalRecord>) -> DedupedRecords {
    let mut by_key: BTreeMap<RecordKey, CanonicalRecord> = BTreeMap::new();
    let mut collisions = 0;
    let mut conflicts = 0;

    for record in records {
        let key = record.key();
        let value = record.value;
        if let Some(previous) = by_key.insert(key.clone(), record) {
            collisions += 1;
            if previous.value != value {
                conflicts += 1;
                warn!(
                    "Duplicate key {} with differing values: {} replaced by {}",
                    key, previous.value, value
                );
            } else {
                debug!("Duplicate key {} with identical value", key);
            }
        }
    }

    metrics::dedupe::collisions(collisions, conflicts);
    DedupedRecords {
        records: by_key.into_values().collect(),
        collisions,
        conflicts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Metric, Pathogen, Source};

    fn record(week: &str, pathogen: Pathogen, metric: Metric, value: f64) -> CanonicalRecord {
        CanonicalRecord {
            source: Source::Ecdc,
            iso_week: week.parse().unwrap(),
            country: "IT".into(),
            pathogen,
            metric,
            value,
        }
    }

    #[test]
    fn later_duplicate_wins() {
        let out = dedupe_and_sort(vec![
            record("2025-W10", Pathogen::Rsv, Metric::Cases, 12.0),
            record("2025-W10", Pathogen::Rsv, Metric::Cases, 15.0),
        ]);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].value, 15.0);
        assert_eq!(out.collisions, 1);
        assert_eq!(out.conflicts, 1);
    }

    #[test]
    fn identical_duplicates_are_not_conflicts() {
        let out = dedupe_and_sort(vec![
            record("2025-W10", Pathogen::Rsv, Metric::Cases, 12.0),
            record("2025-W10", Pathogen::Rsv, Metric::Cases, 12.0),
        ]);
        assert_eq!(out.records.len(), 1);
        assert_eq!((out.collisions, out.conflicts), (1, 0));
    }

    #[test]
    fn orders_by_week_then_key_fields() {
        let out = dedupe_and_sort(vec![
            record("2025-W02", Pathogen::Influenza, Metric::Cases, 1.0),
            record("2025-W01", Pathogen::SarsCov2, Metric::Tests, 2.0),
            record("2024-W52", Pathogen::Rsv, Metric::PositivityRate, 3.0),
            record("2025-W01", Pathogen::Influenza, Metric::Tests, 4.0),
            record("2025-W01", Pathogen::Influenza, Metric::PositivityRate, 5.0),
        ]);
        let keys: Vec<String> = out
            .records
            .iter()
            .map(|r| format!("{} {} {}", r.iso_week, r.pathogen, r.metric))
            .collect();
        assert_eq!(
            keys,
            [
                "2024-W52 RSV positivity_rate",
                "2025-W01 influenza positivity_rate",
                "2025-W01 influenza tests",
                "2025-W01 SARS-CoV-2 tests",
                "2025-W02 influenza cases",
            ]
        );
    }

    #[test]
    fn distinct_metrics_in_same_week_are_kept() {
        let out = dedupe_and_sort(vec![
            record("2025-W10", Pathogen::Rsv, Metric::Cases, 12.0),
            record("2025-W10", Pathogen::Rsv, Metric::Tests, 80.0),
        ]);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.collisions, 0);
    }
}
