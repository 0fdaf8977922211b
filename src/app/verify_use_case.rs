use chrono::{Duration, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::app::ports::ArtifactStorePort;
use crate::domain::{CanonicalRecord, IsoWeek, Pathogen, RecordKey};
use crate::error::PublishError;
use crate::pipeline::processing::change_detect;
use crate::pipeline::processing::quality_gate::SchemaValidator;
use crate::registry::FeedDescriptor;

/// Findings of an audit of the published artifact.
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub record_count: usize,
    /// Violations of the artifact contract. Any entry fails the audit.
    pub problems: Vec<String>,
    /// Worth a look but not a contract violation.
    pub warnings: Vec<String>,
    pub coverage: BTreeMap<Pathogen, usize>,
    pub latest_week: Option<IsoWeek>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Use case for auditing what a previous run published
pub struct VerifyUseCase<'a> {
    store: &'a dyn ArtifactStorePort,
    validator: SchemaValidator,
    freshness_weeks: u32,
}

impl<'a> VerifyUseCase<'a> {
    pub fn new<'f>(
        store: &'a dyn ArtifactStorePort,
        feeds: impl IntoIterator<Item = &'f FeedDescriptor>,
        freshness_weeks: u32,
    ) -> Self {
        let countries: BTreeSet<String> = feeds
            .into_iter()
            .flat_map(|f| f.in_scope_codes().map(str::to_string).collect::<Vec<_>>())
            .collect();
        Self {
            store,
            validator: SchemaValidator::new(countries),
            freshness_weeks,
        }
    }

    pub fn verify(&self, today: NaiveDate) -> Result<VerifyReport, PublishError> {
        let mut report = VerifyReport::default();
        let Some(bytes) = self.store.read_artifact()? else {
            report.problems.push("artifact has not been published".into());
            return Ok(report);
        };

        self.check_lines(&bytes, &mut report);
        self.check_status(&bytes, &mut report);
        self.check_freshness(today, &mut report);

        for pathogen in Pathogen::ALL {
            if !report.coverage.contains_key(pathogen) {
                report.warnings.push(format!("no {pathogen} records"));
            }
        }

        for problem in &report.problems {
            warn!("verify: {}", problem);
        }
        for warning in &report.warnings {
            warn!("verify (warning): {}", warning);
        }
        info!(
            "Verified {} records: {} problems, {} warnings, coverage {:?}",
            report.record_count,
            report.problems.len(),
            report.warnings.len(),
            report.coverage
        );
        Ok(report)
    }

    fn check_lines(&self, bytes: &[u8], report: &mut VerifyReport) {
        if bytes.is_empty() {
            report.problems.push("artifact is empty".into());
            return;
        }
        if !bytes.ends_with(b"\n") {
            report.problems.push("artifact does not end with a newline".into());
        }
        let text = match std::str::from_utf8(bytes) {
            Ok(t) => t,
            Err(e) => {
                report.problems.push(format!("artifact is not UTF-8: {e}"));
                return;
            }
        };

        let mut previous: Option<RecordKey> = None;
        for (i, line) in text.lines().enumerate() {
            let line_no = i + 1;
            if line.trim().is_empty() {
                report.problems.push(format!("line {line_no}: blank line"));
                continue;
            }
            let record: CanonicalRecord = match serde_json::from_str(line) {
                Ok(r) => r,
                Err(e) => {
                    report.problems.push(format!("line {line_no}: {e}"));
                    continue;
                }
            };
            if let Err(e) = self.validator.check_record(&record) {
                report.problems.push(format!("line {line_no}: {e}"));
            }

            let key = record.key();
            if let Some(prev) = &previous {
                if key == *prev {
                    report.problems.push(format!("line {line_no}: duplicate key {key}"));
                } else if key < *prev {
                    report
                        .problems
                        .push(format!("line {line_no}: {key} sorts before {prev}"));
                }
            }
            report.record_count += 1;
            *report.coverage.entry(record.pathogen).or_default() += 1;
            report.latest_week = report.latest_week.max(Some(record.iso_week));
            previous = Some(key);
        }
    }

    fn check_status(&self, bytes: &[u8], report: &mut VerifyReport) {
        let Some(status) = self.store.load_status() else {
            report.problems.push("status is missing or unreadable".into());
            return;
        };
        if status.record_count != report.record_count {
            report.problems.push(format!(
                "status record_count {} but artifact has {} records",
                status.record_count, report.record_count
            ));
        }
        if let Some(fp) = &status.fingerprint {
            let actual = change_detect::fingerprint(bytes);
            if *fp != actual {
                report
                    .problems
                    .push(format!("status fingerprint {fp} does not match artifact {actual}"));
            }
        }
        if status.stale {
            report.warnings.push(format!(
                "status is stale: {}",
                status.degraded_reason.as_deref().unwrap_or("no reason recorded")
            ));
        }
    }

    fn check_freshness(&self, today: NaiveDate, report: &mut VerifyReport) {
        let Some(latest) = report.latest_week else {
            return;
        };
        let recent = (0..self.freshness_weeks as i64)
            .map(|i| IsoWeek::from_date(today - Duration::weeks(i)))
            .any(|w| w <= latest);
        if !recent {
            report.warnings.push(format!(
                "no data from the last {} weeks (latest {})",
                self.freshness_weeks, latest
            ));
        }
    }
}
