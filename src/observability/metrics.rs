//! Metrics for the surveillance pipeline
//!
//! Every stage records through the `metrics` facade using names from
//! [`MetricName`]. Nothing is exported unless [`init_textfile`] installed a
//! Prometheus recorder, in which case [`write_textfile`] renders the run's
//! metrics in node-exporter textfile format.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::error::PublishError;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// How a metric is recorded, and therefore how it is described.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Sources metrics
    SourcesRequestsSuccess,
    SourcesRequestsError,
    SourcesRequestDuration,
    SourcesPayloadBytes,

    // Parser metrics
    ParserParseSuccess,
    ParserParseError,
    ParserDuration,
    ParserRowsExtracted,
    ParserBytesProcessed,

    // Normalize metrics
    NormalizeCandidates,
    NormalizeRowsSkipped,

    // Quality Gate metrics
    QualityGateRecordsAccepted,
    QualityGateRecordsRejected,
    QualityGateBatchesProcessed,
    QualityGateBatchSize,
    QualityGateThresholdExceeded,

    // Dedupe metrics
    DedupeCollisions,
    DedupeConflicts,

    // Publish metrics
    PublishArtifactWrites,
    PublishStatusWrites,
    PublishErrors,
    PublishRecords,

    // Run outcome
    RunOutcome,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::SourcesRequestsSuccess => "surveillance_sources_requests_success_total",
            MetricName::SourcesRequestsError => "surveillance_sources_requests_error_total",
            MetricName::SourcesRequestDuration => "surveillance_sources_request_duration_seconds",
            MetricName::SourcesPayloadBytes => "surveillance_sources_payload_bytes",

            MetricName::ParserParseSuccess => "surveillance_parser_parse_success_total",
            MetricName::ParserParseError => "surveillance_parser_parse_error_total",
            MetricName::ParserDuration => "surveillance_parser_duration_seconds",
            MetricName::ParserRowsExtracted => "surveillance_parser_rows_extracted_total",
            MetricName::ParserBytesProcessed => "surveillance_parser_bytes_processed",

            MetricName::NormalizeCandidates => "surveillance_normalize_candidates_total",
            MetricName::NormalizeRowsSkipped => "surveillance_normalize_rows_skipped_total",

            MetricName::QualityGateRecordsAccepted => "surveillance_quality_gate_records_accepted_total",
            MetricName::QualityGateRecordsRejected => "surveillance_quality_gate_records_rejected_total",
            MetricName::QualityGateBatchesProcessed => "surveillance_quality_gate_batches_processed_total",
            MetricName::QualityGateBatchSize => "surveillance_quality_gate_batch_size",
            MetricName::QualityGateThresholdExceeded => "surveillance_quality_gate_threshold_exceeded_total",

            MetricName::DedupeCollisions => "surveillance_dedupe_collisions_total",
            MetricName::DedupeConflicts => "surveillance_dedupe_conflicts_total",

            MetricName::PublishArtifactWrites => "surveillance_publish_artifact_writes_total",
            MetricName::PublishStatusWrites => "surveillance_publish_status_writes_total",
            MetricName::PublishErrors => "surveillance_publish_errors_total",
            MetricName::PublishRecords => "surveillance_publish_records",

            MetricName::RunOutcome => "surveillance_run_outcome_total",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            SourcesRequestsSuccess,
            SourcesRequestsError,
            SourcesRequestDuration,
            SourcesPayloadBytes,
            ParserParseSuccess,
            ParserParseError,
            ParserDuration,
            ParserRowsExtracted,
            ParserBytesProcessed,
            NormalizeCandidates,
            NormalizeRowsSkipped,
            QualityGateRecordsAccepted,
            QualityGateRecordsRejected,
            QualityGateBatchesProcessed,
            QualityGateBatchSize,
            QualityGateThresholdExceeded,
            DedupeCollisions,
            DedupeConflicts,
            PublishArtifactWrites,
            PublishStatusWrites,
            PublishErrors,
            PublishRecords,
            RunOutcome,
        ]
        .into_iter()
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            MetricName::SourcesRequestDuration
            | MetricName::SourcesPayloadBytes
            | MetricName::ParserDuration
            | MetricName::ParserBytesProcessed
            | MetricName::QualityGateBatchSize => MetricKind::Histogram,
            MetricName::PublishRecords => MetricKind::Gauge,
            _ => MetricKind::Counter,
        }
    }

    /// (phase, description)
    pub fn metadata(&self) -> (&'static str, &'static str) {
        match self {
            MetricName::SourcesRequestsSuccess => ("sources", "Successful feed downloads"),
            MetricName::SourcesRequestsError => ("sources", "Failed feed downloads by error kind"),
            MetricName::SourcesRequestDuration => ("sources", "Feed download duration in seconds"),
            MetricName::SourcesPayloadBytes => ("sources", "Feed payload size in bytes"),
            MetricName::ParserParseSuccess => ("parser", "Successful parses"),
            MetricName::ParserParseError => ("parser", "Parse errors by kind"),
            MetricName::ParserDuration => ("parser", "Parse duration in seconds"),
            MetricName::ParserRowsExtracted => ("parser", "Data rows extracted"),
            MetricName::ParserBytesProcessed => ("parser", "Bytes handed to the parser"),
            MetricName::NormalizeCandidates => ("normalize", "Rows mapped to record candidates"),
            MetricName::NormalizeRowsSkipped => ("normalize", "Rows skipped by reason"),
            MetricName::QualityGateRecordsAccepted => ("quality_gate", "Records passing validation"),
            MetricName::QualityGateRecordsRejected => ("quality_gate", "Rows rejected by field and reason"),
            MetricName::QualityGateBatchesProcessed => ("quality_gate", "Feed batches validated"),
            MetricName::QualityGateBatchSize => ("quality_gate", "Candidates per validated batch"),
            MetricName::QualityGateThresholdExceeded => ("quality_gate", "Batches over the rejection threshold"),
            MetricName::DedupeCollisions => ("dedupe", "Records replaced by a later duplicate"),
            MetricName::DedupeConflicts => ("dedupe", "Replaced duplicates with a different value"),
            MetricName::PublishArtifactWrites => ("publish", "Artifact rewrites"),
            MetricName::PublishStatusWrites => ("publish", "Status file writes"),
            MetricName::PublishErrors => ("publish", "Failed writes"),
            MetricName::PublishRecords => ("publish", "Records in the published artifact"),
            MetricName::RunOutcome => ("run", "Completed runs by outcome"),
        }
    }
}

/// Install a Prometheus recorder whose rendering [`write_textfile`] persists.
/// Idempotent; a second install attempt is ignored.
pub fn init_textfile() {
    if HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if HANDLE.set(handle).is_ok() {
                for name in MetricName::all_metrics() {
                    let (_, description) = name.metadata();
                    match name.kind() {
                        MetricKind::Counter => ::metrics::describe_counter!(name.as_str(), description),
                        MetricKind::Gauge => ::metrics::describe_gauge!(name.as_str(), description),
                        MetricKind::Histogram => {
                            ::metrics::describe_histogram!(name.as_str(), description)
                        }
                    }
                }
                info!("Prometheus recorder installed for textfile export");
            }
        }
        Err(e) => warn!("Failed to install Prometheus recorder: {}", e),
    }
}

/// Render current metrics into `path`. No-op when no recorder is installed.
pub fn write_textfile(path: &Path) -> Result<(), PublishError> {
    let Some(handle) = HANDLE.get() else {
        return Ok(());
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PublishError::io(parent, e))?;
    }
    fs::write(path, handle.render()).map_err(|e| PublishError::io(path, e))?;
    info!("Metrics written to {}", path.display());
    Ok(())
}

// ============================================================================
// Sources Metrics
// ============================================================================

pub mod sources {
    use super::MetricName;
    use crate::domain::Source;
    use crate::error::FetchError;

    pub fn request_success(source: Source) {
        ::metrics::counter!(MetricName::SourcesRequestsSuccess.as_str(), "source" => source.as_str())
            .increment(1);
    }

    pub fn request_error(source: Source, error: &FetchError) {
        ::metrics::counter!(
            MetricName::SourcesRequestsError.as_str(),
            "source" => source.as_str(),
            "kind" => error.kind()
        )
        .increment(1);
    }

    pub fn request_duration(secs: f64) {
        ::metrics::histogram!(MetricName::SourcesRequestDuration.as_str()).record(secs);
    }

    pub fn payload_bytes(bytes: usize) {
        ::metrics::histogram!(MetricName::SourcesPayloadBytes.as_str()).record(bytes as f64);
    }
}

// ============================================================================
// Parser Metrics
// ============================================================================

pub mod parser {
    use super::MetricName;
    use crate::error::SchemaError;

    pub fn parse_success() {
        ::metrics::counter!(MetricName::ParserParseSuccess.as_str()).increment(1);
    }

    pub fn parse_error(error: &SchemaError) {
        let kind = match error {
            SchemaError::MissingColumn { .. } => "missing_column",
            SchemaError::EmptyDocument => "empty_document",
            SchemaError::Malformed { .. } => "malformed",
        };
        ::metrics::counter!(MetricName::ParserParseError.as_str(), "kind" => kind).increment(1);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::ParserDuration.as_str()).record(secs);
    }

    pub fn rows_extracted(count: u64) {
        ::metrics::counter!(MetricName::ParserRowsExtracted.as_str()).increment(count);
    }

    pub fn bytes_processed(bytes: usize) {
        ::metrics::histogram!(MetricName::ParserBytesProcessed.as_str()).record(bytes as f64);
    }
}

// ============================================================================
// Normalize Metrics
// ============================================================================

pub mod normalize {
    use super::MetricName;
    use std::collections::BTreeMap;

    pub fn batch_processed(candidates: usize, skipped: &BTreeMap<&'static str, usize>) {
        ::metrics::counter!(MetricName::NormalizeCandidates.as_str()).increment(candidates as u64);
        for (reason, count) in skipped {
            ::metrics::counter!(MetricName::NormalizeRowsSkipped.as_str(), "reason" => *reason)
                .increment(*count as u64);
        }
    }
}

// ============================================================================
// Quality Gate Metrics
// ============================================================================

pub mod quality_gate {
    use super::MetricName;
    use crate::pipeline::processing::quality_gate::{Field, RejectReason};

    pub fn record_accepted() {
        ::metrics::counter!(MetricName::QualityGateRecordsAccepted.as_str()).increment(1);
    }

    pub fn record_rejected(field: Field, reason: RejectReason) {
        ::metrics::counter!(
            MetricName::QualityGateRecordsRejected.as_str(),
            "field" => field.as_str(),
            "reason" => reason.as_str()
        )
        .increment(1);
    }

    pub fn batch_processed(total: usize, accepted: usize, rejected: usize) {
        ::metrics::counter!(MetricName::QualityGateBatchesProcessed.as_str()).increment(1);
        ::metrics::histogram!(MetricName::QualityGateBatchSize.as_str()).record(total as f64);
        tracing::debug!(total, accepted, rejected, "quality gate batch recorded");
    }

    pub fn threshold_exceeded() {
        ::metrics::counter!(MetricName::QualityGateThresholdExceeded.as_str()).increment(1);
    }
}

// ============================================================================
// Dedupe Metrics
// ============================================================================

pub mod dedupe {
    use super::MetricName;

    pub fn collisions(collisions: usize, conflicts: usize) {
        ::metrics::counter!(MetricName::DedupeCollisions.as_str()).increment(collisions as u64);
        ::metrics::counter!(MetricName::DedupeConflicts.as_str()).increment(conflicts as u64);
    }
}

// ============================================================================
// Publish Metrics
// ============================================================================

pub mod publish {
    use super::MetricName;

    pub fn artifact_written(records: usize) {
        ::metrics::counter!(MetricName::PublishArtifactWrites.as_str()).increment(1);
        ::metrics::gauge!(MetricName::PublishRecords.as_str()).set(records as f64);
    }

    pub fn status_written(stale: bool) {
        let stale = if stale { "true" } else { "false" };
        ::metrics::counter!(MetricName::PublishStatusWrites.as_str(), "stale" => stale).increment(1);
    }

    pub fn error() {
        ::metrics::counter!(MetricName::PublishErrors.as_str()).increment(1);
    }
}

// ============================================================================
// Run Metrics
// ============================================================================

pub mod run {
    use super::MetricName;

    pub fn outcome(label: &'static str) {
        ::metrics::counter!(MetricName::RunOutcome.as_str(), "outcome" => label).increment(1);
    }
}
