use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::domain::{CanonicalRecord, Source};
use crate::error::ThresholdExceededError;
use crate::observability::metrics;
use crate::pipeline::processing::normalize::RecordCandidate;
use crate::pipeline::processing::quality_gate::{
    Field, RejectReason, SchemaValidator, ValidationError, ValidationPolicy, Validator,
};
use crate::registry::FeedDescriptor;

/// Rejections logged individually at warn level before falling back to debug.
const REJECTION_LOG_LIMIT: usize = 20;

/// Use case for validating one feed's candidates and applying the rejection policy
pub struct QualityGateUseCase {
    validator: Box<dyn Validator + Send + Sync>,
    policy: ValidationPolicy,
}

/// Valid records of one feed plus what was thrown away.
#[derive(Debug)]
pub struct ValidatedBatch {
    pub records: Vec<CanonicalRecord>,
    pub rejected: Vec<RowRejection>,
    pub stats: QualityGateBatchStats,
}

/// A source row the validator refused.
#[derive(Debug, Clone, PartialEq)]
pub struct RowRejection {
    pub source: Source,
    pub line: u64,
    pub error: ValidationError,
}

#[derive(Debug, Default, Clone)]
pub struct QualityGateBatchStats {
    pub considered: usize,
    pub accepted_count: usize,
    pub rejected_count: usize,
    pub rejections: BTreeMap<(Field, RejectReason), usize>,
}

impl QualityGateBatchStats {
    pub fn acceptance_rate(&self) -> f64 {
        if self.considered == 0 {
            0.0
        } else {
            self.accepted_count as f64 / self.considered as f64
        }
    }

    pub fn rejection_rate(&self) -> f64 {
        if self.considered == 0 {
            0.0
        } else {
            self.rejected_count as f64 / self.considered as f64
        }
    }
}

impl QualityGateUseCase {
    pub fn new(validator: Box<dyn Validator + Send + Sync>, policy: ValidationPolicy) -> Self {
        Self { validator, policy }
    }

    /// Create a use case with the schema validator scoped to `feed`
    pub fn for_feed(feed: &FeedDescriptor, policy: ValidationPolicy) -> Self {
        Self::new(Box::new(SchemaValidator::for_feed(feed)), policy)
    }

    /// Validate every candidate, then decide whether the valid remainder may
    /// be published. Individual rejections never fail the batch on their own.
    pub fn assess_batch(
        &self,
        candidates: &[RecordCandidate],
    ) -> Result<ValidatedBatch, ThresholdExceededError> {
        let mut records = Vec::with_capacity(candidates.len());
        let mut rejected = Vec::new();
        let mut stats = QualityGateBatchStats::default();

        for candidate in candidates {
            stats.considered += 1;
            match self.validator.validate(candidate) {
                Ok(record) => {
                    stats.accepted_count += 1;
                    metrics::quality_gate::record_accepted();
                    records.push(record);
                }
                Err(e) => {
                    stats.rejected_count += 1;
                    *stats.rejections.entry((e.field, e.reason)).or_default() += 1;
                    metrics::quality_gate::record_rejected(e.field, e.reason);
                    if stats.rejected_count <= REJECTION_LOG_LIMIT {
                        warn!("Rejected line {}: {}", candidate.line, e);
                    } else {
                        debug!("Rejected line {}: {}", candidate.line, e);
                    }
                    rejected.push(RowRejection {
                        source: candidate.source,
                        line: candidate.line,
                        error: e,
                    });
                }
            }
        }

        metrics::quality_gate::batch_processed(
            stats.considered,
            stats.accepted_count,
            stats.rejected_count,
        );
        info!(
            "Validated {} candidates: {} accepted, {} rejected ({:.1}%)",
            stats.considered,
            stats.accepted_count,
            stats.rejected_count,
            stats.rejection_rate() * 100.0
        );
        if stats.rejected_count > REJECTION_LOG_LIMIT {
            warn!(
                "{} further rejections logged at debug level",
                stats.rejected_count - REJECTION_LOG_LIMIT
            );
        }

        if let Err(e) = self.policy.check(stats.accepted_count, stats.rejected_count) {
            metrics::quality_gate::threshold_exceeded();
            return Err(e);
        }
        Ok(ValidatedBatch {
            records,
            rejected,
            stats,
        })
    }
}
