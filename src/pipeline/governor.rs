use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::app::ports::{ArtifactStorePort, HttpClientPort};
use crate::app::quality_gate_use_case::{QualityGateUseCase, RowRejection};
use crate::config::{Config, FetchConfig};
use crate::domain::{CanonicalRecord, StatusDescriptor};
use crate::error::{FetchError, PipelineError, PublishError};
use crate::observability::metrics;
use crate::pipeline::processing::change_detect::{self, ChangeDecision};
use crate::pipeline::processing::dedupe::dedupe_and_sort;
use crate::pipeline::processing::normalize::FeedNormalizer;
use crate::pipeline::processing::parser::{CsvFeedParser, MetricsParser, Parser};
use crate::pipeline::processing::quality_gate::ValidationPolicy;
use crate::registry::FeedDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Fetching,
    Validating,
    Publishing,
    Degraded,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Fetching => "fetching",
            RunState::Validating => "validating",
            RunState::Publishing => "publishing",
            RunState::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

/// How a run that did not hit a hard failure ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// New content was published.
    Rewritten {
        record_count: usize,
        fingerprint: String,
    },
    /// Content matched the last publication. `status_refreshed` is set when a
    /// stale status was reset.
    Unchanged {
        record_count: usize,
        status_refreshed: bool,
    },
    /// The feed could not be refreshed; the previous artifact stays published
    /// and the status is marked stale.
    Degraded { reason: String },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Rewritten { .. } | RunOutcome::Unchanged { .. } => 0,
            RunOutcome::Degraded { .. } => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Rewritten { .. } => "rewritten",
            RunOutcome::Unchanged { .. } => "unchanged",
            RunOutcome::Degraded { .. } => "degraded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunDecision {
    Rewrite,
    Unchanged,
    StaleFallback,
}

impl RunDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunDecision::Rewrite => "rewrite",
            RunDecision::Unchanged => "unchanged",
            RunDecision::StaleFallback => "stale-fallback",
        }
    }
}

/// Working state of one invocation. Discarded when the run ends; only the
/// store's files outlive it.
#[derive(Debug)]
pub struct PipelineRun {
    pub run_id: Uuid,
    /// Status read once at start.
    pub previous: Option<StatusDescriptor>,
    pub artifact_exists: bool,
    pub fetched_bytes: usize,
    pub parsed_rows: usize,
    pub rejections: Vec<RowRejection>,
    /// Accepted records; deduplicated and sorted once all feeds are in.
    pub records: Vec<CanonicalRecord>,
    pub fingerprint: Option<String>,
    pub decision: Option<RunDecision>,
}

impl PipelineRun {
    fn start(run_id: Uuid, previous: Option<StatusDescriptor>, artifact_exists: bool) -> Self {
        Self {
            run_id,
            previous,
            artifact_exists,
            fetched_bytes: 0,
            parsed_rows: 0,
            rejections: Vec::new(),
            records: Vec::new(),
            fingerprint: None,
            decision: None,
        }
    }

    pub fn previous_fingerprint(&self) -> Option<&str> {
        self.previous.as_ref().and_then(|p| p.fingerprint.as_deref())
    }

    fn log_summary(&self, outcome: &RunOutcome, started: Instant) {
        info!(
            decision = self.decision.map(|d| d.as_str()).unwrap_or("none"),
            fetched_bytes = self.fetched_bytes,
            parsed_rows = self.parsed_rows,
            rejected_rows = self.rejections.len(),
            previous_fingerprint = self.previous_fingerprint().unwrap_or("none"),
            fingerprint = self.fingerprint.as_deref().unwrap_or("none"),
            "Run finished: {} ({} records) in {:.2}s",
            outcome.label(),
            self.records.len(),
            started.elapsed().as_secs_f64()
        );
    }
}

/// Runs every configured feed through fetch, parse, normalize and validate,
/// then publishes or degrades.
///
/// All feeds together form one artifact: one failing feed degrades the whole
/// run. Only a publish failure escapes as an error.
pub struct StalenessGovernor {
    http: Arc<dyn HttpClientPort>,
    store: Arc<dyn ArtifactStorePort>,
    feeds: Vec<FeedDescriptor>,
    fetch: FetchConfig,
    policy: ValidationPolicy,
}

impl StalenessGovernor {
    pub fn new(
        http: Arc<dyn HttpClientPort>,
        store: Arc<dyn ArtifactStorePort>,
        feeds: Vec<FeedDescriptor>,
        fetch: FetchConfig,
        policy: ValidationPolicy,
    ) -> Self {
        Self {
            http,
            store,
            feeds,
            fetch,
            policy,
        }
    }

    pub fn from_config(
        config: &Config,
        http: Arc<dyn HttpClientPort>,
        store: Arc<dyn ArtifactStorePort>,
    ) -> Self {
        Self::new(
            http,
            store,
            config.enabled_feeds().cloned().collect(),
            config.fetch.clone(),
            config.validation.clone(),
        )
    }

    pub async fn run(&self) -> Result<RunOutcome, PublishError> {
        self.execute().await.map(|(outcome, _)| outcome)
    }

    /// Run once and also hand back the run's working state.
    pub async fn execute(&self) -> Result<(RunOutcome, PipelineRun), PublishError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", run_id = %run_id);
        let result = self.run_inner(run_id).instrument(span).await;
        match &result {
            Ok((outcome, _)) => metrics::run::outcome(outcome.label()),
            Err(_) => metrics::run::outcome("failed"),
        }
        result
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<(RunOutcome, PipelineRun), PublishError> {
        let started = Instant::now();
        let mut run = PipelineRun::start(
            run_id,
            self.store.load_status(),
            self.store.artifact_exists(),
        );
        debug!(
            "Previous status: {:?}, artifact present: {}",
            run.previous, run.artifact_exists
        );

        if let Err(e) = self.collect_all(&mut run).await {
            let outcome = self.degrade(&mut run, &e)?;
            run.log_summary(&outcome, started);
            return Ok((outcome, run));
        }

        self.enter(RunState::Publishing);
        let deduped = dedupe_and_sort(std::mem::take(&mut run.records));
        run.records = deduped.records;
        let bytes = change_detect::serialize_jsonl(&run.records)?;
        let fingerprint = change_detect::fingerprint(&bytes);
        let record_count = run.records.len();
        run.fingerprint = Some(fingerprint.clone());

        let decision = change_detect::detect(&fingerprint, run.previous.as_ref(), run.artifact_exists);
        let outcome = match decision {
            ChangeDecision::Changed => {
                let status = StatusDescriptor::fresh(Utc::now(), record_count, fingerprint.clone());
                self.store.publish(&bytes, &status)?;
                metrics::publish::artifact_written(record_count);
                metrics::publish::status_written(false);
                run.decision = Some(RunDecision::Rewrite);
                RunOutcome::Rewritten {
                    record_count,
                    fingerprint,
                }
            }
            ChangeDecision::Unchanged => {
                let was_stale = run.previous.as_ref().is_some_and(|p| p.stale);
                if was_stale {
                    info!("Source recovered; clearing stale flag");
                    let status = StatusDescriptor::fresh(Utc::now(), record_count, fingerprint);
                    self.store.write_status(&status)?;
                    metrics::publish::status_written(false);
                }
                run.decision = Some(RunDecision::Unchanged);
                RunOutcome::Unchanged {
                    record_count,
                    status_refreshed: was_stale,
                }
            }
        };

        if deduped.collisions > 0 {
            info!("{} duplicate keys collapsed", deduped.collisions);
        }
        run.log_summary(&outcome, started);
        Ok((outcome, run))
    }

    fn enter(&self, state: RunState) {
        debug!("state -> {}", state);
    }

    fn degrade(
        &self,
        run: &mut PipelineRun,
        cause: &PipelineError,
    ) -> Result<RunOutcome, PublishError> {
        self.enter(RunState::Degraded);
        if !cause.is_degradable() {
            warn!("Unexpected failure treated as degraded: {}", cause);
        }
        let reason = cause.to_string();
        warn!("Degrading run: {}; previous artifact stays published", reason);

        let carried = match &run.previous {
            Some(previous) => Some(previous.clone()),
            None if run.artifact_exists => self.describe_published_artifact(),
            None => None,
        };
        let status = StatusDescriptor::degraded(carried.as_ref(), reason.clone());
        self.store.write_status(&status)?;
        metrics::publish::status_written(true);
        run.decision = Some(RunDecision::StaleFallback);
        Ok(RunOutcome::Degraded { reason })
    }

    /// Status fields recomputed from the artifact on disk, for when no
    /// readable status file accompanies it. The build time is unknown.
    fn describe_published_artifact(&self) -> Option<StatusDescriptor> {
        match self.store.read_artifact() {
            Ok(Some(bytes)) => {
                let record_count = bytes
                    .split(|b| *b == b'\n')
                    .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
                    .count();
                warn!(
                    "No readable status; describing the published artifact from disk ({} records)",
                    record_count
                );
                Some(StatusDescriptor {
                    build_time: None,
                    stale: true,
                    record_count,
                    fingerprint: Some(change_detect::fingerprint(&bytes)),
                    degraded_reason: None,
                })
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Cannot read the published artifact: {}", e);
                None
            }
        }
    }

    async fn collect_all(&self, run: &mut PipelineRun) -> Result<(), PipelineError> {
        for feed in &self.feeds {
            let span = info_span!("feed", source = %feed.source, url = %feed.url);
            self.collect_feed(feed, run).instrument(span).await?;
        }
        Ok(())
    }

    async fn collect_feed(
        &self,
        feed: &FeedDescriptor,
        run: &mut PipelineRun,
    ) -> Result<(), PipelineError> {
        self.enter(RunState::Fetching);
        let bytes = self.fetch_with_retry(feed).await?;
        run.fetched_bytes += bytes.len();

        let parsed = MetricsParser::new(CsvFeedParser::new(feed)).parse(&bytes)?;
        run.parsed_rows += parsed.rows.len();
        let normalized = FeedNormalizer::new(feed).normalize_feed(&parsed);
        if normalized.skipped_total() > 0 {
            info!(
                "Skipped {} rows outside scope: {:?}",
                normalized.skipped_total(),
                normalized.skipped
            );
        }

        self.enter(RunState::Validating);
        let mut validated = QualityGateUseCase::for_feed(feed, self.policy.clone())
            .assess_batch(&normalized.candidates)?;
        run.rejections.append(&mut validated.rejected);
        run.records.append(&mut validated.records);
        Ok(())
    }

    async fn fetch_with_retry(&self, feed: &FeedDescriptor) -> Result<Vec<u8>, FetchError> {
        let attempts = self.fetch.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.http.get(&feed.url).await {
                Ok(bytes) => {
                    metrics::sources::request_success(feed.source);
                    info!("Fetched {} bytes (attempt {}/{})", bytes.len(), attempt, attempts);
                    return Ok(bytes);
                }
                Err(e) => {
                    metrics::sources::request_error(feed.source, &e);
                    if attempt >= attempts {
                        return Err(e);
                    }
                    warn!(
                        "Fetch attempt {}/{} failed: {}; retrying in {}ms",
                        attempt, attempts, e, self.fetch.retry_backoff_ms
                    );
                    tokio::time::sleep(self.fetch.retry_backoff()).await;
                    attempt += 1;
                }
            }
        }
    }
}
