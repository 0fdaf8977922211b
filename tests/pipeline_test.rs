use anyhow::Result;
use chrono::NaiveDate;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use resp_surveillance::app::ports::{ArtifactStorePort, HttpClientPort};
use resp_surveillance::app::verify_use_case::VerifyUseCase;
use resp_surveillance::config::FetchConfig;
use resp_surveillance::domain::{CanonicalRecord, StatusDescriptor};
use resp_surveillance::infra::fs_store::FsArtifactStore;
use resp_surveillance::infra::http_client::ReqwestHttp;
use resp_surveillance::infra::mock_feed::MockFeed;
use resp_surveillance::pipeline::processing::change_detect;
use resp_surveillance::pipeline::processing::quality_gate::ValidationPolicy;
use resp_surveillance::pipeline::{RunOutcome, StalenessGovernor};
use resp_surveillance::registry::{ColumnSpec, FeedDescriptor};

const HEADER: &str = "date,country,pathogen,metric,value\n";

/// A feed whose columns carry the canonical names with no aliases.
fn plain_feed(url: String) -> FeedDescriptor {
    let mut feed = FeedDescriptor::ecdc_erviss();
    feed.url = url;
    feed.columns.week = ColumnSpec::new("date");
    feed.columns.country = ColumnSpec::new("country");
    feed.columns.pathogen = ColumnSpec::new("pathogen");
    feed.columns.metric = ColumnSpec::new("metric");
    feed.columns.value = ColumnSpec::new("value");
    feed
}

fn fetch_config() -> FetchConfig {
    FetchConfig {
        timeout_secs: 5,
        retry_backoff_ms: 0,
        ..FetchConfig::default()
    }
}

fn governor(http: Arc<dyn HttpClientPort>, dir: &Path, feed: FeedDescriptor) -> StalenessGovernor {
    StalenessGovernor::new(
        http,
        Arc::new(store(dir)),
        vec![feed],
        fetch_config(),
        ValidationPolicy::default(),
    )
}

fn store(dir: &Path) -> FsArtifactStore {
    FsArtifactStore::new(dir.join("ecdc_weekly.jsonl"), dir.join("status.json"))
}

async fn serve(server: &MockServer, status: u16, body: &str) {
    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body.to_string()))
        .mount(server)
        .await;
}

async fn run_against(server: &MockServer, dir: &Path) -> RunOutcome {
    let http = Arc::new(ReqwestHttp::new(&fetch_config()).unwrap());
    let feed = plain_feed(format!("{}/feed.csv", server.uri()));
    governor(http, dir, feed).run().await.unwrap()
}

fn published_records(dir: &Path) -> Vec<CanonicalRecord> {
    fs::read_to_string(dir.join("ecdc_weekly.jsonl"))
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn load_status(dir: &Path) -> StatusDescriptor {
    store(dir).load_status().unwrap()
}

#[tokio::test]
async fn dated_row_becomes_weekly_record() -> Result<()> {
    let server = MockServer::start().await;
    let dir = tempdir()?;
    serve(
        &server,
        200,
        &format!("{HEADER}2025-09-08,IT,influenza,positivity_rate,4.5\n"),
    )
    .await;

    let outcome = run_against(&server, dir.path()).await;
    assert_eq!(outcome.exit_code(), 0);

    let text = fs::read_to_string(dir.path().join("ecdc_weekly.jsonl"))?;
    assert_eq!(
        text,
        "{\"source\":\"ECDC\",\"iso_week\":\"2025-W37\",\"country\":\"IT\",\"pathogen\":\"influenza\",\"metric\":\"positivity_rate\",\"value\":4.5}\n"
    );
    let status = load_status(dir.path());
    assert!(!status.stale);
    assert_eq!(status.record_count, 1);
    assert!(status.build_time.is_some());
    Ok(())
}

#[tokio::test]
async fn later_duplicate_row_wins() -> Result<()> {
    let server = MockServer::start().await;
    let dir = tempdir()?;
    serve(
        &server,
        200,
        &format!(
            "{HEADER}2025-W10,IT,RSV,cases,3.0\n2025-W10,IT,RSV,cases,3.2\n"
        ),
    )
    .await;

    run_against(&server, dir.path()).await;
    let records = published_records(dir.path());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].value, 3.2);
    Ok(())
}

#[tokio::test]
async fn missing_column_degrades_and_keeps_artifact() -> Result<()> {
    let server = MockServer::start().await;
    let dir = tempdir()?;
    serve(&server, 200, &format!("{HEADER}2025-W10,IT,RSV,cases,3\n")).await;
    run_against(&server, dir.path()).await;
    let artifact_before = fs::read(dir.path().join("ecdc_weekly.jsonl"))?;
    let status_before = load_status(dir.path());

    serve(&server, 200, "country,pathogen,metric,value\nIT,RSV,cases,4\n").await;
    let outcome = run_against(&server, dir.path()).await;

    match &outcome {
        RunOutcome::Degraded { reason } => {
            assert!(reason.contains("missing required column 'date'"), "{reason}")
        }
        other => panic!("expected degraded, got {other:?}"),
    }
    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(fs::read(dir.path().join("ecdc_weekly.jsonl"))?, artifact_before);
    let status_after = load_status(dir.path());
    assert!(status_after.stale);
    assert_eq!(status_after.build_time, status_before.build_time);
    assert_eq!(status_after.record_count, status_before.record_count);
    assert_eq!(status_after.fingerprint, status_before.fingerprint);
    Ok(())
}

#[tokio::test]
async fn single_negative_count_is_rejected_and_run_succeeds() -> Result<()> {
    let server = MockServer::start().await;
    let dir = tempdir()?;
    serve(
        &server,
        200,
        &format!(
            "{HEADER}\
             2025-W10,IT,RSV,cases,12\n\
             2025-W11,IT,RSV,cases,-1\n\
             2025-W12,IT,RSV,cases,15\n\
             2025-W10,IT,influenza,positivity_rate,7.5\n\
             2025-W11,IT,influenza,positivity_rate,8.0\n"
        ),
    )
    .await;

    let outcome = run_against(&server, dir.path()).await;
    assert!(matches!(outcome, RunOutcome::Rewritten { record_count: 4, .. }), "{outcome:?}");
    let records = published_records(dir.path());
    assert!(records.iter().all(|r| r.value >= 0.0));
    Ok(())
}

#[tokio::test]
async fn too_many_rejections_degrade() -> Result<()> {
    let server = MockServer::start().await;
    let dir = tempdir()?;
    serve(
        &server,
        200,
        &format!(
            "{HEADER}\
             2025-W10,IT,RSV,cases,12\n\
             2025-W11,IT,RSV,cases,-1\n\
             2025-W12,IT,RSV,cases,n.d.\n"
        ),
    )
    .await;

    let outcome = run_against(&server, dir.path()).await;
    assert!(matches!(outcome, RunOutcome::Degraded { .. }), "{outcome:?}");
    assert!(!dir.path().join("ecdc_weekly.jsonl").exists());
    let status = load_status(dir.path());
    assert!(status.stale);
    assert_eq!(status.build_time, None);
    assert_eq!(status.record_count, 0);
    Ok(())
}

#[tokio::test]
async fn identical_input_is_idempotent() -> Result<()> {
    let server = MockServer::start().await;
    let dir = tempdir()?;
    let body = format!(
        "{HEADER}2025-W02,IT,RSV,cases,5\n2025-W01,IT,influenza,tests,120\n2025-W01,IT,RSV,cases,4\n"
    );
    serve(&server, 200, &body).await;

    let first = run_against(&server, dir.path()).await;
    assert!(matches!(first, RunOutcome::Rewritten { .. }));
    let artifact = fs::read(dir.path().join("ecdc_weekly.jsonl"))?;
    let status_bytes = fs::read(dir.path().join("status.json"))?;

    let second = run_against(&server, dir.path()).await;
    assert_eq!(
        second,
        RunOutcome::Unchanged {
            record_count: 3,
            status_refreshed: false
        }
    );
    assert_eq!(fs::read(dir.path().join("ecdc_weekly.jsonl"))?, artifact);
    assert_eq!(fs::read(dir.path().join("status.json"))?, status_bytes);

    let weeks: Vec<String> = published_records(dir.path())
        .iter()
        .map(|r| format!("{} {}", r.iso_week, r.pathogen))
        .collect();
    assert_eq!(weeks, ["2025-W01 influenza", "2025-W01 RSV", "2025-W02 RSV"]);
    Ok(())
}

#[tokio::test]
async fn fetch_failure_leaves_artifact_byte_identical() -> Result<()> {
    let server = MockServer::start().await;
    let dir = tempdir()?;
    serve(&server, 200, &format!("{HEADER}2025-W10,IT,RSV,cases,3\n")).await;
    run_against(&server, dir.path()).await;
    let artifact = fs::read(dir.path().join("ecdc_weekly.jsonl"))?;

    serve(&server, 500, "").await;
    let outcome = run_against(&server, dir.path()).await;
    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(fs::read(dir.path().join("ecdc_weekly.jsonl"))?, artifact);
    let status = load_status(dir.path());
    assert!(status.stale);
    assert!(status.degraded_reason.unwrap().contains("HTTP 500"));

    serve(&server, 200, &format!("{HEADER}2025-W10,IT,RSV,cases,3\n")).await;
    let recovered = run_against(&server, dir.path()).await;
    assert_eq!(
        recovered,
        RunOutcome::Unchanged {
            record_count: 1,
            status_refreshed: true
        }
    );
    assert!(!load_status(dir.path()).stale);
    Ok(())
}

#[tokio::test]
async fn corrupt_status_is_rebuilt_from_artifact_on_degrade() -> Result<()> {
    let server = MockServer::start().await;
    let dir = tempdir()?;
    serve(&server, 200, &format!("{HEADER}2025-W10,IT,RSV,cases,3\n")).await;
    run_against(&server, dir.path()).await;
    let artifact = fs::read(dir.path().join("ecdc_weekly.jsonl"))?;
    fs::write(dir.path().join("status.json"), "{corrupt")?;

    serve(&server, 503, "").await;
    let outcome = run_against(&server, dir.path()).await;
    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(fs::read(dir.path().join("ecdc_weekly.jsonl"))?, artifact);

    let status = load_status(dir.path());
    assert!(status.stale);
    assert_eq!(status.record_count, 1);
    assert_eq!(status.fingerprint, Some(change_detect::fingerprint(&artifact)));
    Ok(())
}

#[tokio::test]
async fn mock_run_publishes_an_artifact_that_verifies() -> Result<()> {
    let dir = tempdir()?;
    let today = NaiveDate::from_ymd_opt(2025, 9, 8).unwrap();
    let http = Arc::new(MockFeed::new(today));
    let outcome = governor(http, dir.path(), FeedDescriptor::ecdc_erviss())
        .run()
        .await?;
    assert!(matches!(outcome, RunOutcome::Rewritten { record_count: 104, .. }), "{outcome:?}");

    let store = store(dir.path());
    let feeds = [FeedDescriptor::ecdc_erviss()];
    let report = VerifyUseCase::new(&store, &feeds, 12).verify(today)?;
    assert!(report.passed(), "{:?}", report.problems);
    assert_eq!(report.record_count, 104);
    assert_eq!(report.latest_week.map(|w| w.to_string()).as_deref(), Some("2025-W36"));
    Ok(())
}
