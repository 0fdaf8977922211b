use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use resp_surveillance::app::ports::{ArtifactStorePort, HttpClientPort};
use resp_surveillance::app::verify_use_case::VerifyUseCase;
use resp_surveillance::config::{Config, LoggingConfig};
use resp_surveillance::infra::fs_store::FsArtifactStore;
use resp_surveillance::infra::http_client::ReqwestHttp;
use resp_surveillance::infra::mock_feed::MockFeed;
use resp_surveillance::observability::{init_logging, metrics};
use resp_surveillance::pipeline::StalenessGovernor;

const EXIT_HARD_FAILURE: u8 = 1;

#[derive(Parser)]
#[command(name = "resp_surveillance")]
#[command(about = "Weekly respiratory surveillance ETL for a static dashboard")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, validate and publish the weekly artifact
    Run {
        /// Configuration file (defaults to surveillance.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Feed synthetic data through the pipeline instead of fetching
        #[arg(long)]
        mock: bool,
    },
    /// Audit the published artifact and status
    Verify {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Warn when no week within this many weeks is present
        #[arg(long, default_value_t = 12)]
        freshness_weeks: u32,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config_path = match &cli.command {
        Commands::Run { config, .. } | Commands::Verify { config, .. } => config.clone(),
    };
    let config = match Config::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            let _guard = init_logging(&LoggingConfig::default());
            error!("Configuration error: {}", e);
            return ExitCode::from(EXIT_HARD_FAILURE);
        }
    };
    let _guard = init_logging(&config.logging);
    if config.metrics.textfile.is_some() {
        metrics::init_textfile();
    }

    let result = match cli.command {
        Commands::Run { mock, .. } => run(&config, mock).await,
        Commands::Verify {
            freshness_weeks, ..
        } => verify(&config, freshness_weeks),
    };

    if let Some(path) = &config.metrics.textfile {
        if let Err(e) = metrics::write_textfile(path) {
            warn!("Failed to write metrics textfile: {}", e);
        }
    }

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_HARD_FAILURE)
        }
    }
}

async fn run(config: &Config, mock: bool) -> anyhow::Result<u8> {
    let http: Arc<dyn HttpClientPort> = if mock {
        info!("Mock mode: synthetic feed data");
        Arc::new(MockFeed::new(Utc::now().date_naive()))
    } else {
        Arc::new(ReqwestHttp::new(&config.fetch).context("building HTTP client")?)
    };
    let store: Arc<dyn ArtifactStorePort> = Arc::new(FsArtifactStore::from_config(&config.output));

    let outcome = StalenessGovernor::from_config(config, http, store)
        .run()
        .await
        .context("publishing failed")?;
    info!("Outcome: {:?}", outcome);
    Ok(outcome.exit_code() as u8)
}

fn verify(config: &Config, freshness_weeks: u32) -> anyhow::Result<u8> {
    let store = FsArtifactStore::from_config(&config.output);
    let report = VerifyUseCase::new(&store, config.enabled_feeds(), freshness_weeks)
        .verify(Utc::now().date_naive())
        .context("reading published artifact")?;
    if report.passed() {
        info!(
            "{} passed: {} records, latest week {}",
            store.artifact_path().display(),
            report.record_count,
            report
                .latest_week
                .map(|w| w.to_string())
                .unwrap_or_else(|| "none".into())
        );
        Ok(0)
    } else {
        error!(
            "{} failed with {} problems",
            store.artifact_path().display(),
            report.problems.len()
        );
        Ok(EXIT_HARD_FAILURE)
    }
}
