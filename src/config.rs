use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::constants::*;
use crate::domain::Source;
use crate::error::ConfigError;
use crate::pipeline::processing::quality_gate::ValidationPolicy;
use crate::registry::FeedDescriptor;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub output: OutputConfig,
    pub fetch: FetchConfig,
    pub validation: ValidationPolicy,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub feeds: Vec<FeedDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub data_dir: PathBuf,
    pub artifact_name: String,
    pub status_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for daily-rotated JSON logs. Console only when unset.
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus textfile written at the end of each run.
    pub textfile: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            artifact_name: DEFAULT_ARTIFACT_NAME.to_string(),
            status_name: DEFAULT_STATUS_NAME.to_string(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl OutputConfig {
    pub fn artifact_path(&self) -> PathBuf {
        self.data_dir.join(&self.artifact_name)
    }

    pub fn status_path(&self) -> PathBuf {
        self.data_dir.join(&self.status_name)
    }
}

impl Config {
    /// Load configuration from `path`, or from `surveillance.toml` when it
    /// exists, then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => {
                debug!("No {} found, using built-in defaults", DEFAULT_CONFIG_PATH);
                Self::default()
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Fill in the built-in feed when none is configured, then apply
    /// environment overrides looked up through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.feeds.is_empty() {
            self.feeds.push(FeedDescriptor::ecdc_erviss());
        }
        if let Some(url) = lookup(ECDC_URL_ENV).filter(|v| !v.trim().is_empty()) {
            for feed in self.feeds.iter_mut().filter(|f| f.source == Source::Ecdc) {
                feed.url = url.trim().to_string();
            }
        }
        if let Some(dir) = lookup(DATA_DIR_ENV).filter(|v| !v.trim().is_empty()) {
            self.output.data_dir = PathBuf::from(dir.trim());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Invalid("fetch.timeout_secs must be positive".into()));
        }
        if self.fetch.max_attempts == 0 {
            return Err(ConfigError::Invalid("fetch.max_attempts must be at least 1".into()));
        }
        self.validation.validate()?;
        if self.output.artifact_name.trim().is_empty() || self.output.status_name.trim().is_empty() {
            return Err(ConfigError::Invalid("output file names must not be empty".into()));
        }
        if self.output.artifact_name == self.output.status_name {
            return Err(ConfigError::Invalid(
                "output.artifact_name and output.status_name must differ".into(),
            ));
        }
        if !self.feeds.iter().any(|f| f.enabled) {
            return Err(ConfigError::Invalid("no enabled feeds configured".into()));
        }
        for feed in &self.feeds {
            if feed.countries.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "feed {} ({}) declares no countries in scope",
                    feed.source, feed.url
                )));
            }
            if feed.url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("feed {} has an empty url", feed.source)));
            }
        }
        Ok(())
    }

    pub fn enabled_feeds(&self) -> impl Iterator<Item = &FeedDescriptor> {
        self.feeds.iter().filter(|f| f.enabled)
    }
}
