use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::processing::quality_gate::ValidationError;

/// Retrieval of a remote feed failed. Always recoverable: the governor
/// degrades the run instead of aborting.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("{url} unreachable: {message}")]
    Unreachable { url: String, message: String },

    #[error("{url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    #[error("{url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Unreachable { .. } => "unreachable",
            FetchError::Timeout { .. } => "timeout",
            FetchError::HttpStatus { .. } => "http_status",
        }
    }
}

/// The source document no longer has the expected shape.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("missing required column '{name}'")]
    MissingColumn { name: String },

    #[error("document has no header row")]
    EmptyDocument,

    #[error("malformed CSV at line {line}: {message}")]
    Malformed { line: u64, message: String },
}

/// Too many rows were rejected for the valid remainder to be trusted.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{rejected} of {considered} rows rejected, {accepted} accepted: {limit}")]
pub struct ThresholdExceededError {
    pub rejected: usize,
    pub considered: usize,
    pub accepted: usize,
    pub limit: String,
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl PublishError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PublishError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything that can end a pipeline stage early.
///
/// Per-row `Validation` errors never escape a batch; they are carried here
/// only so stage helpers can share one `Result` alias.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("rejection threshold exceeded: {0}")]
    ThresholdExceeded(#[from] ThresholdExceededError),

    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Whether the governor may absorb this error into a degraded run.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            PipelineError::Fetch(_) | PipelineError::Schema(_) | PipelineError::ThresholdExceeded(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
