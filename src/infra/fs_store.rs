use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

use crate::app::ports::ArtifactStorePort;
use crate::config::OutputConfig;
use crate::domain::StatusDescriptor;
use crate::error::PublishError;
use crate::observability::metrics;

/// Artifact and status files in one output directory.
pub struct FsArtifactStore {
    artifact_path: PathBuf,
    status_path: PathBuf,
}

impl FsArtifactStore {
    pub fn new(artifact_path: impl Into<PathBuf>, status_path: impl Into<PathBuf>) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            status_path: status_path.into(),
        }
    }

    pub fn from_config(output: &OutputConfig) -> Self {
        Self::new(output.artifact_path(), output.status_path())
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn status_path(&self) -> &Path {
        &self.status_path
    }
}

/// Write `bytes` to a temp file beside `path`, fsync, and rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PublishError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| PublishError::io(dir, e))?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let prefix = format!(".{name}.");
    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| PublishError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| PublishError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| PublishError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| PublishError::io(path, e.error))?;
    Ok(())
}

fn status_bytes(status: &StatusDescriptor) -> Result<Vec<u8>, PublishError> {
    let mut bytes = serde_json::to_vec_pretty(status)?;
    bytes.push(b'\n');
    Ok(bytes)
}

impl ArtifactStorePort for FsArtifactStore {
    fn load_status(&self) -> Option<StatusDescriptor> {
        let bytes = match fs::read(&self.status_path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cannot read {}: {}; treating as absent", self.status_path.display(), e);
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(status) => Some(status),
            Err(e) => {
                warn!("Ignoring unreadable status {}: {}", self.status_path.display(), e);
                None
            }
        }
    }

    fn artifact_exists(&self) -> bool {
        self.artifact_path.is_file()
    }

    fn read_artifact(&self) -> Result<Option<Vec<u8>>, PublishError> {
        match fs::read(&self.artifact_path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PublishError::io(&self.artifact_path, e)),
        }
    }

    #[instrument(skip_all, fields(bytes = artifact.len()))]
    fn publish(&self, artifact: &[u8], status: &StatusDescriptor) -> Result<(), PublishError> {
        let status = status_bytes(status)?;
        write_atomic(&self.artifact_path, artifact).inspect_err(|_| metrics::publish::error())?;
        info!("Wrote {} bytes to {}", artifact.len(), self.artifact_path.display());
        write_atomic(&self.status_path, &status).inspect_err(|_| metrics::publish::error())?;
        Ok(())
    }

    fn write_status(&self, status: &StatusDescriptor) -> Result<(), PublishError> {
        let bytes = status_bytes(status)?;
        write_atomic(&self.status_path, &bytes).inspect_err(|_| metrics::publish::error())?;
        info!(
            "Wrote status to {} (stale={})",
            self.status_path.display(),
            status.stale
        );
        Ok(())
    }
}
