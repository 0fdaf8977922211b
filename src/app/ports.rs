use async_trait::async_trait;

use crate::domain::StatusDescriptor;
use crate::error::{FetchError, PublishError};

/// Retrieves the raw bytes of a feed.
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Where the artifact and its status descriptor live.
///
/// Writes of either file are all-or-nothing: a reader sees the old content or
/// the new content, never a mix.
pub trait ArtifactStorePort: Send + Sync {
    /// The last status written, or `None` when absent or unreadable.
    fn load_status(&self) -> Option<StatusDescriptor>;

    fn artifact_exists(&self) -> bool;

    /// Current artifact bytes, if one has been published.
    fn read_artifact(&self) -> Result<Option<Vec<u8>>, PublishError>;

    /// Replace the artifact, then the status.
    fn publish(&self, artifact: &[u8], status: &StatusDescriptor) -> Result<(), PublishError>;

    /// Replace the status only; the artifact is not touched.
    fn write_status(&self, status: &StatusDescriptor) -> Result<(), PublishError>;
}
