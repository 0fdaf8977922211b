use sha2::{Digest, Sha256};
use tracing::info;

use crate::constants::FINGERPRINT_PREFIX;
use crate::domain::{CanonicalRecord, StatusDescriptor};
use crate::error::PublishError;

/// Canonical JSON-Lines bytes of a sorted record set.
///
/// These exact bytes are both what gets published and what gets fingerprinted,
/// so any change to field order or number formatting is a content change.
pub fn serialize_jsonl(records: &[CanonicalRecord]) -> Result<Vec<u8>, PublishError> {
    let mut out = Vec::with_capacity(records.len() * 112);
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.push(b'\n');
    }
    Ok(out)
}

pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{}{}", FINGERPRINT_PREFIX, hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDecision {
    Changed,
    Unchanged,
}

/// Compare `candidate` with the last published fingerprint. A fingerprint
/// recorded in the status does not count when the artifact itself is gone.
pub fn detect(
    candidate: &str,
    previous: Option<&StatusDescriptor>,
    artifact_exists: bool,
) -> ChangeDecision {
    let previous = previous
        .filter(|_| artifact_exists)
        .and_then(|s| s.fingerprint.as_deref());
    match previous {
        Some(prev) if prev == candidate => {
            info!("Content fingerprint unchanged ({})", candidate);
            ChangeDecision::Unchanged
        }
        Some(prev) => {
            info!("Content changed: {} -> {}", prev, candidate);
            ChangeDecision::Changed
        }
        None => {
            info!("No previous artifact fingerprint; publishing {}", candidate);
            ChangeDecision::Changed
        }
    }
}
