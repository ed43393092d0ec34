//! File records exchanged with the durable project store.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single project file as held by the durable store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct FileRecord {
    /// Sanitized relative path (no leading `/`, no `..`).
    pub path: String,
    /// Raw file content.
    pub content: Vec<u8>,
    /// SHA-256 hex digest of `content`.
    pub hash: String,
    /// Content length in bytes.
    pub size: u64,
}

impl FileRecord {
    /// Build a record, computing the hash and size from `content`.
    #[must_use]
    pub fn new(path: impl Into<String>, content: Vec<u8>) -> Self {
        let hash = sha256_hex(&content);
        let size = content.len() as u64;
        Self {
            path: path.into(),
            content,
            hash,
            size,
        }
    }
}

/// Compute the SHA-256 hex digest of the given bytes.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// A file that could not be reconciled with the durable store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    /// Relative path of the file.
    pub path: String,
    /// Why the upload or deletion failed.
    pub message: String,
}
