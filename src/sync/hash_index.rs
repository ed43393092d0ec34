//! Per-project map of relative path to last-synced SHA-256 digest.
//!
//! The index is process-local and rebuildable: it is re-seeded on every
//! download and never persisted, so a restart simply starts from empty.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

type ProjectHashes = HashMap<String, String>;

/// In-memory hash index owned by the sync engine.
#[derive(Debug, Default)]
pub struct HashIndex {
    projects: Mutex<HashMap<String, ProjectHashes>>,
}

impl HashIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known hash for `path` in `project_id`.
    #[must_use]
    pub fn get(&self, project_id: &str, path: &str) -> Option<String> {
        self.lock()
            .get(project_id)
            .and_then(|hashes| hashes.get(path))
            .cloned()
    }

    /// Record `hash` as the current digest of `path`.
    pub fn set(&self, project_id: &str, path: &str, hash: String) {
        self.lock()
            .entry(project_id.to_owned())
            .or_default()
            .insert(path.to_owned(), hash);
    }

    /// Drop the entry for `path`.
    pub fn remove(&self, project_id: &str, path: &str) {
        if let Some(hashes) = self.lock().get_mut(project_id) {
            hashes.remove(path);
        }
    }

    /// Replace every entry of `project_id` with `entries`.
    pub fn replace(&self, project_id: &str, entries: impl IntoIterator<Item = (String, String)>) {
        self.lock()
            .insert(project_id.to_owned(), entries.into_iter().collect());
    }

    /// Copy of the entries for `project_id` (empty when unknown).
    #[must_use]
    pub fn snapshot(&self, project_id: &str) -> HashMap<String, String> {
        self.lock().get(project_id).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ProjectHashes>> {
        self.projects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
