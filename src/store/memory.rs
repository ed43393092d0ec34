//! In-process store, used when embedding the bridge and in tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::{ProjectStore, StoreFuture};
use crate::models::file::FileRecord;
use crate::sanitize::sanitize_path;
use crate::{AppError, Result};

type Projects = HashMap<String, BTreeMap<String, Vec<u8>>>;

/// Volatile [`ProjectStore`] keeping every project in a map.
#[derive(Debug, Default)]
pub struct MemoryProjectStore {
    projects: Mutex<Projects>,
}

impl MemoryProjectStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file directly, bypassing the async interface.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the internal lock is poisoned.
    pub fn insert(&self, project_id: &str, path: &str, content: impl Into<Vec<u8>>) -> Result<()> {
        let mut guard = self.lock()?;
        guard
            .entry(project_id.to_owned())
            .or_default()
            .insert(sanitize_path(path), content.into());
        Ok(())
    }

    /// Copy of a project's files keyed by path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the internal lock is poisoned.
    pub fn snapshot(&self, project_id: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        Ok(self.lock()?.get(project_id).cloned().unwrap_or_default())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Projects>> {
        self.projects
            .lock()
            .map_err(|_| AppError::Store("memory store mutex poisoned".into()))
    }
}

impl ProjectStore for MemoryProjectStore {
    fn list_files(&self, project_id: &str) -> StoreFuture<'_, Vec<FileRecord>> {
        let project_id = project_id.to_owned();
        Box::pin(async move {
            let guard = self.lock()?;
            Ok(guard
                .get(&project_id)
                .map(|files| {
                    files
                        .iter()
                        .map(|(path, content)| FileRecord::new(path.clone(), content.clone()))
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    fn write_file(&self, project_id: &str, path: &str, content: Vec<u8>) -> StoreFuture<'_, ()> {
        let project_id = project_id.to_owned();
        let path = path.to_owned();
        Box::pin(async move { self.insert(&project_id, &path, content) })
    }

    fn delete_file(&self, project_id: &str, path: &str) -> StoreFuture<'_, ()> {
        let project_id = project_id.to_owned();
        let path = sanitize_path(path);
        Box::pin(async move {
            if let Some(files) = self.lock()?.get_mut(&project_id) {
                files.remove(&path);
            }
            Ok(())
        })
    }
}
