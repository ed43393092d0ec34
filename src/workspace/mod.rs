//! Ephemeral per-project working directories.
//!
//! A [`WorkspaceManager`] materializes a project's files from the durable
//! store under `<work_root>/<project_id>` and removes the tree again once the
//! owning execution ends. Exclusive ownership of a directory is guaranteed by
//! admission control in the orchestrator, not by locking here.

pub mod path_safety;
pub mod walk;
pub mod writer;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, info_span, warn, Instrument};

use crate::models::file::{sha256_hex, FileRecord};
use crate::sanitize::{is_excluded, sanitize_path, validate_project_id};
use crate::store::ProjectStore;
use crate::{AppError, Result};

/// A file written during hydration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydratedFile {
    /// Sanitized relative path.
    pub path: String,
    /// SHA-256 hex digest of the written content.
    pub hash: String,
}

/// Outcome of [`WorkspaceManager::hydrate`].
#[derive(Debug, Clone)]
pub struct Hydration {
    /// Absolute root of the working directory.
    pub root: PathBuf,
    /// Files materialized from the store.
    pub files: Vec<HydratedFile>,
}

/// Creates and destroys working directories keyed by project id.
pub struct WorkspaceManager {
    base_dir: PathBuf,
    store: Arc<dyn ProjectStore>,
    excluded_dirs: Vec<String>,
}

impl WorkspaceManager {
    /// Construct a manager rooted at `base_dir`.
    #[must_use]
    pub fn new(base_dir: PathBuf, store: Arc<dyn ProjectStore>, excluded_dirs: Vec<String>) -> Self {
        Self {
            base_dir,
            store,
            excluded_dirs,
        }
    }

    /// Directory names never materialized or walked.
    #[must_use]
    pub fn excluded_dirs(&self) -> &[String] {
        &self.excluded_dirs
    }

    /// Working directory path for `project_id` (may not exist yet).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an unusable project id.
    pub fn root_for(&self, project_id: &str) -> Result<PathBuf> {
        Ok(self.base_dir.join(validate_project_id(project_id)?))
    }

    /// Whether a working directory currently exists for `project_id`.
    pub async fn exists(&self, project_id: &str) -> bool {
        match self.root_for(project_id) {
            Ok(root) => tokio::fs::try_exists(&root).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Materialize `project_id` into a fresh working directory.
    ///
    /// A directory left behind by an earlier failed teardown is removed
    /// first. Files inside excluded directories, or whose path sanitizes to
    /// nothing, are skipped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the file list cannot be fetched, or
    /// `AppError::Io` / `AppError::PathViolation` if a file cannot be written.
    pub async fn hydrate(&self, project_id: &str) -> Result<Hydration> {
        let root = self.root_for(project_id)?;
        let span = info_span!("hydrate", project_id, root = %root.display());

        async move {
            if tokio::fs::try_exists(&root).await.unwrap_or(false) {
                warn!("removing stale working directory");
                tokio::fs::remove_dir_all(&root).await.map_err(|err| {
                    AppError::Io(format!("cannot clear stale working directory: {err}"))
                })?;
            }
            tokio::fs::create_dir_all(&root).await?;

            let records = self.store.list_files(project_id).await?;
            let listed = records.len();

            let write_root = root.clone();
            let excluded = self.excluded_dirs.clone();
            let files = tokio::task::spawn_blocking(move || {
                write_records(&write_root, records, &excluded)
            })
            .await
            .map_err(|err| AppError::Io(format!("hydration task panicked: {err}")))??;

            info!(listed, written = files.len(), "working directory hydrated");
            Ok(Hydration { root, files })
        }
        .instrument(span)
        .await
    }

    /// Remove the working directory for `project_id`.
    ///
    /// Failures are logged and swallowed; a stale directory is cleaned up by
    /// the next [`hydrate`](Self::hydrate) for the same project.
    pub async fn teardown(&self, project_id: &str) {
        let root = match self.root_for(project_id) {
            Ok(root) => root,
            Err(err) => {
                warn!(project_id, %err, "teardown skipped for invalid project id");
                return;
            }
        };

        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => info!(project_id, "working directory removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(project_id, "working directory already absent");
            }
            Err(err) => {
                warn!(project_id, %err, root = %root.display(), "failed to remove working directory");
            }
        }
    }
}

fn write_records(
    root: &Path,
    records: Vec<FileRecord>,
    excluded_dirs: &[String],
) -> Result<Vec<HydratedFile>> {
    let mut files = Vec::with_capacity(records.len());

    for record in records {
        let path = sanitize_path(&record.path);
        if path.is_empty() || is_excluded(&path, excluded_dirs) {
            debug!(path = %record.path, "skipping file during hydration");
            continue;
        }

        writer::write_atomic(root, &path, &record.content)?;
        files.push(HydratedFile {
            hash: sha256_hex(&record.content),
            path,
        });
    }

    Ok(files)
}
