//! Reconciliation between working directories and the durable store.
//!
//! [`SyncEngine::download`] hydrates a working directory and seeds the
//! project's [`HashIndex`] with what was written, so untouched files never
//! count as changed. [`SyncEngine::reconcile`] walks the directory after a
//! run, uploads files whose digest differs from the index and reports
//! per-file failures without aborting the remaining uploads.
//!
//! Deleted files are always detected and reported. They are only removed
//! from the store when `propagate_deletions` is enabled.

pub mod hash_index;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::SyncConfig;
use crate::models::file::{sha256_hex, SyncFailure};
use crate::sanitize::{is_excluded, sanitize_path};
use crate::store::ProjectStore;
use crate::workspace::{walk, Hydration, WorkspaceManager};
use crate::{AppError, Result};

pub use hash_index::HashIndex;

/// Reconciliation behaviour derived from [`SyncConfig`].
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Relative-path globs that are never uploaded.
    pub ignore_patterns: Vec<glob::Pattern>,
    /// Remove vanished files from the store.
    pub propagate_deletions: bool,
}

impl SyncOptions {
    /// Compile options from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an invalid glob.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let ignore_patterns = config
            .ignore_patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p)
                    .map_err(|err| AppError::Config(format!("invalid ignore pattern {p}: {err}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            ignore_patterns,
            propagate_deletions: config.propagate_deletions,
        })
    }

    fn is_ignored(&self, path: &str) -> bool {
        self.ignore_patterns.iter().any(|p| p.matches(path))
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Paths uploaded, sorted.
    pub changed: Vec<String>,
    /// Paths known to the index but missing on disk, sorted.
    pub deleted: Vec<String>,
    /// Files that could not be uploaded or deleted.
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    /// Whether every operation succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Drives hydration and reconciliation for all projects.
pub struct SyncEngine {
    store: Arc<dyn ProjectStore>,
    workspace: WorkspaceManager,
    index: HashIndex,
    options: SyncOptions,
}

impl SyncEngine {
    /// Construct an engine with an empty hash index.
    #[must_use]
    pub fn new(store: Arc<dyn ProjectStore>, workspace: WorkspaceManager, options: SyncOptions) -> Self {
        Self {
            store,
            workspace,
            index: HashIndex::new(),
            options,
        }
    }

    /// The working directory manager used for hydration and teardown.
    #[must_use]
    pub fn workspace(&self) -> &WorkspaceManager {
        &self.workspace
    }

    /// The per-project hash index.
    #[must_use]
    pub fn index(&self) -> &HashIndex {
        &self.index
    }

    /// Hydrate the working directory and re-seed the project's index.
    ///
    /// # Errors
    ///
    /// Propagates hydration failures from [`WorkspaceManager::hydrate`].
    pub async fn download(&self, project_id: &str) -> Result<Hydration> {
        let hydration = self.workspace.hydrate(project_id).await?;
        self.index.replace(
            project_id,
            hydration
                .files
                .iter()
                .map(|f| (f.path.clone(), f.hash.clone())),
        );
        Ok(hydration)
    }

    /// Upload files under `root` whose content differs from the index.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Sync` only if the directory cannot be walked;
    /// per-file failures are collected in [`SyncReport::failures`].
    pub async fn reconcile(&self, project_id: &str, root: &Path) -> Result<SyncReport> {
        let span = info_span!("reconcile", project_id);
        async move {
            let Scan { files: scanned, collisions } = self.scan(root).await?;
            let known = self.index.snapshot(project_id);
            let mut report = SyncReport {
                failures: collisions,
                ..SyncReport::default()
            };

            for (path, file) in &scanned {
                if known.get(path) == Some(&file.hash) {
                    continue;
                }
                match self.upload(project_id, path, &file.absolute).await {
                    Ok(()) => report.changed.push(path.clone()),
                    Err(err) => {
                        warn!(path, %err, "upload failed");
                        report.failures.push(SyncFailure {
                            path: path.clone(),
                            message: err.to_string(),
                        });
                    }
                }
            }

            let mut deleted: Vec<String> = known
                .into_keys()
                .filter(|path| {
                    !scanned.contains_key(path)
                        && !is_excluded(path, self.workspace.excluded_dirs())
                        && !self.options.is_ignored(path)
                })
                .collect();
            deleted.sort();

            if self.options.propagate_deletions {
                for path in &deleted {
                    match self.store.delete_file(project_id, path).await {
                        Ok(()) => self.index.remove(project_id, path),
                        Err(err) => {
                            warn!(path, %err, "remote delete failed");
                            report.failures.push(SyncFailure {
                                path: path.clone(),
                                message: err.to_string(),
                            });
                        }
                    }
                }
            } else if !deleted.is_empty() {
                info!(
                    count = deleted.len(),
                    "local deletions detected but not propagated"
                );
            }
            report.deleted = deleted;

            info!(
                changed = report.changed.len(),
                deleted = report.deleted.len(),
                failed = report.failures.len(),
                "reconciliation finished"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn upload(&self, project_id: &str, path: &str, absolute: &Path) -> Result<()> {
        let content = tokio::fs::read(absolute).await?;
        // Re-hash what is actually uploaded; the file may have changed since the scan.
        let hash = sha256_hex(&content);
        self.store.write_file(project_id, path, content).await?;
        self.index.set(project_id, path, hash);
        Ok(())
    }

    /// Walk and hash `root` on the blocking pool.
    async fn scan(&self, root: &Path) -> Result<Scan> {
        let root = root.to_path_buf();
        let excluded = self.workspace.excluded_dirs().to_vec();
        let options = self.options.clone();

        tokio::task::spawn_blocking(move || scan_tree(&root, &excluded, &options))
            .await
            .map_err(|err| AppError::Sync(format!("scan task panicked: {err}")))?
    }
}

/// A local file selected for upload.
struct ScannedFile {
    hash: String,
    absolute: PathBuf,
    /// The on-disk name already equals its sanitized path.
    exact: bool,
}

/// Files keyed by sanitized path, plus files dropped because their
/// sanitized path was taken.
#[derive(Default)]
struct Scan {
    files: BTreeMap<String, ScannedFile>,
    collisions: Vec<SyncFailure>,
}

fn scan_tree(root: &Path, excluded_dirs: &[String], options: &SyncOptions) -> Result<Scan> {
    let files = walk::collect_files(root, excluded_dirs)
        .map_err(|err| AppError::Sync(format!("cannot walk working directory: {err}")))?;

    let mut scan = Scan::default();
    for file in files {
        let path = sanitize_path(&file.relative);
        if path.is_empty() || options.is_ignored(&path) {
            debug!(path = %file.relative, "skipping file during scan");
            continue;
        }
        let exact = path == file.relative;
        if !exact {
            warn!(original = %file.relative, sanitized = %path, "file name normalized for upload");
        }

        let hash = match std::fs::read(&file.absolute) {
            Ok(content) => sha256_hex(&content),
            Err(err) => {
                // An empty digest never matches the index, so the upload is
                // attempted and the read error lands in the report.
                warn!(path, %err, "cannot read file during scan");
                String::new()
            }
        };
        let scanned = ScannedFile {
            hash,
            absolute: file.absolute,
            exact,
        };

        // Keep the file whose name is already clean; report the other one.
        let dropped = match scan.files.get(&path).map(|existing| existing.exact) {
            None => {
                scan.files.insert(path, scanned);
                continue;
            }
            Some(false) if scanned.exact => {
                scan.files.insert(path.clone(), scanned).map(|f| f.absolute)
            }
            Some(_) => Some(scanned.absolute),
        };
        if let Some(dropped) = dropped {
            let original = dropped
                .strip_prefix(root)
                .map_or_else(|_| dropped.display().to_string(), |p| p.display().to_string());
            warn!(original = %original, path, "sanitized name collision, file not uploaded");
            scan.collisions.push(SyncFailure {
                path: original,
                message: format!("name collides with {path} after sanitization"),
            });
        }
    }
    Ok(scan)
}
