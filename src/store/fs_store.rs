//! Local-disk project store: one directory per project under a root.

use std::path::{Path, PathBuf};

use super::{ProjectStore, StoreFuture};
use crate::models::file::FileRecord;
use crate::sanitize::{sanitize_path, validate_project_id};
use crate::workspace::{path_safety, walk, writer};
use crate::{AppError, Result};

/// [`ProjectStore`] backed by `<root>/<project_id>/<path>` on local disk.
#[derive(Debug, Clone)]
pub struct FsProjectStore {
    root: PathBuf,
}

impl FsProjectStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the root cannot be created.
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root).map_err(|err| {
            AppError::Store(format!("cannot create store root {}: {err}", root.display()))
        })?;
        Ok(Self { root })
    }

    fn project_dir(&self, project_id: &str) -> Result<PathBuf> {
        Ok(self.root.join(validate_project_id(project_id)?))
    }
}

impl ProjectStore for FsProjectStore {
    fn list_files(&self, project_id: &str) -> StoreFuture<'_, Vec<FileRecord>> {
        let dir = self.project_dir(project_id);
        Box::pin(async move {
            let dir = dir?;
            run_blocking(move || read_project(&dir)).await
        })
    }

    fn write_file(&self, project_id: &str, path: &str, content: Vec<u8>) -> StoreFuture<'_, ()> {
        let dir = self.project_dir(project_id);
        let path = sanitize_path(path);
        Box::pin(async move {
            let dir = dir?;
            run_blocking(move || {
                std::fs::create_dir_all(&dir).map_err(|err| store_error(&dir, &err))?;
                writer::write_atomic(&dir, &path, &content).map(|_| ())
            })
            .await
        })
    }

    fn delete_file(&self, project_id: &str, path: &str) -> StoreFuture<'_, ()> {
        let dir = self.project_dir(project_id);
        let path = sanitize_path(path);
        Box::pin(async move {
            let dir = dir?;
            run_blocking(move || {
                if !dir.exists() {
                    return Ok(());
                }
                let target = path_safety::resolve_within(&dir, &path)?;
                match std::fs::remove_file(&target) {
                    Ok(()) => Ok(()),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(err) => Err(store_error(&target, &err)),
                }
            })
            .await
        })
    }
}

fn read_project(dir: &Path) -> Result<Vec<FileRecord>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    walk::collect_files(dir, &[])?
        .into_iter()
        .map(|file| {
            let content =
                std::fs::read(&file.absolute).map_err(|err| store_error(&file.absolute, &err))?;
            Ok(FileRecord::new(sanitize_path(&file.relative), content))
        })
        .collect()
}

async fn run_blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| AppError::Store(format!("store task panicked: {err}")))?
        .map_err(|err| match err {
            AppError::PathViolation(_) | AppError::Validation(_) | AppError::Store(_) => err,
            other => AppError::Store(other.message().to_owned()),
        })
}

fn store_error(path: &Path, err: &std::io::Error) -> AppError {
    AppError::Store(format!("{}: {err}", path.display()))
}
