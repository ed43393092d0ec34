//! Recursive, symlink-free directory walking.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{AppError, Result};

/// A regular file found under a walk root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    /// Path relative to the walk root, `/`-separated.
    pub relative: String,
    /// Absolute path on disk.
    pub absolute: PathBuf,
}

/// Collect every regular file under `root`, sorted by relative path.
///
/// Directories named in `excluded_dirs` are not descended into. Symlinks are
/// never followed, so a link pointing outside the root cannot leak content.
///
/// # Errors
///
/// Returns `AppError::Io` if a directory cannot be read.
pub fn collect_files(root: &Path, excluded_dirs: &[String]) -> Result<Vec<WalkedFile>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir)
            .map_err(|err| AppError::Io(format!("cannot read {}: {err}", dir.display())))?;

        for entry in entries {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();

            if file_type.is_symlink() {
                debug!(path = %path.display(), "skipping symlink");
            } else if file_type.is_dir() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if !excluded_dirs.iter().any(|excluded| *excluded == name) {
                    pending.push(path);
                }
            } else if file_type.is_file() {
                let relative = relative_string(root, &path)?;
                files.push(WalkedFile {
                    relative,
                    absolute: path,
                });
            }
        }
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

fn relative_string(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| AppError::PathViolation(format!("{} is outside root", path.display())))?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/"))
}
