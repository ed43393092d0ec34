//! Atomic file writing.
//!
//! Validates the target path against the root, creates parent directories
//! as needed, and writes through `tempfile::NamedTempFile::persist()` so a
//! crash never leaves a half-written file behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::path_safety::resolve_within;
use crate::{AppError, Result};

/// Write `content` to `relative` under `root`, returning the absolute path.
///
/// # Errors
///
/// Returns `AppError::PathViolation` if the path escapes `root`, or
/// `AppError::Io` on directory creation, temp file write, or rename failure.
pub fn write_atomic(root: &Path, relative: &str, content: &[u8]) -> Result<PathBuf> {
    let target = resolve_within(root, relative)?;

    let parent = target
        .parent()
        .ok_or_else(|| AppError::Io("file path has no parent directory".into()))?;

    std::fs::create_dir_all(parent).map_err(|err| {
        AppError::Io(format!(
            "failed to create parent directories for {}: {err}",
            target.display()
        ))
    })?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|err| AppError::Io(format!("failed to create temporary file: {err}")))?;

    tmp.write_all(content)
        .map_err(|err| AppError::Io(format!("failed to write temporary file: {err}")))?;

    tmp.persist(&target).map_err(|err| {
        AppError::Io(format!(
            "failed to persist file to {}: {err}",
            target.display()
        ))
    })?;

    Ok(target)
}
