//! Confinement of relative file paths to a directory root.
//!
//! Both hydrated working directories and the filesystem store resolve
//! project-relative paths through [`resolve_within`] before touching disk.

use std::path::{Component, Path, PathBuf};

use crate::{AppError, Result};

/// Join the project-relative `candidate` onto `root`.
///
/// The returned path is lexical: a symlink at the leaf is not followed, so
/// writers replace the link and deleters remove the link itself. The
/// deepest component that already exists must still resolve inside `root`,
/// which catches symlinked parent directories pointing elsewhere.
///
/// # Errors
///
/// Returns `AppError::PathViolation` when `root` cannot be canonicalized,
/// when `candidate` is empty, absolute or climbs above `root`, or when an
/// existing component resolves outside `root`.
pub fn resolve_within(root: &Path, candidate: impl AsRef<Path>) -> Result<PathBuf> {
    let root = root
        .canonicalize()
        .map_err(|err| AppError::PathViolation(format!("root invalid: {err}")))?;

    let target = root.join(normalize(candidate.as_ref())?);
    confine(&root, &target)?;
    Ok(target)
}

fn normalize(candidate: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir if normalized.pop() => {}
            Component::ParentDir => {
                return Err(AppError::PathViolation(format!(
                    "{} climbs above the root",
                    candidate.display()
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::PathViolation(format!(
                    "{} is absolute",
                    candidate.display()
                )));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(AppError::PathViolation("path is empty".into()));
    }
    Ok(normalized)
}

/// `target` is lexically under `root`; check what is on disk agrees.
fn confine(root: &Path, target: &Path) -> Result<()> {
    let Some(existing) = target
        .ancestors()
        .take_while(|ancestor| ancestor.starts_with(root))
        .find(|ancestor| ancestor.symlink_metadata().is_ok())
    else {
        return Ok(());
    };

    // A dangling link fails here, as its destination cannot be checked.
    let resolved = existing.canonicalize().map_err(|err| {
        AppError::PathViolation(format!("cannot resolve {}: {err}", existing.display()))
    })?;
    if resolved.starts_with(root) {
        Ok(())
    } else {
        Err(AppError::PathViolation(format!(
            "{} resolves outside the root",
            existing.display()
        )))
    }
}
