//! Relative path normalization and project identifier validation.

use crate::{AppError, Result};

/// Characters rejected by at least one common filesystem.
const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Maximum length of a project identifier.
const MAX_PROJECT_ID_LEN: usize = 128;

/// Normalize `input` into a safe relative path.
///
/// Backslashes become `/`, empty, `.` and `..` segments are dropped (which
/// also strips leading slashes and collapses repeated separators), and
/// characters illegal on common filesystems or in the control range are
/// removed from each segment. The result never starts with `/` and never
/// contains a `..` segment; it may be empty when nothing usable remains.
///
/// The function is idempotent: `sanitize_path(&sanitize_path(x)) ==
/// sanitize_path(x)`.
#[must_use]
pub fn sanitize_path(input: &str) -> String {
    input
        .split(['/', '\\'])
        .map(clean_segment)
        .filter(|segment| !matches!(segment.as_str(), "" | "." | ".."))
        .collect::<Vec<_>>()
        .join("/")
}

fn clean_segment(segment: &str) -> String {
    segment
        .chars()
        .filter(|c| !c.is_control() && !ILLEGAL_CHARS.contains(c))
        .collect()
}

/// Whether any segment of the relative `path` names an excluded directory.
#[must_use]
pub fn is_excluded(path: &str, excluded_dirs: &[String]) -> bool {
    path.split('/')
        .any(|segment| excluded_dirs.iter().any(|dir| dir == segment))
}

/// Validate a project identifier used to name on-disk directories.
///
/// Accepts 1–128 characters from `[A-Za-z0-9._-]` that do not start with `.`.
///
/// # Errors
///
/// Returns `AppError::Validation` when the identifier is unusable.
pub fn validate_project_id(project_id: &str) -> Result<&str> {
    if project_id.is_empty() || project_id.len() > MAX_PROJECT_ID_LEN {
        return Err(AppError::Validation(format!(
            "project id must be 1-{MAX_PROJECT_ID_LEN} characters"
        )));
    }

    if project_id.starts_with('.') {
        return Err(AppError::Validation(
            "project id must not start with '.'".into(),
        ));
    }

    if !project_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(AppError::Validation(
            "project id contains unsupported characters".into(),
        ));
    }

    Ok(project_id)
}
