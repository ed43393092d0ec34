//! One-claim-per-project admission control.
//!
//! A claim is held by an [`AdmissionGuard`]; dropping the guard releases the
//! project, including when the owning task panics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::{AppError, Result};

type Claims = Arc<Mutex<HashMap<String, String>>>;

/// Tracks which projects are currently claimed and by whom.
#[derive(Debug, Clone, Default)]
pub struct AdmissionTable {
    claims: Claims,
}

impl AdmissionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `project_id` for `holder`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AdmissionRejected` if the project is already claimed.
    pub fn try_claim(&self, project_id: &str, holder: &str) -> Result<AdmissionGuard> {
        let mut claims = lock(&self.claims);
        if let Some(current) = claims.get(project_id) {
            return Err(AppError::AdmissionRejected(format!(
                "project {project_id} is busy with {current}"
            )));
        }
        claims.insert(project_id.to_owned(), holder.to_owned());
        debug!(project_id, holder, "admission claimed");

        Ok(AdmissionGuard {
            claims: Arc::clone(&self.claims),
            project_id: project_id.to_owned(),
        })
    }

    /// Current holder of `project_id`, if claimed.
    #[must_use]
    pub fn holder(&self, project_id: &str) -> Option<String> {
        lock(&self.claims).get(project_id).cloned()
    }

    /// Whether `project_id` is claimed.
    #[must_use]
    pub fn is_claimed(&self, project_id: &str) -> bool {
        lock(&self.claims).contains_key(project_id)
    }

    /// Number of claimed projects.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.claims).len()
    }

    /// Whether no project is claimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases its project claim on drop.
#[derive(Debug)]
pub struct AdmissionGuard {
    claims: Claims,
    project_id: String,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        lock(&self.claims).remove(&self.project_id);
        debug!(project_id = %self.project_id, "admission released");
    }
}

fn lock(claims: &Mutex<HashMap<String, String>>) -> MutexGuard<'_, HashMap<String, String>> {
    claims.lock().unwrap_or_else(PoisonError::into_inner)
}
