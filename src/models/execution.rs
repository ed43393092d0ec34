//! Execution session model, lifecycle states and output chunks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::file::SyncFailure;
use crate::{AppError, Result};

/// Lifecycle state of an execution session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Admitted, nothing on disk yet.
    Pending,
    /// Working directory is being materialized.
    Hydrating,
    /// Agent process is running.
    Running,
    /// Changed files are being uploaded.
    Reconciling,
    /// Process exited and reconciliation finished.
    Completed,
    /// Hydration, spawn or the process itself failed.
    Failed,
    /// Stopped on request.
    Cancelled,
}

impl ExecutionState {
    /// Whether the state releases admission for the project.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a stop request can still interrupt the run.
    #[must_use]
    pub fn accepts_stop(self) -> bool {
        matches!(self, Self::Pending | Self::Hydrating | Self::Running)
    }
}

/// One supervised run of the agent command against a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ExecutionSession {
    /// Unique execution identifier.
    pub id: String,
    /// Project the execution runs against.
    pub project_id: String,
    /// Verified identity of the requesting user.
    pub user_id: String,
    /// Sanitized command text.
    pub command: String,
    /// Current lifecycle state.
    pub state: ExecutionState,
    /// Admission timestamp.
    pub started_at: DateTime<Utc>,
    /// Terminal timestamp.
    pub ended_at: Option<DateTime<Utc>>,
    /// Process exit code, when the process exited normally.
    pub exit_code: Option<i32>,
    /// Paths uploaded during reconciliation.
    pub files_changed: Vec<String>,
    /// Number of output chunks forwarded so far.
    pub output_seq: u64,
}

impl ExecutionSession {
    /// Construct a pending session with a generated identifier.
    #[must_use]
    pub fn new(project_id: String, user_id: String, command: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id,
            user_id,
            command,
            state: ExecutionState::Pending,
            started_at: Utc::now(),
            ended_at: None,
            exit_code: None,
            files_changed: Vec::new(),
            output_seq: 0,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: ExecutionState) -> bool {
        use ExecutionState::{Cancelled, Completed, Failed, Hydrating, Pending, Reconciling, Running};

        matches!(
            (self.state, next),
            (Pending, Hydrating | Cancelled)
                | (Hydrating, Running | Failed | Cancelled)
                | (Running, Reconciling)
                | (Reconciling, Completed | Failed | Cancelled)
        )
    }

    /// Move to `next`, stamping `ended_at` on terminal states.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Runtime` if the transition is not permitted.
    pub fn transition(&mut self, next: ExecutionState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(AppError::Runtime(format!(
                "invalid execution transition {:?} -> {next:?}",
                self.state
            )));
        }
        self.state = next;
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Milliseconds elapsed between admission and the end (or now).
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        u64::try_from((end - self.started_at).num_milliseconds()).unwrap_or(0)
    }
}

/// Which child stream a chunk came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    /// Standard output.
    Primary,
    /// Standard error.
    Error,
}

/// One line of process output. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutputChunk {
    /// Originating stream.
    pub stream: OutputStream,
    /// Line content without the trailing newline.
    pub content: String,
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// Capture timestamp.
    pub timestamp: DateTime<Utc>,
}

impl OutputChunk {
    /// Build a chunk stamped with the current time.
    #[must_use]
    pub fn new(stream: OutputStream, content: String, sequence: u64) -> Self {
        Self {
            stream,
            content,
            sequence,
            timestamp: Utc::now(),
        }
    }
}

/// Final classification reported to the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Exit code 0 and every upload succeeded.
    Success,
    /// Exit code 0 but at least one upload failed.
    Partial,
    /// Non-zero exit, signal, or wait error.
    Failed,
    /// Stopped on request.
    Cancelled,
}

/// Terminal summary of an execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Execution identifier.
    pub execution_id: String,
    /// Final classification.
    pub status: ExecutionStatus,
    /// Process exit code, if the process exited normally.
    pub exit_code: Option<i32>,
    /// Paths uploaded to the durable store.
    pub files_changed: Vec<String>,
    /// Paths that disappeared from the working directory.
    pub files_deleted: Vec<String>,
    /// Per-file reconciliation failures.
    pub sync_failures: Vec<SyncFailure>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Runtime error description, if any.
    pub error: Option<String>,
}
