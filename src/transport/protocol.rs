//! Wire format: `{"event": <name>, "data": <payload>}` text frames with
//! camelCase payload fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::execution::{ExecutionStatus, OutputStream};
use crate::models::file::SyncFailure;
use crate::orchestrator::{SessionEvent, SyncAction};
use crate::sync::SyncReport;
use crate::AppError;

// ── Inbound ──────────────────────────────────────────────────────────────────

/// Events sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Start an execution.
    #[serde(rename = "execute")]
    Execute(ExecutePayload),
    /// Stop an execution.
    #[serde(rename = "stop")]
    Stop(ExecutionRef),
    /// Write to an execution's stdin.
    #[serde(rename = "input")]
    Input(InputPayload),
    /// Manual download or upload.
    #[serde(rename = "file:sync")]
    FileSync(FileSyncPayload),
}

/// `execute` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutePayload {
    /// Target project.
    pub project_id: String,
    /// Command text.
    pub command: String,
}

/// Payload naming a single execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRef {
    /// Execution identifier.
    pub execution_id: String,
}

/// `input` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InputPayload {
    /// Execution identifier.
    pub execution_id: String,
    /// Text written verbatim to stdin.
    #[serde(default)]
    pub data: String,
    /// Close stdin after writing.
    #[serde(default)]
    pub eof: bool,
}

/// `file:sync` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileSyncPayload {
    /// Target project.
    pub project_id: String,
    /// Transfer direction.
    pub action: SyncAction,
}

// ── Outbound ─────────────────────────────────────────────────────────────────

/// Events sent to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Execution admitted.
    #[serde(rename = "execution_started")]
    ExecutionStarted(StartedPayload),
    /// One line of output.
    #[serde(rename = "output")]
    Output(OutputPayload),
    /// Terminal result of an execution that ran.
    #[serde(rename = "complete")]
    Complete(CompletePayload),
    /// Rejected request or failed execution.
    #[serde(rename = "error")]
    Error(ErrorPayload),
    /// Stop observed; no output follows.
    #[serde(rename = "execution_stopped")]
    ExecutionStopped(ExecutionRef),
    /// Manual sync finished.
    #[serde(rename = "file:sync_complete")]
    FileSyncComplete(FileSyncCompletePayload),
}

/// `execution_started` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StartedPayload {
    /// Execution identifier.
    pub execution_id: String,
    /// Project being executed.
    pub project_id: String,
}

/// `output` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutputPayload {
    /// Execution identifier.
    pub execution_id: String,
    /// Line content.
    pub content: String,
    /// Capture time.
    pub timestamp: DateTime<Utc>,
    /// `primary` or `error`.
    pub stream: OutputStream,
    /// Monotonic per stream.
    pub sequence: u64,
}

/// `complete` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    /// Execution identifier.
    pub execution_id: String,
    /// `success`, `partial`, `failed` or `cancelled`.
    pub status: ExecutionStatus,
    /// Process exit code, when available.
    pub exit_code: Option<i32>,
    /// Uploaded paths.
    pub files_changed: Vec<String>,
    /// Paths deleted from the working directory.
    pub files_deleted: Vec<String>,
    /// Per-file upload failures.
    pub sync_failures: Vec<SyncFailure>,
    /// Duration in milliseconds.
    pub duration: u64,
    /// Runtime error description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `error` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Machine-readable code, e.g. `VALIDATION_ERROR`.
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Execution the error refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

/// `file:sync_complete` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileSyncCompletePayload {
    /// `success` or `partial`.
    pub status: ExecutionStatus,
    /// Direction that ran.
    pub action: SyncAction,
    /// Transferred and deleted paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<SyncChanges>,
    /// Per-file failures.
    pub failures: Vec<SyncFailure>,
}

/// Paths touched by a manual sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncChanges {
    /// Downloaded or uploaded paths.
    pub changed: Vec<String>,
    /// Paths found deleted during upload.
    pub deleted: Vec<String>,
}

impl ServerEvent {
    /// `error` event for `err`, optionally tied to an execution.
    #[must_use]
    pub fn from_error(err: &AppError, execution_id: Option<String>) -> Self {
        Self::Error(ErrorPayload {
            code: err.code().to_owned(),
            message: err.message().to_owned(),
            execution_id,
        })
    }

    /// `file:sync_complete` event for a finished sync.
    #[must_use]
    pub fn sync_complete(action: SyncAction, report: SyncReport) -> Self {
        let status = if report.is_clean() {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Partial
        };
        let changes = (!report.changed.is_empty() || !report.deleted.is_empty()).then(|| {
            SyncChanges {
                changed: report.changed,
                deleted: report.deleted,
            }
        });
        Self::FileSyncComplete(FileSyncCompletePayload {
            status,
            action,
            changes,
            failures: report.failures,
        })
    }
}

impl From<SessionEvent> for ServerEvent {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::Started {
                execution_id,
                project_id,
            } => Self::ExecutionStarted(StartedPayload {
                execution_id,
                project_id,
            }),
            SessionEvent::Output {
                execution_id,
                chunk,
            } => Self::Output(OutputPayload {
                execution_id,
                content: chunk.content,
                timestamp: chunk.timestamp,
                stream: chunk.stream,
                sequence: chunk.sequence,
            }),
            SessionEvent::Stopped { execution_id } => {
                Self::ExecutionStopped(ExecutionRef { execution_id })
            }
            SessionEvent::Completed(result) => Self::Complete(CompletePayload {
                execution_id: result.execution_id,
                status: result.status,
                exit_code: result.exit_code,
                files_changed: result.files_changed,
                files_deleted: result.files_deleted,
                sync_failures: result.sync_failures,
                duration: result.duration_ms,
                error: result.error,
            }),
            SessionEvent::Failed {
                execution_id,
                code,
                message,
            } => Self::Error(ErrorPayload {
                code: code.to_owned(),
                message,
                execution_id: Some(execution_id),
            }),
        }
    }
}
