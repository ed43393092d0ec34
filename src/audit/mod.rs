//! Structured audit records for execution and sync events.
//!
//! [`AuditLogger`] is the sink boundary. [`JsonlAuditWriter`] appends JSONL
//! records to daily-rotating files; [`TracingAuditLogger`] emits each record
//! as a structured `tracing` event when no audit directory is configured.

pub mod tracing_sink;
pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type classification for audit log entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Execute request admitted and session started.
    ExecutionAdmitted,
    /// Execute request rejected by validation or admission control.
    ExecutionRejected,
    /// Session reached a terminal state.
    ExecutionCompleted,
    /// Stop requested by the owning user.
    ExecutionStopped,
    /// Manual download or upload finished.
    FileSync,
}

/// A structured record of one bridge event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Time the record was created.
    pub timestamp: DateTime<Utc>,
    /// Event classification.
    pub event_type: AuditEventType,
    /// Verified identity of the requesting user.
    pub user_id: String,
    /// Project the event concerns.
    pub project_id: String,
    /// Execution identifier, when one was assigned.
    pub execution_id: Option<String>,
    /// Sanitized command text.
    pub command: Option<String>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: Option<u64>,
    /// Error or status description.
    pub error: Option<String>,
}

impl AuditEntry {
    /// Construct a successful entry for `event_type`.
    #[must_use]
    pub fn new(event_type: AuditEventType, user_id: &str, project_id: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            user_id: user_id.to_owned(),
            project_id: project_id.to_owned(),
            execution_id: None,
            command: None,
            success: true,
            duration_ms: None,
            error: None,
        }
    }

    /// Set the execution identifier.
    #[must_use]
    pub fn with_execution(mut self, execution_id: &str) -> Self {
        self.execution_id = Some(execution_id.to_owned());
        self
    }

    /// Set the command text.
    #[must_use]
    pub fn with_command(mut self, command: &str) -> Self {
        self.command = Some(command.to_owned());
        self
    }

    /// Set the duration.
    #[must_use]
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Mark the entry failed with `error`.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Writes structured audit entries to a persistent store.
///
/// Implementations must be [`Send`] and [`Sync`] to allow sharing across
/// async task boundaries via [`std::sync::Arc`].
pub trait AuditLogger: Send + Sync {
    /// Record a single audit entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write operation fails.
    fn log_entry(&self, entry: AuditEntry) -> crate::Result<()>;
}

pub use tracing_sink::TracingAuditLogger;
pub use writer::JsonlAuditWriter;
