//! Session orchestration: admission control and execution lifecycle.

pub mod admission;
pub mod session_manager;

use crate::models::execution::{ExecutionResult, OutputChunk};

pub use admission::{AdmissionGuard, AdmissionTable};
pub use session_manager::{ExecuteRequest, SessionManager, SyncAction};

/// Lifecycle notification sent to the connection that started an execution.
///
/// For one execution, `Started` comes first and exactly one of `Completed`
/// or `Failed` comes last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Admitted; hydration is about to begin.
    Started {
        /// Execution identifier.
        execution_id: String,
        /// Project being executed.
        project_id: String,
    },
    /// One line of process output.
    Output {
        /// Execution identifier.
        execution_id: String,
        /// The output line.
        chunk: OutputChunk,
    },
    /// Stop observed; no further output follows.
    Stopped {
        /// Execution identifier.
        execution_id: String,
    },
    /// The process ran and reconciliation finished.
    Completed(ExecutionResult),
    /// Hydration or spawn failed; the process never ran.
    Failed {
        /// Execution identifier.
        execution_id: String,
        /// Machine-readable error code.
        code: &'static str,
        /// Human-readable description.
        message: String,
    },
}

impl SessionEvent {
    /// Execution the event belongs to.
    #[must_use]
    pub fn execution_id(&self) -> &str {
        match self {
            Self::Started { execution_id, .. }
            | Self::Output { execution_id, .. }
            | Self::Stopped { execution_id }
            | Self::Failed { execution_id, .. } => execution_id,
            Self::Completed(result) => &result.execution_id,
        }
    }

    /// Whether this is the last event of its execution.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed { .. })
    }
}
