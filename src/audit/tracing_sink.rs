//! Audit sink that forwards records to the `tracing` subscriber.

use tracing::info;

use super::{AuditEntry, AuditLogger};
use crate::Result;

/// Emits every [`AuditEntry`] as an `info` event on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLogger;

impl AuditLogger for TracingAuditLogger {
    fn log_entry(&self, entry: AuditEntry) -> Result<()> {
        info!(
            target: "audit",
            event_type = ?entry.event_type,
            user_id = %entry.user_id,
            project_id = %entry.project_id,
            execution_id = entry.execution_id.as_deref(),
            command = entry.command.as_deref(),
            success = entry.success,
            duration_ms = entry.duration_ms,
            error = entry.error.as_deref(),
            "audit"
        );
        Ok(())
    }
}
