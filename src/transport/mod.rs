//! Client-facing transport: WebSocket framing and event dispatch.

pub mod handler;
pub mod protocol;
pub mod ws;

use std::sync::Arc;

use crate::config::GlobalConfig;
use crate::orchestrator::SessionManager;

/// Shared state handed to every connection.
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<GlobalConfig>,
    /// Owner of all live executions.
    pub sessions: SessionManager,
}
