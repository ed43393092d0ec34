//! Shared construction of configs, session managers and event collection
//! for integration tests.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_bridge::audit::{AuditEntry, AuditEventType, AuditLogger};
use agent_bridge::config::GlobalConfig;
use agent_bridge::orchestrator::{ExecuteRequest, SessionEvent, SessionManager};
use agent_bridge::process::SpawnConfig;
use agent_bridge::sanitize::CommandPolicy;
use agent_bridge::store::{MemoryProjectStore, ProjectStore};
use agent_bridge::sync::{SyncEngine, SyncOptions};
use agent_bridge::transport::AppState;
use agent_bridge::workspace::WorkspaceManager;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(15);

/// Config running commands through `sh -c` under `root`.
pub fn test_config(root: &Path, extra: &str) -> GlobalConfig {
    let toml = format!(
        r#"
work_root = '{work}'
host_cli = "sh"
host_cli_args = ["-c"]
http_port = 0

[store]
root = '{store}'

[execution]
stop_grace_seconds = 1
drain_seconds = 1
{extra}
"#,
        work = root.join("work").display(),
        store = root.join("store").display(),
    );
    GlobalConfig::from_toml_str(&toml).expect("valid test config")
}

/// Audit sink that keeps entries in memory.
#[derive(Default)]
pub struct RecordingAudit {
    entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAudit {
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().expect("audit lock").clone()
    }

    pub fn of_type(&self, event_type: AuditEventType) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

impl AuditLogger for RecordingAudit {
    fn log_entry(&self, entry: AuditEntry) -> agent_bridge::Result<()> {
        self.entries.lock().expect("audit lock").push(entry);
        Ok(())
    }
}

/// A fully wired bridge backed by an in-memory store.
pub struct Harness {
    _temp: TempDir,
    pub config: Arc<GlobalConfig>,
    pub store: Arc<MemoryProjectStore>,
    pub audit: Arc<RecordingAudit>,
    pub sessions: SessionManager,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config("")
    }

    /// Harness whose config has `extra` appended to the `[execution]` table.
    pub fn with_config(extra: &str) -> Self {
        let store = Arc::new(MemoryProjectStore::new());
        let temp = tempfile::tempdir().expect("tempdir");
        let config = test_config(temp.path(), extra);
        Self::build(temp, config, Arc::clone(&store) as Arc<dyn ProjectStore>, store)
    }

    /// Harness using `backing` as the durable store; `store` stays empty.
    pub fn with_store(backing: Arc<dyn ProjectStore>) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = test_config(temp.path(), "");
        Self::build(temp, config, backing, Arc::new(MemoryProjectStore::new()))
    }

    /// Harness whose host CLI cannot be launched.
    pub fn with_missing_cli() -> Self {
        let store = Arc::new(MemoryProjectStore::new());
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = test_config(temp.path(), "");
        config.host_cli = "/nonexistent/agent-cli".into();
        Self::build(temp, config, Arc::clone(&store) as Arc<dyn ProjectStore>, store)
    }

    fn build(
        temp: TempDir,
        config: GlobalConfig,
        backing: Arc<dyn ProjectStore>,
        store: Arc<MemoryProjectStore>,
    ) -> Self {
        let audit = Arc::new(RecordingAudit::default());
        let workspace = WorkspaceManager::new(
            config.work_root.clone(),
            Arc::clone(&backing),
            config.sync.excluded_dirs.clone(),
        );
        let sync = Arc::new(SyncEngine::new(
            backing,
            workspace,
            SyncOptions::from_config(&config.sync).expect("sync options"),
        ));
        let sessions = SessionManager::new(
            SpawnConfig::from_config(&config),
            Arc::new(CommandPolicy::builtin().expect("policy")),
            sync,
            Arc::clone(&audit) as Arc<dyn AuditLogger>,
        );
        Self {
            _temp: temp,
            config: Arc::new(config),
            store,
            audit,
            sessions,
        }
    }

    pub fn state(&self) -> AppState {
        AppState {
            config: Arc::clone(&self.config),
            sessions: self.sessions.clone(),
        }
    }

    pub fn work_dir(&self, project_id: &str) -> std::path::PathBuf {
        self.config.work_root.join(project_id)
    }

    /// Start an execution for `alice`.
    pub async fn execute(
        &self,
        project_id: &str,
        command: &str,
        events: &mpsc::Sender<SessionEvent>,
    ) -> agent_bridge::Result<String> {
        self.execute_as("alice", project_id, command, events).await
    }

    pub async fn execute_as(
        &self,
        user_id: &str,
        project_id: &str,
        command: &str,
        events: &mpsc::Sender<SessionEvent>,
    ) -> agent_bridge::Result<String> {
        self.sessions
            .execute(
                ExecuteRequest {
                    project_id: project_id.into(),
                    command: command.into(),
                    user_id: user_id.into(),
                },
                events.clone(),
            )
            .await
    }
}

/// Receive one event or fail after [`WAIT`].
pub async fn next_event(rx: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("event within timeout")
        .expect("channel open")
}

/// Collect events for `execution_id` up to and including its terminal event.
pub async fn until_terminal(
    rx: &mut mpsc::Receiver<SessionEvent>,
    execution_id: &str,
) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(rx).await;
        if event.execution_id() != execution_id {
            continue;
        }
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            return events;
        }
    }
}

/// Output lines in arrival order.
pub fn output_lines(events: &[SessionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Output { chunk, .. } => Some(chunk.content.clone()),
            _ => None,
        })
        .collect()
}
