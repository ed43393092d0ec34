//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Durable project store settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StoreConfig {
    /// Directory holding one sub-directory per project.
    pub root: PathBuf,
}

/// Audit sink settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AuditConfig {
    /// Directory for daily JSONL audit files. When absent, audit records are
    /// emitted through `tracing` only.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Process supervision timings (seconds).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ExecutionConfig {
    /// Grace period between SIGTERM and SIGKILL on stop.
    #[serde(default = "default_stop_grace_seconds")]
    pub stop_grace_seconds: u64,
    /// How long output readers may keep draining after the process exits.
    #[serde(default = "default_drain_seconds")]
    pub drain_seconds: u64,
    /// Upper bound enforced by the transport; 0 means no timeout.
    #[serde(default)]
    pub timeout_seconds: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            stop_grace_seconds: default_stop_grace_seconds(),
            drain_seconds: default_drain_seconds(),
            timeout_seconds: 0,
        }
    }
}

fn default_stop_grace_seconds() -> u64 {
    5
}

fn default_drain_seconds() -> u64 {
    2
}

/// Reconciliation settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SyncConfig {
    /// Directory names that are never hydrated, walked or uploaded.
    #[serde(default = "default_excluded_dirs")]
    pub excluded_dirs: Vec<String>,
    /// Glob patterns (matched against relative paths) excluded from upload.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    /// Delete files from the durable store when they vanish locally.
    #[serde(default)]
    pub propagate_deletions: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            excluded_dirs: default_excluded_dirs(),
            ignore_patterns: Vec::new(),
            propagate_deletions: false,
        }
    }
}

fn default_excluded_dirs() -> Vec<String> {
    vec![".git".into(), "node_modules".into()]
}

fn default_http_port() -> u16 {
    8787
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Base directory under which per-project working directories live.
    pub work_root: PathBuf,
    /// Agent CLI binary (e.g., `claude`).
    pub host_cli: String,
    /// Arguments placed before the command text.
    #[serde(default)]
    pub host_cli_args: Vec<String>,
    /// Interface the WebSocket transport binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Port for the WebSocket transport.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Additional case-insensitive regex patterns rejected in commands.
    #[serde(default)]
    pub extra_denied_patterns: Vec<String>,
    /// Durable store location.
    pub store: StoreConfig,
    /// Audit sink location.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Process supervision timings.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Reconciliation behaviour.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Grace period between the polite and the forceful stop signal.
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.execution.stop_grace_seconds)
    }

    /// Drain window for output readers after process exit.
    #[must_use]
    pub fn drain_window(&self) -> Duration {
        Duration::from_secs(self.execution.drain_seconds)
    }

    /// Execution timeout enforced by the transport, if any.
    #[must_use]
    pub fn execution_timeout(&self) -> Option<Duration> {
        (self.execution.timeout_seconds > 0)
            .then(|| Duration::from_secs(self.execution.timeout_seconds))
    }

    /// Replace the working-directory base and re-canonicalize it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the directory cannot be created.
    pub fn set_work_root(&mut self, work_root: PathBuf) -> Result<()> {
        let work_root = ensure_dir(&work_root, "work_root")?;
        check_roots_disjoint(&work_root, &self.store.root)?;
        self.work_root = work_root;
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.host_cli.trim().is_empty() {
            return Err(AppError::Config("host_cli must not be empty".into()));
        }

        if self.execution.stop_grace_seconds == 0 {
            return Err(AppError::Config(
                "execution.stop_grace_seconds must be greater than zero".into(),
            ));
        }

        if let Some(bad) = self
            .sync
            .ignore_patterns
            .iter()
            .find(|p| glob::Pattern::new(p).is_err())
        {
            return Err(AppError::Config(format!("invalid ignore pattern: {bad}")));
        }

        self.work_root = ensure_dir(&self.work_root, "work_root")?;
        self.store.root = ensure_dir(&self.store.root, "store.root")?;
        check_roots_disjoint(&self.work_root, &self.store.root)
    }
}

/// Working directories are removed recursively, so they must never overlap
/// the durable store. Both paths are expected to be canonical.
fn check_roots_disjoint(work: &Path, store: &Path) -> Result<()> {
    if work.starts_with(store) || store.starts_with(work) {
        return Err(AppError::Config(format!(
            "work_root {} and store.root {} must not contain each other",
            work.display(),
            store.display()
        )));
    }
    Ok(())
}

/// Create `dir` if needed and return its canonical form.
fn ensure_dir(dir: &Path, field: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .map_err(|err| AppError::Config(format!("{field} cannot be created: {err}")))?;
    dir.canonicalize()
        .map_err(|err| AppError::Config(format!("{field} invalid: {err}")))
}
