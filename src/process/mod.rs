//! Agent process supervision.
//!
//! A [`ProcessSupervisor`] owns at most one child at a time. [`ProcessSupervisor::run`]
//! launches `host_cli host_cli_args... <command>` inside a working directory
//! and returns a channel that yields [`ProcessEvent::Output`] chunks followed
//! by exactly one terminal event. The terminal event is only sent once both
//! output readers have drained (or the drain window elapsed), so it is always
//! the last item on the channel.

pub mod codec;
pub mod terminate;

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GlobalConfig;
use crate::models::execution::{OutputChunk, OutputStream};
use crate::{AppError, Result};

use self::codec::OutputCodec;

// ── Environment allowlist ────────────────────────────────────────────────────

/// Environment variables inherited by the agent process.
///
/// Everything else is stripped with `env_clear()` before launch, so store
/// credentials and other server secrets never reach the child.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Buffered events per execution before readers apply backpressure.
const EVENT_BUFFER: usize = 256;

/// Pending stdin writes per execution.
const INPUT_BUFFER: usize = 16;

// ── Configuration ────────────────────────────────────────────────────────────

/// How agent processes are launched and stopped.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Host CLI binary (e.g. `claude`, `sh`).
    pub host_cli: String,
    /// Arguments placed before the command text.
    pub host_cli_args: Vec<String>,
    /// Time between the polite and the forced termination signal.
    pub stop_grace: Duration,
    /// How long output readers may keep draining after the process exits.
    pub drain_window: Duration,
}

impl SpawnConfig {
    /// Derive spawn settings from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            host_cli: config.host_cli.clone(),
            host_cli_args: config.host_cli_args.clone(),
            stop_grace: config.stop_grace(),
            drain_window: config.drain_window(),
        }
    }
}

// ── State and events ─────────────────────────────────────────────────────────

/// Supervisor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Nothing launched yet.
    Idle,
    /// Launch in progress.
    Spawning,
    /// Child is alive.
    Running,
    /// Child exited with code 0.
    Completed,
    /// Launch failed, or the child exited non-zero or by signal.
    Failed,
    /// Stopped on request.
    Terminated,
}

impl SupervisorState {
    /// Whether no child is running under this state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Terminated)
    }
}

/// Item delivered on the channel returned by [`ProcessSupervisor::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// One line of output.
    Output(OutputChunk),
    /// Exited with code 0.
    Completed {
        /// Always 0.
        exit_code: i32,
    },
    /// Exited non-zero, by signal, or could not be waited on.
    Failed {
        /// Exit code when the process exited normally.
        exit_code: Option<i32>,
        /// Human-readable cause.
        error: String,
    },
    /// Stopped through [`ProcessSupervisor::stop`].
    Terminated {
        /// Exit code if the process exited normally while stopping.
        exit_code: Option<i32>,
    },
}

impl ProcessEvent {
    /// Whether this is the final event of a run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Output(_))
    }
}

// ── Supervisor ───────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Inner {
    state: SupervisorState,
    /// A child (or its teardown) is still owned by this supervisor.
    attached: bool,
    stop: Option<CancellationToken>,
    stdin: Option<mpsc::Sender<String>>,
}

/// Spawns and supervises one agent process at a time.
#[derive(Debug)]
pub struct ProcessSupervisor {
    config: SpawnConfig,
    inner: Arc<Mutex<Inner>>,
}

impl ProcessSupervisor {
    /// Create an idle supervisor.
    #[must_use]
    pub fn new(config: SpawnConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                state: SupervisorState::Idle,
                attached: false,
                stop: None,
                stdin: None,
            })),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SupervisorState {
        lock(&self.inner).state
    }

    /// Launch `command` in `work_dir` and return its event stream.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if a process is already attached, if the
    /// host CLI cannot be launched, or if its stdio cannot be captured.
    pub fn run(&self, command: &str, work_dir: &Path) -> Result<mpsc::Receiver<ProcessEvent>> {
        let mut inner = lock(&self.inner);
        if inner.attached {
            return Err(AppError::Spawn(
                "a process is already attached to this supervisor".into(),
            ));
        }
        inner.state = SupervisorState::Spawning;

        let mut child = match build_command(&self.config, command, work_dir).spawn() {
            Ok(child) => child,
            Err(err) => {
                inner.state = SupervisorState::Failed;
                return Err(AppError::Spawn(format!(
                    "failed to spawn {}: {err}",
                    self.config.host_cli
                )));
            }
        };

        let (Some(stdout), Some(stderr), Some(stdin)) =
            (child.stdout.take(), child.stderr.take(), child.stdin.take())
        else {
            // `kill_on_drop` reaps the child when it goes out of scope here.
            inner.state = SupervisorState::Failed;
            return Err(AppError::Spawn("failed to capture process stdio".into()));
        };

        let pid = child.id();
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let sequence = Arc::new(AtomicU64::new(0));
        let readers = vec![
            spawn_reader(stdout, OutputStream::Primary, Arc::clone(&sequence), event_tx.clone()),
            spawn_reader(stderr, OutputStream::Error, sequence, event_tx.clone()),
        ];

        let (stdin_tx, stdin_rx) = mpsc::channel(INPUT_BUFFER);
        tokio::spawn(forward_stdin(stdin, stdin_rx));

        let stop = CancellationToken::new();
        inner.state = SupervisorState::Running;
        inner.attached = true;
        inner.stop = Some(stop.clone());
        inner.stdin = Some(stdin_tx);
        drop(inner);

        info!(?pid, host_cli = %self.config.host_cli, work_dir = %work_dir.display(), "agent process spawned");

        tokio::spawn(supervise(
            child,
            readers,
            event_tx,
            stop,
            Arc::clone(&self.inner),
            self.config.clone(),
        ));

        Ok(event_rx)
    }

    /// Request termination of the running process.
    ///
    /// Idempotent: when nothing is running the current state is returned
    /// unchanged.
    pub fn stop(&self) -> SupervisorState {
        let mut inner = lock(&self.inner);
        if matches!(inner.state, SupervisorState::Spawning | SupervisorState::Running) {
            inner.state = SupervisorState::Terminated;
            if let Some(token) = &inner.stop {
                token.cancel();
            }
            info!("process stop requested");
        }
        inner.state
    }

    /// Write `text` to the running process's stdin.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Runtime` if no process is running or its stdin is
    /// closed.
    pub async fn send_input(&self, text: String) -> Result<()> {
        let sender = {
            let inner = lock(&self.inner);
            if inner.state != SupervisorState::Running {
                return Err(AppError::Runtime("no running process".into()));
            }
            inner.stdin.clone()
        };
        let sender = sender.ok_or_else(|| AppError::Runtime("process stdin is closed".into()))?;
        sender
            .send(text)
            .await
            .map_err(|_| AppError::Runtime("process stdin is closed".into()))
    }

    /// Close the running process's stdin so it observes end of input.
    pub fn close_input(&self) {
        if lock(&self.inner).stdin.take().is_some() {
            debug!("process stdin closed");
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if let Some(token) = &lock(&self.inner).stop {
            token.cancel();
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn build_command(config: &SpawnConfig, command: &str, work_dir: &Path) -> Command {
    let mut cmd = Command::new(&config.host_cli);
    cmd.args(&config.host_cli_args).arg(command);

    cmd.env_clear();
    for &key in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
    cmd.env("AGENT_BRIDGE_WORKDIR", work_dir);

    cmd.current_dir(work_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    cmd
}

fn spawn_reader<R>(
    reader: R,
    stream: OutputStream,
    sequence: Arc<AtomicU64>,
    tx: mpsc::Sender<ProcessEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut framed = FramedRead::new(reader, OutputCodec::new());
        while let Some(item) = framed.next().await {
            match item {
                Ok(content) => {
                    let seq = sequence.fetch_add(1, Ordering::SeqCst);
                    let chunk = OutputChunk::new(stream, content, seq);
                    if tx.send(ProcessEvent::Output(chunk)).await.is_err() {
                        debug!(?stream, "event receiver dropped, stopping reader");
                        break;
                    }
                }
                Err(err) => {
                    warn!(?stream, %err, "output stream error");
                    break;
                }
            }
        }
        debug!(?stream, "output reader finished");
    })
}

async fn forward_stdin(mut stdin: ChildStdin, mut rx: mpsc::Receiver<String>) {
    while let Some(text) = rx.recv().await {
        let written = async {
            stdin.write_all(text.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(err) = written {
            warn!(%err, "failed to write process stdin");
            break;
        }
    }
    debug!("stdin forwarder finished");
}

async fn supervise(
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    tx: mpsc::Sender<ProcessEvent>,
    stop: CancellationToken,
    inner: Arc<Mutex<Inner>>,
    config: SpawnConfig,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        () = stop.cancelled() => None,
    };
    let waited = match exited {
        Some(status) => status.map(Some),
        None => Ok(terminate::terminate_gracefully(&mut child, config.stop_grace).await),
    };

    for reader in readers {
        let abort = reader.abort_handle();
        if tokio::time::timeout(config.drain_window, reader).await.is_err() {
            warn!("output reader still busy after drain window, aborting");
            abort.abort();
        }
    }

    let (state, event) = if stop.is_cancelled() {
        let exit_code = waited.ok().flatten().and_then(|status| status.code());
        (SupervisorState::Terminated, ProcessEvent::Terminated { exit_code })
    } else {
        classify_exit(waited)
    };

    {
        let mut guard = lock(&inner);
        guard.state = state;
        guard.attached = false;
        guard.stop = None;
        guard.stdin = None;
    }

    info!(?state, "agent process finished");
    if tx.send(event).await.is_err() {
        debug!("event receiver dropped before terminal event");
    }
}

fn classify_exit(
    waited: std::io::Result<Option<std::process::ExitStatus>>,
) -> (SupervisorState, ProcessEvent) {
    match waited {
        Ok(Some(status)) if status.success() => (
            SupervisorState::Completed,
            ProcessEvent::Completed { exit_code: 0 },
        ),
        Ok(Some(status)) => {
            let error = status.code().map_or_else(
                || "process terminated by signal".to_owned(),
                |code| format!("process exited with code {code}"),
            );
            (
                SupervisorState::Failed,
                ProcessEvent::Failed {
                    exit_code: status.code(),
                    error,
                },
            )
        }
        Ok(None) => (
            SupervisorState::Failed,
            ProcessEvent::Failed {
                exit_code: None,
                error: "exit status unavailable".into(),
            },
        ),
        Err(err) => (
            SupervisorState::Failed,
            ProcessEvent::Failed {
                exit_code: None,
                error: format!("failed to wait for process: {err}"),
            },
        ),
    }
}
