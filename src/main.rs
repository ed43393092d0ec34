#![forbid(unsafe_code)]

//! `agent-bridge`: WebSocket server that runs coding agents against
//! ephemeral project working directories.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_bridge::audit::{AuditLogger, JsonlAuditWriter, TracingAuditLogger};
use agent_bridge::config::GlobalConfig;
use agent_bridge::orchestrator::SessionManager;
use agent_bridge::process::SpawnConfig;
use agent_bridge::sanitize::CommandPolicy;
use agent_bridge::store::{FsProjectStore, ProjectStore};
use agent_bridge::sync::{SyncEngine, SyncOptions};
use agent_bridge::transport::{ws, AppState};
use agent_bridge::workspace::WorkspaceManager;
use agent_bridge::{AppError, Result};

/// Time allowed for live executions to wind down on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-bridge", about = "Local execution and sync bridge for coding agents", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the listening port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the base directory for working directories.
    #[arg(long)]
    work_root: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-bridge bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    if let Some(work_root) = args.work_root {
        config.set_work_root(work_root)?;
    }
    let config = Arc::new(config);
    info!(work_root = %config.work_root.display(), store = %config.store.root.display(), "configuration loaded");

    // ── Build components ────────────────────────────────
    let store: Arc<dyn ProjectStore> = Arc::new(FsProjectStore::new(config.store.root.clone())?);
    let audit: Arc<dyn AuditLogger> = match &config.audit.dir {
        Some(dir) => Arc::new(JsonlAuditWriter::new(dir.clone())?),
        None => Arc::new(TracingAuditLogger),
    };
    let policy = Arc::new(CommandPolicy::new(&config.extra_denied_patterns)?);
    let workspace = WorkspaceManager::new(
        config.work_root.clone(),
        Arc::clone(&store),
        config.sync.excluded_dirs.clone(),
    );
    let sync = Arc::new(SyncEngine::new(
        store,
        workspace,
        SyncOptions::from_config(&config.sync)?,
    ));
    let sessions = SessionManager::new(SpawnConfig::from_config(&config), policy, sync, audit);

    let state = AppState {
        config: Arc::clone(&config),
        sessions: sessions.clone(),
    };

    // ── Start transport ─────────────────────────────────
    let ct = CancellationToken::new();
    let listener = ws::bind(&config).await?;
    let server_ct = ct.clone();
    let server = tokio::spawn(async move {
        if let Err(err) = ws::serve(listener, state, server_ct).await {
            error!(%err, "websocket transport failed");
        }
    });

    info!("agent-bridge ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    sessions.shutdown(SHUTDOWN_GRACE).await;
    if let Err(err) = server.await {
        error!(%err, "transport task panicked");
    }
    info!("agent-bridge shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
