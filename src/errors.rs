//! Error types shared across the bridge.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Command, path or identifier rejected before any side effect.
    Validation(String),
    /// Another execution is already active for the project.
    AdmissionRejected(String),
    /// The agent process could not be launched.
    Spawn(String),
    /// The agent process failed while running.
    Runtime(String),
    /// One or more files failed to reconcile with the durable store.
    Sync(String),
    /// The client connection failed or disappeared.
    Transport(String),
    /// Durable store read or write failure.
    Store(String),
    /// File system path failed validation against the working directory root.
    PathViolation(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Caller is not allowed to act on the requested execution.
    Unauthorized(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Machine-readable error code carried on the wire.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::AdmissionRejected(_) => "ADMISSION_REJECTED",
            Self::Spawn(_) => "SPAWN_ERROR",
            Self::Runtime(_) => "RUNTIME_ERROR",
            Self::Sync(_) => "SYNC_ERROR",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Store(_) => "STORE_ERROR",
            Self::PathViolation(_) => "PATH_VIOLATION",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Human-readable message without the category prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Config(msg)
            | Self::Validation(msg)
            | Self::AdmissionRejected(msg)
            | Self::Spawn(msg)
            | Self::Runtime(msg)
            | Self::Sync(msg)
            | Self::Transport(msg)
            | Self::Store(msg)
            | Self::PathViolation(msg)
            | Self::NotFound(msg)
            | Self::Unauthorized(msg)
            | Self::Io(msg) => msg,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::AdmissionRejected(msg) => write!(f, "admission rejected: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Runtime(msg) => write!(f, "runtime: {msg}"),
            Self::Sync(msg) => write!(f, "sync: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Store(msg) => write!(f, "store: {msg}"),
            Self::PathViolation(msg) => write!(f, "path violation: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Transport(format!("invalid json: {err}"))
    }
}
