#![forbid(unsafe_code)]

//! Local execution and synchronization bridge.
//!
//! Runs a command-line coding agent against an ephemeral copy of a project's
//! files, streams its output to a WebSocket client and reconciles the files
//! it changed back into a durable project store. At most one execution runs
//! per project at a time.

pub mod audit;
pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod process;
pub mod sanitize;
pub mod store;
pub mod sync;
pub mod transport;
pub mod workspace;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
