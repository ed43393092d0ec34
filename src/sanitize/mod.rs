//! Input sanitization for commands, relative paths and project identifiers.
//!
//! Everything in this module is pure and synchronous: no I/O, no global
//! state. Callers run these checks before any side effect so that a rejected
//! request never touches the file system or spawns a process.

pub mod command;
pub mod path;

pub use command::{CommandPolicy, MAX_COMMAND_CHARS};
pub use path::{is_excluded, sanitize_path, validate_project_id};
