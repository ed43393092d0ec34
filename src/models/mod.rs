//! Domain model module declarations.

pub mod execution;
pub mod file;
