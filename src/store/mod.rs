//! Durable project store abstraction.
//!
//! The [`ProjectStore`] trait is the only way the bridge reads or writes the
//! canonical copy of a project's files. Paths crossing this boundary are
//! always sanitized relative paths.

pub mod fs_store;
pub mod memory;

use std::future::Future;
use std::pin::Pin;

use crate::models::file::FileRecord;
use crate::Result;

/// Boxed future returned by [`ProjectStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Document-style store exposing list and set-by-path operations.
pub trait ProjectStore: Send + Sync {
    /// List every file of `project_id` with its content.
    ///
    /// An unknown project yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`](crate::AppError::Store) on backend failure.
    fn list_files(&self, project_id: &str) -> StoreFuture<'_, Vec<FileRecord>>;

    /// Create or replace the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`](crate::AppError::Store) on backend failure.
    fn write_file(&self, project_id: &str, path: &str, content: Vec<u8>) -> StoreFuture<'_, ()>;

    /// Remove the file at `path`. Removing a missing file succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`](crate::AppError::Store) on backend failure.
    fn delete_file(&self, project_id: &str, path: &str) -> StoreFuture<'_, ()>;
}

pub use fs_store::FsProjectStore;
pub use memory::MemoryProjectStore;
