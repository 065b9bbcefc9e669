//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Row not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Delete blocked because other rows still reference this one.
    #[error("still referenced: {0}")]
    StillReferenced(String),

    /// Insert or update points at a row that does not exist.
    #[error("dangling reference: {0}")]
    DanglingReference(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Blocking task failed or the connection lock was poisoned.
    #[error("task error: {0}")]
    Task(String),

    /// Parent link rejected: it would close a cycle or exceed the depth bound.
    #[error("invalid hierarchy: {0}")]
    Hierarchy(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
