//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur while applying role lifecycle events.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The event carried a blank role name.
    #[error("invalid event: {0}")]
    Validation(#[from] aclgraph_core::ValidationError),

    /// A registry or entry operation failed.
    #[error("acl error: {0}")]
    Acl(#[from] aclgraph_perms::AclError),

    /// The receiving end of the outbox is gone.
    #[error("role event channel closed")]
    Closed,
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
