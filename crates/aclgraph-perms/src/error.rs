//! Error types for the registries and the resolver.

use thiserror::Error;

use aclgraph_core::ValidationError;
use aclgraph_store::StoreError;

/// Errors that can occur during ACL operations.
#[derive(Debug, Error)]
pub enum AclError {
    /// A class, identity, SID or entry the caller named does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The write would break an integrity rule: a parent still referenced,
    /// a cycle, an occupied ace order, or a creation race that kept losing.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed input.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Backend failure.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for AclError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::StillReferenced(msg) | StoreError::Hierarchy(msg) => {
                AclError::Conflict(msg)
            }
            StoreError::DanglingReference(msg) | StoreError::NotFound(msg) => {
                AclError::NotFound(msg)
            }
            other => AclError::Store(other),
        }
    }
}

impl AclError {
    /// Short, stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AclError::NotFound(_) => "not_found",
            AclError::Conflict(_) => "conflict",
            AclError::Validation(_) => "validation",
            AclError::Store(_) => "store",
        }
    }
}

/// Result type for ACL operations.
pub type Result<T> = std::result::Result<T, AclError>;
