//! Error types for aclgraph core records.

use thiserror::Error;

/// Input rejected before it reaches the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be blank")]
    BlankName { field: &'static str },

    #[error("permission mask must be positive, got {0}")]
    NonPositiveMask(i64),

    #[error("permission mask {0} does not fit in 32 bits")]
    MaskOutOfRange(i64),

    #[error("requested permission must be a single bit, got {0:#x}")]
    NotSingleBit(u32),

    #[error("ace order must not be negative, got {0}")]
    NegativeAceOrder(i64),

    #[error("unknown permission name: {0}")]
    UnknownPermission(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
