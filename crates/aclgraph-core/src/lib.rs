//! # aclgraph Core
//!
//! Plain data records for the aclgraph authorization engine: classes, object
//! identities, security identifiers (SIDs), access control entries, and
//! permission masks.
//!
//! This crate contains no I/O and no storage. Everything here is a value
//! that the store persists and the resolver reads.
//!
//! ## Key Types
//!
//! - [`ObjectIdentity`] - One securable domain object, keyed by (class, external id)
//! - [`Sid`] - A principal (user) or role/authority
//! - [`Entry`] - One ordered access control entry (ACE)
//! - [`Permission`] - A bitset of capability flags
//! - [`ObjectKey`] / [`SidKey`] - Unpersisted lookup keys used by callers

pub mod error;
pub mod permission;
pub mod types;
pub mod validation;

pub use error::ValidationError;
pub use permission::{Permission, RevokeMode};
pub use types::{
    AclClass, ClassId, Entry, EntryId, ObjectIdentity, ObjectIdentityId, ObjectKey, Sid, SidId,
    SidKey,
};
pub use validation::{validate_ace_order, validate_mask, validate_name, validate_single_bit};
