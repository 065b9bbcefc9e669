//! # aclgraph Permissions
//!
//! The ACL graph and its evaluation.
//!
//! ## Overview
//!
//! Access is expressed as ordered entries attached to object identities.
//! Identities form a parent graph; when an identity has no entry that
//! decides a request, evaluation continues to its parent as long as the
//! identity inherits.
//!
//! ## Components
//!
//! - [`SidRegistry`]: idempotent creation of principal and role SIDs
//! - [`ObjectIdentityRegistry`]: identity nodes, parent links, ancestor chains
//! - [`EntryStore`]: ordered entries and their ace order allocation
//! - [`PermissionResolver`]: first-match, default-deny evaluation
//!
//! Every component holds an `Arc` of the same [`Store`](aclgraph_store::Store).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use aclgraph_core::{ObjectKey, Permission};
//! use aclgraph_perms::{EntryStore, IdentityOptions, ObjectIdentityRegistry, PermissionResolver, SidRegistry};
//! use aclgraph_store::MemoryStore;
//!
//! # async fn example() -> aclgraph_perms::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let identities = ObjectIdentityRegistry::new(Arc::clone(&store));
//! let entries = EntryStore::new(Arc::clone(&store));
//! let sids = SidRegistry::new(Arc::clone(&store));
//! let resolver = PermissionResolver::new(store, identities.clone(), entries.clone());
//!
//! let doc = identities.ensure(&ObjectKey::new("Document", "42"), IdentityOptions::default()).await?;
//! let alice = sids.resolve("alice", true).await?;
//! entries.append(doc.id, alice.id, Permission::READ, true).await?;
//!
//! assert!(resolver.check(&doc, &[alice.id], Permission::READ).await?);
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod error;
pub mod identity;
pub mod resolver;
pub mod sid;

pub use entry::{AuditFlags, EntryStore};
pub use error::{AclError, Result};
pub use identity::{IdentityOptions, ObjectIdentityRegistry, DEFAULT_MAX_CHAIN_DEPTH};
pub use resolver::{Decision, PermissionResolver};
pub use sid::{SidRegistry, DEFAULT_MAX_INSERT_ATTEMPTS};
