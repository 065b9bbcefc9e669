//! # aclgraph Store
//!
//! Storage abstraction for the aclgraph engine. The four ACL tables (classes,
//! object identities, SIDs, entries) sit behind the [`Store`] trait so the
//! registries and resolver never see SQL.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all persistence operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage with the same semantics, for tests
//! - [`InsertResult`] - Outcome of a unique-keyed insert
//! - [`MaskRemoval`] - Outcome of a revoke against stored masks
//!
//! ## Usage
//!
//! ```rust,no_run
//! use aclgraph_store::{InsertResult, SqliteStore, Store};
//!
//! async fn example() {
//!     let store = SqliteStore::open("acl.db").unwrap();
//!
//!     match store.insert_sid("EDITOR", false).await.unwrap() {
//!         InsertResult::Inserted(sid) => println!("created {}", sid.id),
//!         InsertResult::AlreadyExists => println!("someone else won the race"),
//!     }
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Unique keys, not locks**: inserts on (class_name), (sid, principal),
//!   (class_id, external_id) and (identity, ace_order) report
//!   `AlreadyExists` on a unique violation so callers can re-read.
//! - **Referential integrity**: deleting a row that is still referenced fails
//!   with [`StoreError::StillReferenced`]; inserting a row that points at a
//!   missing one fails with [`StoreError::DanglingReference`].
//! - **Atomic cascades**: identity deletion removes its entries in the same
//!   transaction.
//! - **Check and write together**: `set_parent` validates the chain and
//!   `append_entry_if_absent` looks for an identical entry in the same
//!   transaction (or under the same write lock) that performs the write.

pub mod error;
mod hierarchy;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    EntryAppend, EntryDraft, InsertResult, MaskRemoval, NewEntry, NewObjectIdentity, Store,
    StoreExt,
};
