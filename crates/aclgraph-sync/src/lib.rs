//! # aclgraph Sync
//!
//! Keeps role SIDs in step with an external identity service.
//!
//! ## Overview
//!
//! Users and roles are owned elsewhere. When a role is created, renamed or
//! deleted, the identity service raises a [`RoleLifecycleEvent`] inside its
//! own transaction. Events are buffered in a [`PendingRoleEvents`] handle
//! and released only on commit, then applied by a [`RoleSidSynchronizer`]
//! running on a separate task. Synchronizer failures are logged and never
//! reach the identity service.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use aclgraph_store::MemoryStore;
//! use aclgraph_sync::{outbox, RoleLifecycleEvent, RoleSidSynchronizer};
//!
//! # async fn example() -> aclgraph_sync::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let (outbox, receiver) = outbox::channel();
//! let worker = RoleSidSynchronizer::new(store).spawn(receiver);
//!
//! let mut tx_events = outbox.begin();
//! tx_events.push(RoleLifecycleEvent::renamed("AUTHOR", "EDITOR"));
//! // ... the role transaction commits ...
//! tx_events.commit()?;
//!
//! drop(outbox);
//! let _stats = worker.await;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod events;
pub mod outbox;
pub mod synchronizer;

pub use error::{Result, SyncError};
pub use events::{RoleAction, RoleLifecycleEvent};
pub use outbox::{PendingRoleEvents, RoleEventOutbox, RoleEventReceiver};
pub use synchronizer::{RemovedRole, RoleSidSynchronizer, SyncOutcome, SyncStats};
