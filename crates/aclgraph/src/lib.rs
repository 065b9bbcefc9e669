//! # aclgraph
//!
//! An access control list authorization engine: a graph of domain object
//! identities, security identifiers (SIDs), and ordered permission entries,
//! plus the resolver that answers "may these SIDs do X on object Z" by
//! walking identity inheritance.
//!
//! ## Key Concepts
//!
//! - **Object identity**: one securable object, addressed by (class, external id)
//! - **SID**: a principal (user) or a role/authority
//! - **Entry**: grants or denies a permission mask to a SID; evaluated in ace order
//! - **Inheritance**: with no deciding local entry, evaluation moves to the parent
//! - **Default deny**: nothing matched means not allowed
//! - **Role policy**: read/write/admin roles per domain or component, seeded
//!   into and aggregated out of the same tables
//!
//! ## Usage
//!
//! ```rust,no_run
//! use aclgraph::{AclConfig, PermissionService};
//! use aclgraph::core::{ObjectKey, Permission, SidKey};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let service = PermissionService::open(AclConfig::load("acl.toml")?)?;
//!
//! let report = ObjectKey::new("Document", "q3-report");
//! service.grant(&report, &SidKey::role("EDITOR"), Permission::WRITE).await?;
//!
//! let actor = [SidKey::principal("alice"), SidKey::role("EDITOR")];
//! assert!(service.check(&report, &actor, Permission::WRITE).await?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `aclgraph::core` - Records, ids, permission masks
//! - `aclgraph::store` - Storage abstraction, SQLite and in-memory backends
//! - `aclgraph::perms` - Registries, entry store, resolver
//! - `aclgraph::sync` - Role lifecycle events and the SID synchronizer

pub mod config;
pub mod metrics;
pub mod policy;
pub mod refresh;
pub mod seed;
pub mod service;

// Re-export component crates
pub use aclgraph_core as core;
pub use aclgraph_perms as perms;
pub use aclgraph_store as store;
pub use aclgraph_sync as sync;

// Re-export main types for convenience
pub use config::AclConfig;
pub use metrics::{
    InMemoryMetricsRecorder, MetricSample, MetricsRecorder, NoopMetricsRecorder,
    TracingMetricsRecorder,
};
pub use policy::{
    DomainPolicy, PolicyAction, PolicyDescriptor, ResourceMapper, RoleActions, RolePolicy,
};
pub use refresh::{
    InMemoryRefreshListener, NoopRefreshListener, RefreshListener, WatchRefreshListener,
};
pub use seed::{PolicySeeder, SeedReport};
pub use service::PermissionService;

pub use aclgraph_core::{
    AclClass, Entry, EntryId, ObjectIdentity, ObjectKey, Permission, RevokeMode, Sid, SidKey,
};
pub use aclgraph_perms::{AclError, Decision, Result};
pub use aclgraph_sync::{RoleAction, RoleLifecycleEvent};
