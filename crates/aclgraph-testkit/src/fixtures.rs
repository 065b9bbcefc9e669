//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use aclgraph::{AclConfig, InMemoryMetricsRecorder, PermissionService};
use aclgraph_core::{ObjectIdentity, ObjectKey, SidKey};
use aclgraph_perms::Result;
use aclgraph_store::{MemoryStore, Result as StoreResult, SqliteStore, Store};

/// Class name used for document fixtures.
pub const DOCUMENT: &str = "Document";

/// Class name used for folder fixtures.
pub const FOLDER: &str = "Folder";

/// Key of a document.
pub fn doc(id: impl Into<String>) -> ObjectKey {
    ObjectKey::new(DOCUMENT, id)
}

/// Key of a folder.
pub fn folder(id: impl Into<String>) -> ObjectKey {
    ObjectKey::new(FOLDER, id)
}

/// A principal SID.
pub fn user(name: impl Into<String>) -> SidKey {
    SidKey::principal(name)
}

/// A role SID.
pub fn role(name: impl Into<String>) -> SidKey {
    SidKey::role(name)
}

/// A service with an in-memory metrics recorder attached.
pub struct AclFixture<S: Store = MemoryStore> {
    pub service: PermissionService<S>,
    pub metrics: Arc<InMemoryMetricsRecorder>,
}

impl AclFixture<MemoryStore> {
    /// Fixture over an in-memory store with the default config.
    pub fn new() -> Self {
        Self::with_config(AclConfig::default())
    }

    pub fn with_config(config: AclConfig) -> Self {
        Self::from_store(MemoryStore::new(), config)
    }
}

impl Default for AclFixture<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl AclFixture<SqliteStore> {
    /// Fixture over a private in-memory SQLite database.
    pub fn sqlite() -> StoreResult<Self> {
        Self::sqlite_with_config(AclConfig::default())
    }

    pub fn sqlite_with_config(config: AclConfig) -> StoreResult<Self> {
        Ok(Self::from_store(SqliteStore::open_memory()?, config))
    }
}

impl<S: Store> AclFixture<S> {
    pub fn from_store(store: S, config: AclConfig) -> Self {
        let metrics = Arc::new(InMemoryMetricsRecorder::new());
        let service = PermissionService::new(store, config).with_metrics(metrics.clone());
        Self { service, metrics }
    }

    /// Create each `(child, parent)` identity, parents first.
    ///
    /// A parent must either appear earlier as a child or already exist.
    pub async fn tree(&self, links: &[(ObjectKey, Option<ObjectKey>)]) -> Result<Vec<ObjectIdentity>> {
        let mut created = Vec::with_capacity(links.len());
        for (child, parent) in links {
            if let Some(parent) = parent {
                self.service.ensure_identity(parent, None, true).await?;
            }
            created.push(
                self.service
                    .ensure_identity(child, parent.as_ref(), true)
                    .await?,
            );
        }
        Ok(created)
    }

    /// Actions recorded so far, in order.
    pub fn actions(&self) -> Vec<String> {
        self.metrics
            .samples()
            .into_iter()
            .map(|sample| sample.action)
            .collect()
    }
}

/// One fixture per backend, for tests that must agree across stores.
pub fn both_backends() -> StoreResult<(AclFixture<MemoryStore>, AclFixture<SqliteStore>)> {
    Ok((AclFixture::new(), AclFixture::sqlite()?))
}
