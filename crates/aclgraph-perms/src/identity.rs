//! Object identity registry: the nodes of the ACL graph.
//!
//! Identities are created lazily, addressed by (class name, external id),
//! and linked into an acyclic parent graph that the resolver walks.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use aclgraph_core::{
    validate_name, AclClass, ObjectIdentity, ObjectIdentityId, ObjectKey, SidId,
};
use aclgraph_store::{InsertResult, NewObjectIdentity, Store};

use crate::error::{AclError, Result};
use crate::sid::DEFAULT_MAX_INSERT_ATTEMPTS;

/// Default bound on parent hops followed by [`ObjectIdentityRegistry::ancestor_chain`].
pub const DEFAULT_MAX_CHAIN_DEPTH: u32 = 64;

/// Column values applied when [`ObjectIdentityRegistry::ensure`] creates a
/// new identity. Ignored if the identity already exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityOptions {
    pub parent: Option<ObjectIdentityId>,
    pub owner: Option<SidId>,
    pub entries_inheriting: bool,
}

impl Default for IdentityOptions {
    fn default() -> Self {
        Self {
            parent: None,
            owner: None,
            entries_inheriting: true,
        }
    }
}

impl IdentityOptions {
    pub fn with_parent(mut self, parent: ObjectIdentityId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_owner(mut self, owner: SidId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn inheriting(mut self, entries_inheriting: bool) -> Self {
        self.entries_inheriting = entries_inheriting;
        self
    }
}

/// Idempotent creation, lookup and linkage of object identities.
pub struct ObjectIdentityRegistry<S: Store> {
    store: Arc<S>,
    max_attempts: u32,
    max_depth: u32,
}

impl<S: Store> Clone for ObjectIdentityRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            max_attempts: self.max_attempts,
            max_depth: self.max_depth,
        }
    }
}

impl<S: Store> ObjectIdentityRegistry<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_INSERT_ATTEMPTS,
            max_depth: DEFAULT_MAX_CHAIN_DEPTH,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Classes
    // ─────────────────────────────────────────────────────────────────────────

    /// Return the class row for `class_name`, creating it if needed.
    pub async fn ensure_class(&self, class_name: &str) -> Result<AclClass> {
        let class_name = validate_name(class_name, "class name")?;

        for attempt in 1..=self.max_attempts {
            if let Some(class) = self.store.find_class(class_name).await? {
                return Ok(class);
            }
            match self.store.insert_class(class_name).await? {
                InsertResult::Inserted(class) => {
                    debug!(class = %class.class_name, id = %class.id, "created acl class");
                    return Ok(class);
                }
                InsertResult::AlreadyExists => {
                    debug!(class = class_name, attempt, "lost class creation race, re-reading");
                }
            }
        }

        self.store.find_class(class_name).await?.ok_or_else(|| {
            AclError::Conflict(format!(
                "could not create class {} after {} attempts",
                class_name, self.max_attempts
            ))
        })
    }

    /// Every class, ascending by id.
    pub async fn list_classes(&self) -> Result<Vec<AclClass>> {
        Ok(self.store.list_classes().await?)
    }

    /// Delete a class that no identity belongs to.
    ///
    /// Fails with [`AclError::Conflict`] while identities still use it.
    /// Returns `false` if the class did not exist.
    pub async fn delete_class(&self, class_name: &str) -> Result<bool> {
        let Some(class) = self.find_class(class_name).await? else {
            return Ok(false);
        };
        let deleted = self.store.delete_class(class.id).await?;
        debug!(class = %class.class_name, deleted, "deleted acl class");
        Ok(deleted)
    }

    /// Look up a class without creating it.
    pub async fn find_class(&self, class_name: &str) -> Result<Option<AclClass>> {
        let class_name = validate_name(class_name, "class name")?;
        Ok(self.store.find_class(class_name).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Identities
    // ─────────────────────────────────────────────────────────────────────────

    /// Return the identity for `key`, creating it (and its class) if needed.
    ///
    /// An existing identity is returned unchanged; `options` only applies to
    /// a freshly created row. A supplied parent must already exist.
    pub async fn ensure(&self, key: &ObjectKey, options: IdentityOptions) -> Result<ObjectIdentity> {
        self.ensure_tracked(key, options)
            .await
            .map(|(identity, _)| identity)
    }

    /// [`ensure`](Self::ensure), also reporting whether this call created
    /// the row.
    pub async fn ensure_tracked(
        &self,
        key: &ObjectKey,
        options: IdentityOptions,
    ) -> Result<(ObjectIdentity, bool)> {
        validate_name(&key.external_id, "external id")?;
        let class = self.ensure_class(&key.class_name).await?;

        if let Some(parent) = options.parent {
            if self.store.get_object_identity(parent).await?.is_none() {
                return Err(AclError::NotFound(format!("parent identity {}", parent)));
            }
        }

        let new = NewObjectIdentity {
            class_id: class.id,
            external_id: key.external_id.clone(),
            parent_id: options.parent,
            owner_sid_id: options.owner,
            entries_inheriting: options.entries_inheriting,
        };

        for attempt in 1..=self.max_attempts {
            if let Some(existing) = self
                .store
                .find_object_identity(class.id, &key.external_id)
                .await?
            {
                return Ok((existing, false));
            }
            match self.store.insert_object_identity(&new).await? {
                InsertResult::Inserted(identity) => {
                    debug!(object = %key, id = %identity.id, "created object identity");
                    return Ok((identity, true));
                }
                InsertResult::AlreadyExists => {
                    debug!(object = %key, attempt, "lost identity creation race, re-reading");
                }
            }
        }

        self.store
            .find_object_identity(class.id, &key.external_id)
            .await?
            .map(|existing| (existing, false))
            .ok_or_else(|| {
                AclError::Conflict(format!(
                    "could not create identity {} after {} attempts",
                    key, self.max_attempts
                ))
            })
    }

    /// Look up an identity without creating it. An unknown class is `None`.
    pub async fn find(&self, key: &ObjectKey) -> Result<Option<ObjectIdentity>> {
        let Some(class) = self.find_class(&key.class_name).await? else {
            return Ok(None);
        };
        Ok(self
            .store
            .find_object_identity(class.id, &key.external_id)
            .await?)
    }

    /// Look up an identity that must exist.
    pub async fn require(&self, key: &ObjectKey) -> Result<ObjectIdentity> {
        self.find(key)
            .await?
            .ok_or_else(|| AclError::NotFound(format!("object identity {}", key)))
    }

    /// Every identity, ascending by id.
    pub async fn list(&self) -> Result<Vec<ObjectIdentity>> {
        Ok(self.store.list_object_identities().await?)
    }

    /// Get an identity by id.
    pub async fn get(&self, id: ObjectIdentityId) -> Result<Option<ObjectIdentity>> {
        Ok(self.store.get_object_identity(id).await?)
    }

    async fn load(&self, id: ObjectIdentityId) -> Result<ObjectIdentity> {
        self.get(id)
            .await?
            .ok_or_else(|| AclError::NotFound(format!("object identity {}", id)))
    }

    /// Link `id` under `parent`, or detach it with `None`.
    ///
    /// Rejects self-parenting and any link that would close a cycle. The
    /// check follows raw parent links, ignoring inheritance flags, and runs
    /// in the same store transaction as the write.
    pub async fn set_parent(
        &self,
        id: ObjectIdentityId,
        parent: Option<ObjectIdentityId>,
    ) -> Result<ObjectIdentity> {
        let identity = self.store.set_parent(id, parent, self.max_depth).await?;
        debug!(id = %id, parent = ?parent.map(|p| p.0), "set identity parent");
        Ok(identity)
    }

    /// Turn inheritance from the parent on or off.
    pub async fn set_entries_inheriting(
        &self,
        id: ObjectIdentityId,
        entries_inheriting: bool,
    ) -> Result<ObjectIdentity> {
        let mut identity = self.load(id).await?;
        identity.entries_inheriting = entries_inheriting;
        self.store.update_object_identity(&identity).await?;
        debug!(id = %id, entries_inheriting, "set identity inheritance");
        Ok(identity)
    }

    /// Change or clear the owning SID.
    pub async fn set_owner(&self, id: ObjectIdentityId, owner: Option<SidId>) -> Result<ObjectIdentity> {
        let mut identity = self.load(id).await?;
        identity.owner_sid_id = owner;
        self.store.update_object_identity(&identity).await?;
        Ok(identity)
    }

    /// The identities the resolver consults for `identity`, nearest first.
    ///
    /// Starts at `identity` and moves to the parent only while the current
    /// node inherits. A revisited node or a chain longer than the configured
    /// depth is a [`AclError::Conflict`].
    pub async fn ancestor_chain(&self, identity: &ObjectIdentity) -> Result<Vec<ObjectIdentity>> {
        let mut chain = vec![identity.clone()];
        let mut visited = HashSet::from([identity.id]);

        loop {
            let current = &chain[chain.len() - 1];
            if !current.entries_inheriting {
                break;
            }
            let Some(parent_id) = current.parent_id else {
                break;
            };

            if !visited.insert(parent_id) {
                return Err(AclError::Conflict(format!(
                    "cycle in ancestor chain of {} at {}",
                    identity.id, parent_id
                )));
            }
            if chain.len() > self.max_depth as usize {
                return Err(AclError::Conflict(format!(
                    "ancestor chain of {} exceeds {} levels",
                    identity.id, self.max_depth
                )));
            }

            let parent = self.load(parent_id).await?;
            chain.push(parent);
        }

        Ok(chain)
    }

    /// Delete an identity together with its entries.
    ///
    /// Fails with [`AclError::Conflict`] while other identities name it as
    /// parent. Returns the number of entries removed.
    pub async fn delete(&self, id: ObjectIdentityId) -> Result<u64> {
        let removed = self.store.delete_object_identity(id).await?;
        debug!(id = %id, entries = removed, "deleted object identity");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aclgraph_store::MemoryStore;

    fn registry() -> ObjectIdentityRegistry<MemoryStore> {
        ObjectIdentityRegistry::new(Arc::new(MemoryStore::new()))
    }

    fn key(id: &str) -> ObjectKey {
        ObjectKey::new("Document", id)
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let oids = registry();
        let first = oids.ensure(&key("1"), IdentityOptions::default()).await.unwrap();
        let again = oids
            .ensure(&key("1"), IdentityOptions::default().inheriting(false))
            .await
            .unwrap();
        assert_eq!(first, again);
        assert!(again.entries_inheriting);
    }

    #[tokio::test]
    async fn test_ensure_with_missing_parent() {
        let err = registry()
            .ensure(
                &key("1"),
                IdentityOptions::default().with_parent(ObjectIdentityId(77)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AclError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_find_unknown_class_is_none() {
        let oids = registry();
        assert!(oids.find(&ObjectKey::new("Nope", "1")).await.unwrap().is_none());
        assert!(matches!(
            oids.require(&ObjectKey::new("Nope", "1")).await,
            Err(AclError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_ensure_yields_one_row() {
        let oids = registry();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let oids = oids.clone();
            handles.push(tokio::spawn(async move {
                oids.ensure(&key("shared"), IdentityOptions::default())
                    .await
                    .unwrap()
                    .id
            }));
        }
        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn test_ancestor_chain_respects_inheritance() {
        let oids = registry();
        let root = oids.ensure(&key("root"), IdentityOptions::default()).await.unwrap();
        let mid = oids
            .ensure(&key("mid"), IdentityOptions::default().with_parent(root.id))
            .await
            .unwrap();
        let leaf = oids
            .ensure(&key("leaf"), IdentityOptions::default().with_parent(mid.id))
            .await
            .unwrap();

        let ids: Vec<_> = oids
            .ancestor_chain(&leaf)
            .await
            .unwrap()
            .iter()
            .map(|oi| oi.id)
            .collect();
        assert_eq!(ids, vec![leaf.id, mid.id, root.id]);

        // A non-inheriting node is the last one consulted.
        oids.set_entries_inheriting(mid.id, false).await.unwrap();
        let ids: Vec<_> = oids
            .ancestor_chain(&leaf)
            .await
            .unwrap()
            .iter()
            .map(|oi| oi.id)
            .collect();
        assert_eq!(ids, vec![leaf.id, mid.id]);
    }

    #[tokio::test]
    async fn test_ancestor_chain_depth_limit() {
        let oids = registry().with_max_depth(2);
        let mut parent = oids.ensure(&key("0"), IdentityOptions::default()).await.unwrap();
        for i in 1..=3 {
            parent = oids
                .ensure(
                    &key(&i.to_string()),
                    IdentityOptions::default().with_parent(parent.id),
                )
                .await
                .unwrap();
        }
        let err = oids.ancestor_chain(&parent).await.unwrap_err();
        assert!(matches!(err, AclError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_set_parent_rejects_cycles() {
        let oids = registry();
        let a = oids.ensure(&key("a"), IdentityOptions::default()).await.unwrap();
        let b = oids
            .ensure(&key("b"), IdentityOptions::default().with_parent(a.id))
            .await
            .unwrap();

        assert!(matches!(
            oids.set_parent(a.id, Some(a.id)).await,
            Err(AclError::Conflict(_))
        ));
        assert!(matches!(
            oids.set_parent(a.id, Some(b.id)).await,
            Err(AclError::Conflict(_))
        ));

        // Detaching and relinking the other way round is fine.
        oids.set_parent(b.id, None).await.unwrap();
        let a = oids.set_parent(a.id, Some(b.id)).await.unwrap();
        assert_eq!(a.parent_id, Some(b.id));
    }

    #[tokio::test]
    async fn test_delete_with_children_conflicts() {
        let oids = registry();
        let parent = oids.ensure(&key("p"), IdentityOptions::default()).await.unwrap();
        let child = oids
            .ensure(&key("c"), IdentityOptions::default().with_parent(parent.id))
            .await
            .unwrap();

        assert!(matches!(
            oids.delete(parent.id).await,
            Err(AclError::Conflict(_))
        ));

        oids.set_parent(child.id, None).await.unwrap();
        oids.delete(parent.id).await.unwrap();
        assert!(oids.get(parent.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ensure_tracked_reports_creation() {
        let oids = registry();
        let (first, created) = oids
            .ensure_tracked(&key("1"), IdentityOptions::default())
            .await
            .unwrap();
        assert!(created);
        let (again, created) = oids
            .ensure_tracked(&key("1"), IdentityOptions::default())
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn test_delete_class_requires_no_members() {
        let oids = registry();
        let doc = oids.ensure(&key("1"), IdentityOptions::default()).await.unwrap();
        oids.ensure_class("Folder").await.unwrap();

        assert!(matches!(
            oids.delete_class("Document").await,
            Err(AclError::Conflict(_))
        ));
        assert!(oids.delete_class("Folder").await.unwrap());
        assert!(!oids.delete_class("Folder").await.unwrap());

        oids.delete(doc.id).await.unwrap();
        assert!(oids.delete_class("Document").await.unwrap());
        assert!(oids.list_classes().await.unwrap().is_empty());
        assert!(oids.list().await.unwrap().is_empty());
    }
}
