//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite,
//! including unique keys and foreign-key checks, but keeps everything in
//! memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use aclgraph_core::{
    AclClass, ClassId, Entry, EntryId, ObjectIdentity, ObjectIdentityId, Permission, RevokeMode,
    Sid, SidId,
};

use crate::error::{Result, StoreError};
use crate::hierarchy::check_link;
use crate::traits::{
    EntryAppend, EntryDraft, InsertResult, MaskRemoval, NewEntry, NewObjectIdentity, Store,
};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock; every
/// trait method holds the lock for its whole body, which gives it the same
/// atomicity as a SQLite transaction.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Shared row id counter. Ids are unique across tables, which is fine:
    /// callers only rely on them being unique within one.
    next_id: i64,

    classes: BTreeMap<ClassId, AclClass>,
    class_names: HashMap<String, ClassId>,

    sids: BTreeMap<SidId, Sid>,
    sid_keys: HashMap<(String, bool), SidId>,

    identities: BTreeMap<ObjectIdentityId, ObjectIdentity>,
    identity_keys: HashMap<(ClassId, String), ObjectIdentityId>,
    /// Highest ace order ever allocated per identity.
    ace_order_hwm: HashMap<ObjectIdentityId, u32>,

    entries: BTreeMap<EntryId, Entry>,
    /// Position index: (identity, ace_order) -> entry.
    positions: BTreeMap<(ObjectIdentityId, u32), EntryId>,
}

impl MemoryStoreInner {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn sorted_entries<'a>(
        &'a self,
        identity: ObjectIdentityId,
    ) -> impl Iterator<Item = &'a Entry> + 'a {
        self.positions
            .range((identity, 0)..=(identity, u32::MAX))
            .filter_map(move |(_, id)| self.entries.get(id))
    }

    fn remove_entry(&mut self, id: EntryId) -> Option<Entry> {
        let entry = self.entries.remove(&id)?;
        self.positions
            .remove(&(entry.object_identity_id, entry.ace_order));
        Some(entry)
    }

    fn next_ace_order(&mut self, id: ObjectIdentityId) -> Result<u32> {
        if !self.identities.contains_key(&id) {
            return Err(StoreError::NotFound(format!("identity {}", id)));
        }

        let max_existing = self
            .sorted_entries(id)
            .last()
            .map(|e| e.ace_order)
            .unwrap_or(0);
        let hwm = self.ace_order_hwm.get(&id).copied().unwrap_or(0);
        let next = hwm.max(max_existing).checked_add(1).ok_or_else(|| {
            StoreError::InvalidData(format!("ace orders exhausted on identity {}", id))
        })?;
        self.ace_order_hwm.insert(id, next);
        Ok(next)
    }

    fn insert_entry(&mut self, entry: &NewEntry) -> Result<InsertResult<Entry>> {
        if self
            .positions
            .contains_key(&(entry.object_identity_id, entry.ace_order))
        {
            return Ok(InsertResult::AlreadyExists);
        }
        if !self.identities.contains_key(&entry.object_identity_id)
            || !self.sids.contains_key(&entry.sid_id)
        {
            return Err(StoreError::DanglingReference(format!(
                "entry references identity {} or sid {} which does not exist",
                entry.object_identity_id, entry.sid_id
            )));
        }

        let row = Entry {
            id: EntryId(self.allocate_id()),
            object_identity_id: entry.object_identity_id,
            sid_id: entry.sid_id,
            ace_order: entry.ace_order,
            mask: entry.mask,
            granting: entry.granting,
            audit_success: entry.audit_success,
            audit_failure: entry.audit_failure,
        };
        self.positions
            .insert((row.object_identity_id, row.ace_order), row.id);
        self.entries.insert(row.id, row.clone());
        Ok(InsertResult::Inserted(row))
    }

    fn check_identity_refs(
        &self,
        parent_id: Option<ObjectIdentityId>,
        owner_sid_id: Option<SidId>,
    ) -> Result<()> {
        if let Some(parent) = parent_id {
            if !self.identities.contains_key(&parent) {
                return Err(StoreError::DanglingReference(format!(
                    "parent identity {} does not exist",
                    parent
                )));
            }
        }
        if let Some(owner) = owner_sid_id {
            if !self.sids.contains_key(&owner) {
                return Err(StoreError::DanglingReference(format!(
                    "owner sid {} does not exist",
                    owner
                )));
            }
        }
        Ok(())
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Task(format!("memory store lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Task(format!("memory store lock poisoned: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_class(&self, class_name: &str) -> Result<Option<AclClass>> {
        let inner = self.read()?;
        Ok(inner
            .class_names
            .get(class_name)
            .and_then(|id| inner.classes.get(id))
            .cloned())
    }

    async fn insert_class(&self, class_name: &str) -> Result<InsertResult<AclClass>> {
        let mut inner = self.write()?;
        if inner.class_names.contains_key(class_name) {
            return Ok(InsertResult::AlreadyExists);
        }
        let class = AclClass {
            id: ClassId(inner.allocate_id()),
            class_name: class_name.to_owned(),
        };
        inner.class_names.insert(class_name.to_owned(), class.id);
        inner.classes.insert(class.id, class.clone());
        Ok(InsertResult::Inserted(class))
    }

    async fn list_classes(&self) -> Result<Vec<AclClass>> {
        Ok(self.read()?.classes.values().cloned().collect())
    }

    async fn delete_class(&self, id: ClassId) -> Result<bool> {
        let mut inner = self.write()?;

        let members = inner
            .identities
            .values()
            .filter(|oi| oi.class_id == id)
            .count();
        if members > 0 {
            return Err(StoreError::StillReferenced(format!(
                "class {} has {} identities",
                id, members
            )));
        }

        let Some(class) = inner.classes.remove(&id) else {
            return Ok(false);
        };
        inner.class_names.remove(&class.class_name);
        Ok(true)
    }

    async fn find_sid(&self, name: &str, principal: bool) -> Result<Option<Sid>> {
        let inner = self.read()?;
        Ok(inner
            .sid_keys
            .get(&(name.to_owned(), principal))
            .and_then(|id| inner.sids.get(id))
            .cloned())
    }

    async fn get_sid(&self, id: SidId) -> Result<Option<Sid>> {
        Ok(self.read()?.sids.get(&id).cloned())
    }

    async fn insert_sid(&self, name: &str, principal: bool) -> Result<InsertResult<Sid>> {
        let mut inner = self.write()?;
        let key = (name.to_owned(), principal);
        if inner.sid_keys.contains_key(&key) {
            return Ok(InsertResult::AlreadyExists);
        }
        let sid = Sid {
            id: SidId(inner.allocate_id()),
            principal,
            sid: name.to_owned(),
        };
        inner.sid_keys.insert(key, sid.id);
        inner.sids.insert(sid.id, sid.clone());
        Ok(InsertResult::Inserted(sid))
    }

    async fn list_sids(&self) -> Result<Vec<Sid>> {
        Ok(self.read()?.sids.values().cloned().collect())
    }

    async fn delete_sid(&self, id: SidId) -> Result<bool> {
        let mut inner = self.write()?;

        let referencing = inner.entries.values().filter(|e| e.sid_id == id).count();
        if referencing > 0 {
            return Err(StoreError::StillReferenced(format!(
                "sid {} has {} entries",
                id, referencing
            )));
        }

        let Some(sid) = inner.sids.remove(&id) else {
            return Ok(false);
        };
        inner.sid_keys.remove(&(sid.sid, sid.principal));
        for identity in inner.identities.values_mut() {
            if identity.owner_sid_id == Some(id) {
                identity.owner_sid_id = None;
            }
        }
        Ok(true)
    }

    async fn find_object_identity(
        &self,
        class_id: ClassId,
        external_id: &str,
    ) -> Result<Option<ObjectIdentity>> {
        let inner = self.read()?;
        Ok(inner
            .identity_keys
            .get(&(class_id, external_id.to_owned()))
            .and_then(|id| inner.identities.get(id))
            .cloned())
    }

    async fn get_object_identity(&self, id: ObjectIdentityId) -> Result<Option<ObjectIdentity>> {
        Ok(self.read()?.identities.get(&id).cloned())
    }

    async fn insert_object_identity(
        &self,
        identity: &NewObjectIdentity,
    ) -> Result<InsertResult<ObjectIdentity>> {
        let mut inner = self.write()?;

        let key = (identity.class_id, identity.external_id.clone());
        if inner.identity_keys.contains_key(&key) {
            return Ok(InsertResult::AlreadyExists);
        }
        if !inner.classes.contains_key(&identity.class_id) {
            return Err(StoreError::DanglingReference(format!(
                "class {} does not exist",
                identity.class_id
            )));
        }
        inner.check_identity_refs(identity.parent_id, identity.owner_sid_id)?;

        let row = ObjectIdentity {
            id: ObjectIdentityId(inner.allocate_id()),
            class_id: identity.class_id,
            external_id: identity.external_id.clone(),
            parent_id: identity.parent_id,
            owner_sid_id: identity.owner_sid_id,
            entries_inheriting: identity.entries_inheriting,
        };
        inner.identity_keys.insert(key, row.id);
        inner.identities.insert(row.id, row.clone());
        Ok(InsertResult::Inserted(row))
    }

    async fn update_object_identity(&self, identity: &ObjectIdentity) -> Result<()> {
        let mut inner = self.write()?;
        if !inner.identities.contains_key(&identity.id) {
            return Err(StoreError::NotFound(format!("identity {}", identity.id)));
        }
        inner.check_identity_refs(identity.parent_id, identity.owner_sid_id)?;

        if let Some(row) = inner.identities.get_mut(&identity.id) {
            row.parent_id = identity.parent_id;
            row.owner_sid_id = identity.owner_sid_id;
            row.entries_inheriting = identity.entries_inheriting;
        }
        Ok(())
    }

    async fn set_parent(
        &self,
        id: ObjectIdentityId,
        parent: Option<ObjectIdentityId>,
        max_depth: u32,
    ) -> Result<ObjectIdentity> {
        let mut inner = self.write()?;
        if !inner.identities.contains_key(&id) {
            return Err(StoreError::NotFound(format!("identity {}", id)));
        }
        if let Some(parent) = parent {
            check_link(id, parent, max_depth, |node| {
                Ok(inner.identities.get(&node).map(|oi| oi.parent_id))
            })?;
        }

        let row = inner
            .identities
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("identity {}", id)))?;
        row.parent_id = parent;
        Ok(row.clone())
    }

    async fn list_object_identities(&self) -> Result<Vec<ObjectIdentity>> {
        Ok(self.read()?.identities.values().cloned().collect())
    }

    async fn delete_object_identity(&self, id: ObjectIdentityId) -> Result<u64> {
        let mut inner = self.write()?;

        let children = inner
            .identities
            .values()
            .filter(|oi| oi.parent_id == Some(id))
            .count();
        if children > 0 {
            return Err(StoreError::StillReferenced(format!(
                "identity {} is the parent of {} identities",
                id, children
            )));
        }

        let Some(row) = inner.identities.remove(&id) else {
            return Err(StoreError::NotFound(format!("identity {}", id)));
        };
        inner.identity_keys.remove(&(row.class_id, row.external_id));
        inner.ace_order_hwm.remove(&id);

        let doomed: Vec<EntryId> = inner.sorted_entries(id).map(|e| e.id).collect();
        for entry_id in &doomed {
            inner.remove_entry(*entry_id);
        }
        Ok(doomed.len() as u64)
    }

    async fn next_ace_order(&self, id: ObjectIdentityId) -> Result<u32> {
        self.write()?.next_ace_order(id)
    }

    async fn insert_entry(&self, entry: &NewEntry) -> Result<InsertResult<Entry>> {
        self.write()?.insert_entry(entry)
    }

    async fn append_entry_if_absent(&self, draft: &EntryDraft) -> Result<EntryAppend> {
        let mut inner = self.write()?;

        if let Some(existing) = inner.sorted_entries(draft.object_identity_id).find(|e| {
            e.sid_id == draft.sid_id && e.mask == draft.mask && e.granting == draft.granting
        }) {
            return Ok(EntryAppend::Existing(existing.clone()));
        }
        if !inner.sids.contains_key(&draft.sid_id) {
            return Err(StoreError::DanglingReference(format!(
                "entry references sid {} which does not exist",
                draft.sid_id
            )));
        }

        let ace_order = inner.next_ace_order(draft.object_identity_id)?;
        let new = NewEntry {
            object_identity_id: draft.object_identity_id,
            sid_id: draft.sid_id,
            ace_order,
            mask: draft.mask,
            granting: draft.granting,
            audit_success: draft.audit_success,
            audit_failure: draft.audit_failure,
        };
        match inner.insert_entry(&new)? {
            InsertResult::Inserted(entry) => Ok(EntryAppend::Created(entry)),
            InsertResult::AlreadyExists => Err(StoreError::InvalidData(format!(
                "allocated ace order {} is taken on identity {}",
                ace_order, draft.object_identity_id
            ))),
        }
    }

    async fn entries_for_identity(&self, identity: ObjectIdentityId) -> Result<Vec<Entry>> {
        Ok(self.read()?.sorted_entries(identity).cloned().collect())
    }

    async fn entries_for_sids(
        &self,
        identity: ObjectIdentityId,
        sids: &[SidId],
    ) -> Result<Vec<Entry>> {
        Ok(self
            .read()?
            .sorted_entries(identity)
            .filter(|e| sids.contains(&e.sid_id))
            .cloned()
            .collect())
    }

    async fn remove_entries(
        &self,
        identity: ObjectIdentityId,
        sid: SidId,
        mask: Permission,
        granting: bool,
        mode: RevokeMode,
    ) -> Result<MaskRemoval> {
        let mut inner = self.write()?;

        let matching: Vec<(EntryId, Permission)> = inner
            .sorted_entries(identity)
            .filter(|e| e.sid_id == sid && e.granting == granting)
            .filter(|e| match mode {
                RevokeMode::ExactMask => e.mask == mask,
                RevokeMode::ClearBits => e.mask.intersects(mask),
            })
            .map(|e| (e.id, e.mask))
            .collect();

        let mut removal = MaskRemoval::default();
        for (id, current) in matching {
            let remaining = match mode {
                RevokeMode::ExactMask => Permission::NONE,
                RevokeMode::ClearBits => current.without(mask),
            };
            if remaining.is_empty() {
                inner.remove_entry(id);
                removal.deleted += 1;
            } else if let Some(entry) = inner.entries.get_mut(&id) {
                entry.mask = remaining;
                removal.narrowed += 1;
            }
        }
        Ok(removal)
    }

    async fn delete_entry(&self, id: EntryId) -> Result<bool> {
        Ok(self.write()?.remove_entry(id).is_some())
    }

    async fn delete_entries_for_identity(&self, identity: ObjectIdentityId) -> Result<u64> {
        let mut inner = self.write()?;
        let doomed: Vec<EntryId> = inner.sorted_entries(identity).map(|e| e.id).collect();
        for id in &doomed {
            inner.remove_entry(*id);
        }
        Ok(doomed.len() as u64)
    }

    async fn delete_entries_for_sid(&self, sid: SidId) -> Result<u64> {
        let mut inner = self.write()?;
        let doomed: Vec<EntryId> = inner
            .entries
            .values()
            .filter(|e| e.sid_id == sid)
            .map(|e| e.id)
            .collect();
        for id in &doomed {
            inner.remove_entry(*id);
        }
        Ok(doomed.len() as u64)
    }

    async fn list_entries(&self) -> Result<Vec<Entry>> {
        let inner = self.read()?;
        Ok(inner
            .positions
            .values()
            .filter_map(|id| inner.entries.get(id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StoreExt;
    use aclgraph_core::SidKey;

    async fn identity(store: &MemoryStore, external_id: &str) -> ObjectIdentity {
        let class = match store.find_class("Document").await.unwrap() {
            Some(class) => class,
            None => store.insert_class("Document").await.unwrap().inserted().unwrap(),
        };
        store
            .insert_object_identity(&NewObjectIdentity {
                class_id: class.id,
                external_id: external_id.into(),
                parent_id: None,
                owner_sid_id: None,
                entries_inheriting: true,
            })
            .await
            .unwrap()
            .inserted()
            .unwrap()
    }

    fn grant(identity: &ObjectIdentity, sid: &Sid, order: u32, mask: Permission) -> NewEntry {
        NewEntry {
            object_identity_id: identity.id,
            sid_id: sid.id,
            ace_order: order,
            mask,
            granting: true,
            audit_success: false,
            audit_failure: false,
        }
    }

    #[tokio::test]
    async fn test_identity_unique_key() {
        let store = MemoryStore::new();
        let first = identity(&store, "doc-1").await;

        let dup = store
            .insert_object_identity(&NewObjectIdentity {
                class_id: first.class_id,
                external_id: "doc-1".into(),
                parent_id: None,
                owner_sid_id: None,
                entries_inheriting: false,
            })
            .await
            .unwrap();
        assert_eq!(dup, InsertResult::AlreadyExists);

        let found = store
            .find_object_identity(first.class_id, "doc-1")
            .await
            .unwrap();
        assert_eq!(found, Some(first));
    }

    #[tokio::test]
    async fn test_identity_with_missing_parent_is_dangling() {
        let store = MemoryStore::new();
        let doc = identity(&store, "doc-1").await;
        let err = store
            .insert_object_identity(&NewObjectIdentity {
                class_id: doc.class_id,
                external_id: "doc-2".into(),
                parent_id: Some(ObjectIdentityId(404)),
                owner_sid_id: None,
                entries_inheriting: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DanglingReference(_)));
    }

    #[tokio::test]
    async fn test_entries_sorted_by_order() {
        let store = MemoryStore::new();
        let doc = identity(&store, "doc-1").await;
        let sid = store.insert_sid("alice", true).await.unwrap().inserted().unwrap();

        for order in [7, 2, 5] {
            store
                .insert_entry(&grant(&doc, &sid, order, Permission::READ))
                .await
                .unwrap();
        }

        let orders: Vec<u32> = store
            .entries_for_identity(doc.id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.ace_order)
            .collect();
        assert_eq!(orders, vec![2, 5, 7]);
    }

    #[tokio::test]
    async fn test_next_ace_order_tracks_high_water_mark() {
        let store = MemoryStore::new();
        let doc = identity(&store, "doc-1").await;
        let sid = store.insert_sid("alice", true).await.unwrap().inserted().unwrap();

        assert_eq!(store.next_ace_order(doc.id).await.unwrap(), 1);
        let e = store
            .insert_entry(&grant(&doc, &sid, 1, Permission::READ))
            .await
            .unwrap()
            .inserted()
            .unwrap();
        store.delete_entry(e.id).await.unwrap();

        assert_eq!(store.next_ace_order(doc.id).await.unwrap(), 2);
        assert!(store.next_ace_order(ObjectIdentityId(404)).await.is_err());
    }

    #[tokio::test]
    async fn test_clear_bits_narrows_and_deletes() {
        let store = MemoryStore::new();
        let doc = identity(&store, "doc-1").await;
        let sid = store.insert_sid("alice", true).await.unwrap().inserted().unwrap();

        store
            .insert_entry(&grant(&doc, &sid, 1, Permission::READ | Permission::DELETE))
            .await
            .unwrap();
        store
            .insert_entry(&grant(&doc, &sid, 2, Permission::READ))
            .await
            .unwrap();
        store
            .insert_entry(&grant(&doc, &sid, 3, Permission::WRITE))
            .await
            .unwrap();

        let removal = store
            .remove_entries(doc.id, sid.id, Permission::READ, true, RevokeMode::ClearBits)
            .await
            .unwrap();
        assert_eq!(removal, MaskRemoval { deleted: 1, narrowed: 1 });

        let masks: Vec<Permission> = store
            .entries_for_identity(doc.id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.mask)
            .collect();
        assert_eq!(masks, vec![Permission::DELETE, Permission::WRITE]);
    }

    #[tokio::test]
    async fn test_delete_identity_removes_entries() {
        let store = MemoryStore::new();
        let doc = identity(&store, "doc-1").await;
        let sid = store.insert_sid("alice", true).await.unwrap().inserted().unwrap();
        store
            .insert_entry(&grant(&doc, &sid, 1, Permission::READ))
            .await
            .unwrap();

        assert_eq!(store.delete_object_identity(doc.id).await.unwrap(), 1);
        assert!(store.get_object_identity(doc.id).await.unwrap().is_none());
        assert!(store.entries_for_identity(doc.id).await.unwrap().is_empty());

        // The key is free again.
        identity(&store, "doc-1").await;
    }

    #[tokio::test]
    async fn test_find_sid_ids_skips_unknown_and_trims() {
        let store = MemoryStore::new();
        let alice = store.insert_sid("alice", true).await.unwrap().inserted().unwrap();
        let editor = store.insert_sid("EDITOR", false).await.unwrap().inserted().unwrap();

        let ids = store
            .find_sid_ids(&[
                SidKey::principal(" alice "),
                SidKey::role("GHOST"),
                SidKey::role("EDITOR"),
                SidKey::principal("alice"),
            ])
            .await
            .unwrap();
        assert_eq!(ids, vec![alice.id, editor.id]);
    }

    fn draft(identity: &ObjectIdentity, sid: &Sid, mask: Permission) -> EntryDraft {
        EntryDraft {
            object_identity_id: identity.id,
            sid_id: sid.id,
            mask,
            granting: true,
            audit_success: false,
            audit_failure: false,
        }
    }

    #[tokio::test]
    async fn test_append_entry_if_absent() {
        let store = MemoryStore::new();
        let doc = identity(&store, "doc-1").await;
        let sid = store.insert_sid("alice", true).await.unwrap().inserted().unwrap();
        store
            .insert_entry(&grant(&doc, &sid, 4, Permission::WRITE))
            .await
            .unwrap();

        let first = store
            .append_entry_if_absent(&draft(&doc, &sid, Permission::READ))
            .await
            .unwrap();
        assert!(first.created());
        assert_eq!(first.entry().ace_order, 5);

        let again = store
            .append_entry_if_absent(&draft(&doc, &sid, Permission::READ))
            .await
            .unwrap();
        assert_eq!(again, EntryAppend::Existing(first.into_entry()));
        assert_eq!(store.entries_for_identity(doc.id).await.unwrap().len(), 2);

        let err = store
            .append_entry_if_absent(&EntryDraft {
                sid_id: SidId(404),
                ..draft(&doc, &sid, Permission::READ)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DanglingReference(_)));
    }

    #[tokio::test]
    async fn test_set_parent_checks_chain() {
        let store = MemoryStore::new();
        let a = identity(&store, "a").await;
        let b = identity(&store, "b").await;

        let linked = store.set_parent(b.id, Some(a.id), 64).await.unwrap();
        assert_eq!(linked.parent_id, Some(a.id));

        let err = store.set_parent(a.id, Some(b.id), 64).await.unwrap_err();
        assert!(matches!(err, StoreError::Hierarchy(_)));
        let err = store.set_parent(a.id, Some(ObjectIdentityId(404)), 64).await.unwrap_err();
        assert!(matches!(err, StoreError::DanglingReference(_)));
        let err = store.set_parent(ObjectIdentityId(404), None, 64).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let detached = store.set_parent(b.id, None, 64).await.unwrap();
        assert_eq!(detached.parent_id, None);
        store.set_parent(a.id, Some(b.id), 64).await.unwrap();
    }

    #[tokio::test]
    async fn test_listing_and_class_deletion() {
        let store = MemoryStore::new();
        let doc = identity(&store, "doc-1").await;
        let sid = store.insert_sid("alice", true).await.unwrap().inserted().unwrap();
        let other = identity(&store, "doc-0").await;
        store.insert_entry(&grant(&other, &sid, 1, Permission::READ)).await.unwrap();
        store.insert_entry(&grant(&doc, &sid, 2, Permission::READ)).await.unwrap();
        store.insert_entry(&grant(&doc, &sid, 1, Permission::WRITE)).await.unwrap();

        assert_eq!(store.list_classes().await.unwrap().len(), 1);
        assert_eq!(store.list_sids().await.unwrap(), vec![sid.clone()]);
        let identities: Vec<_> = store
            .list_object_identities()
            .await
            .unwrap()
            .into_iter()
            .map(|oi| oi.id)
            .collect();
        assert_eq!(identities, vec![doc.id, other.id]);
        let entries: Vec<_> = store
            .list_entries()
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.object_identity_id, e.ace_order))
            .collect();
        assert_eq!(entries, vec![(doc.id, 1), (doc.id, 2), (other.id, 1)]);

        let err = store.delete_class(doc.class_id).await.unwrap_err();
        assert!(matches!(err, StoreError::StillReferenced(_)));
        store.delete_object_identity(doc.id).await.unwrap();
        store.delete_object_identity(other.id).await.unwrap();
        assert!(store.delete_class(doc.class_id).await.unwrap());
        assert!(!store.delete_class(doc.class_id).await.unwrap());
        assert!(store.find_class("Document").await.unwrap().is_none());
    }
}
