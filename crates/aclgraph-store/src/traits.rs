//! Store trait: the abstract interface for ACL persistence.
//!
//! The trait mirrors the four relational tables. It deliberately knows
//! nothing about inheritance or evaluation; those live in the registries and
//! the resolver.

use async_trait::async_trait;

use aclgraph_core::{
    AclClass, ClassId, Entry, EntryId, ObjectIdentity, ObjectIdentityId, Permission, RevokeMode,
    Sid, SidId, SidKey,
};

use crate::error::Result;

/// Result of inserting a row guarded by a unique key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertResult<T> {
    /// Row was inserted.
    Inserted(T),
    /// A row with the same unique key already exists (a concurrent writer
    /// may have won the race). Not an error: re-read it.
    AlreadyExists,
}

impl<T> InsertResult<T> {
    /// The inserted row, if any.
    pub fn inserted(self) -> Option<T> {
        match self {
            InsertResult::Inserted(value) => Some(value),
            InsertResult::AlreadyExists => None,
        }
    }
}

/// Column values for a new object identity row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewObjectIdentity {
    pub class_id: ClassId,
    pub external_id: String,
    pub parent_id: Option<ObjectIdentityId>,
    pub owner_sid_id: Option<SidId>,
    pub entries_inheriting: bool,
}

/// Column values for a new entry row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub object_identity_id: ObjectIdentityId,
    pub sid_id: SidId,
    pub ace_order: u32,
    pub mask: Permission,
    pub granting: bool,
    pub audit_success: bool,
    pub audit_failure: bool,
}

/// Column values for an entry appended only if no identical one exists.
///
/// The ace order is allocated by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDraft {
    pub object_identity_id: ObjectIdentityId,
    pub sid_id: SidId,
    pub mask: Permission,
    pub granting: bool,
    pub audit_success: bool,
    pub audit_failure: bool,
}

/// Outcome of [`Store::append_entry_if_absent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryAppend {
    /// No matching entry existed; this one was appended.
    Created(Entry),
    /// A matching entry was already stored.
    Existing(Entry),
}

impl EntryAppend {
    pub fn entry(&self) -> &Entry {
        match self {
            EntryAppend::Created(entry) | EntryAppend::Existing(entry) => entry,
        }
    }

    pub fn into_entry(self) -> Entry {
        match self {
            EntryAppend::Created(entry) | EntryAppend::Existing(entry) => entry,
        }
    }

    pub fn created(&self) -> bool {
        matches!(self, EntryAppend::Created(_))
    }
}

/// What a revoke did to the stored entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaskRemoval {
    /// Entries removed outright.
    pub deleted: u64,
    /// Entries that kept some bits and were rewritten with a smaller mask.
    pub narrowed: u64,
}

impl MaskRemoval {
    /// Number of entries touched.
    pub fn affected(&self) -> u64 {
        self.deleted + self.narrowed
    }
}

/// The Store trait: async interface for ACL persistence.
///
/// All methods are async so SQLite can run on `spawn_blocking` and remote
/// backends can be added without changing callers.
///
/// # Design Notes
///
/// - **Unique inserts**: `insert_*` never fails on a duplicate key; it
///   returns [`InsertResult::AlreadyExists`].
/// - **Ordering**: every method returning entries sorts them by
///   `ace_order` ascending.
/// - **Read consistency**: a reader sees an entry either fully written or
///   not at all.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Class Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Look up a class by name.
    async fn find_class(&self, class_name: &str) -> Result<Option<AclClass>>;

    /// Insert a class row.
    async fn insert_class(&self, class_name: &str) -> Result<InsertResult<AclClass>>;

    /// Every class, ascending by id.
    async fn list_classes(&self) -> Result<Vec<AclClass>>;

    /// Delete a class row.
    ///
    /// Fails with `StillReferenced` while identities belong to it. Returns
    /// `false` if no row existed.
    async fn delete_class(&self, id: ClassId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // SID Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Look up a SID by (name, principal).
    async fn find_sid(&self, name: &str, principal: bool) -> Result<Option<Sid>>;

    /// Get a SID by id.
    async fn get_sid(&self, id: SidId) -> Result<Option<Sid>>;

    /// Insert a SID row.
    async fn insert_sid(&self, name: &str, principal: bool) -> Result<InsertResult<Sid>>;

    /// Every SID, ascending by id.
    async fn list_sids(&self) -> Result<Vec<Sid>>;

    /// Delete a SID row.
    ///
    /// Fails with `StillReferenced` while entries point at it. Identities
    /// owned by the SID lose their owner. Returns `false` if no row existed.
    async fn delete_sid(&self, id: SidId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Object Identity Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Look up an identity by (class, external id).
    async fn find_object_identity(
        &self,
        class_id: ClassId,
        external_id: &str,
    ) -> Result<Option<ObjectIdentity>>;

    /// Get an identity by id.
    async fn get_object_identity(&self, id: ObjectIdentityId) -> Result<Option<ObjectIdentity>>;

    /// Insert an identity row.
    async fn insert_object_identity(
        &self,
        identity: &NewObjectIdentity,
    ) -> Result<InsertResult<ObjectIdentity>>;

    /// Overwrite the mutable columns (parent, owner, inheriting) of an identity.
    async fn update_object_identity(&self, identity: &ObjectIdentity) -> Result<()>;

    /// Link `id` under `parent`, or detach it with `None`, in one step.
    ///
    /// The parent chain is walked and the link written under the same
    /// transaction (or lock), so two opposite links racing cannot both land.
    /// A missing `id` is `NotFound`, a missing parent `DanglingReference`.
    /// Self-parenting, a link that would close a cycle, or a parent chain
    /// longer than `max_depth` is `Hierarchy`.
    async fn set_parent(
        &self,
        id: ObjectIdentityId,
        parent: Option<ObjectIdentityId>,
        max_depth: u32,
    ) -> Result<ObjectIdentity>;

    /// Every identity, ascending by id.
    async fn list_object_identities(&self) -> Result<Vec<ObjectIdentity>>;

    /// Delete an identity and, in the same transaction, all of its entries.
    ///
    /// Fails with `StillReferenced` if any identity still names it as parent.
    /// Returns the number of entries removed.
    async fn delete_object_identity(&self, id: ObjectIdentityId) -> Result<u64>;

    // ─────────────────────────────────────────────────────────────────────────
    // Entry Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Allocate the next ace order for an identity.
    ///
    /// Returns `max(high-water mark, max existing order) + 1` and records it
    /// as the new high-water mark, so orders are never handed out twice.
    async fn next_ace_order(&self, id: ObjectIdentityId) -> Result<u32>;

    /// Insert an entry. `AlreadyExists` means the ace order is taken.
    async fn insert_entry(&self, entry: &NewEntry) -> Result<InsertResult<Entry>>;

    /// Return the entry matching (identity, sid, mask, granting), or append
    /// one at the next ace order.
    ///
    /// Lookup, order allocation and insert run as one transaction (or under
    /// one lock), so concurrent identical grants store a single row.
    async fn append_entry_if_absent(&self, draft: &EntryDraft) -> Result<EntryAppend>;

    /// All entries of an identity, ascending by ace order.
    async fn entries_for_identity(&self, identity: ObjectIdentityId) -> Result<Vec<Entry>>;

    /// Entries of an identity restricted to `sids`, ascending by ace order.
    async fn entries_for_sids(
        &self,
        identity: ObjectIdentityId,
        sids: &[SidId],
    ) -> Result<Vec<Entry>>;

    /// Remove `mask` from the matching entries of (identity, sid, granting).
    async fn remove_entries(
        &self,
        identity: ObjectIdentityId,
        sid: SidId,
        mask: Permission,
        granting: bool,
        mode: RevokeMode,
    ) -> Result<MaskRemoval>;

    /// Delete one entry by id. Returns `false` if it did not exist.
    async fn delete_entry(&self, id: EntryId) -> Result<bool>;

    /// Delete every entry of an identity.
    async fn delete_entries_for_identity(&self, identity: ObjectIdentityId) -> Result<u64>;

    /// Delete every entry of a SID, across all identities.
    async fn delete_entries_for_sid(&self, sid: SidId) -> Result<u64>;

    /// Every entry, ascending by (identity, ace order).
    async fn list_entries(&self) -> Result<Vec<Entry>>;
}

/// Extension trait for common store patterns.
pub trait StoreExt: Store {
    /// Resolve SID keys to ids, silently skipping keys with no row.
    ///
    /// An actor whose role was never materialized simply has no entries.
    fn find_sid_ids(
        &self,
        keys: &[SidKey],
    ) -> impl std::future::Future<Output = Result<Vec<SidId>>> + Send;
}

impl<S: Store + ?Sized> StoreExt for S {
    async fn find_sid_ids(&self, keys: &[SidKey]) -> Result<Vec<SidId>> {
        let mut ids = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(sid) = self.find_sid(key.name.trim(), key.principal).await? {
                if !ids.contains(&sid.id) {
                    ids.push(sid.id);
                }
            }
        }
        Ok(ids)
    }
}
