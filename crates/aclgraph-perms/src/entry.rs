//! Ordered access control entries.

use std::sync::Arc;

use tracing::debug;

use aclgraph_core::{
    validate_ace_order, validate_mask, Entry, EntryId, ObjectIdentityId, Permission, RevokeMode,
    SidId,
};
use aclgraph_store::{EntryAppend, EntryDraft, InsertResult, MaskRemoval, NewEntry, Store};

use crate::error::{AclError, Result};
use crate::sid::DEFAULT_MAX_INSERT_ATTEMPTS;

/// Audit flags carried on an entry. Stored only; the resolver ignores them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditFlags {
    pub success: bool,
    pub failure: bool,
}

/// Entry persistence with ace order maintenance.
pub struct EntryStore<S: Store> {
    store: Arc<S>,
    max_attempts: u32,
}

impl<S: Store> Clone for EntryStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            max_attempts: self.max_attempts,
        }
    }
}

impl<S: Store> EntryStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_INSERT_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Append an entry after every existing one on `identity`.
    pub async fn append(
        &self,
        identity: ObjectIdentityId,
        sid: SidId,
        mask: Permission,
        granting: bool,
    ) -> Result<Entry> {
        self.append_audited(identity, sid, mask, granting, AuditFlags::default())
            .await
    }

    /// [`append`](Self::append) with explicit audit flags.
    ///
    /// Orders come from the store's per-identity allocator. If an
    /// administratively placed entry already holds the allocated order, a
    /// fresh one is drawn.
    pub async fn append_audited(
        &self,
        identity: ObjectIdentityId,
        sid: SidId,
        mask: Permission,
        granting: bool,
        audit: AuditFlags,
    ) -> Result<Entry> {
        let mask = validate_mask(mask)?;

        for attempt in 1..=self.max_attempts {
            let ace_order = self.store.next_ace_order(identity).await?;
            let new = NewEntry {
                object_identity_id: identity,
                sid_id: sid,
                ace_order,
                mask,
                granting,
                audit_success: audit.success,
                audit_failure: audit.failure,
            };
            match self.store.insert_entry(&new).await? {
                InsertResult::Inserted(entry) => {
                    debug!(
                        identity = %identity,
                        sid = %sid,
                        ace_order,
                        mask = %mask,
                        granting,
                        "appended entry"
                    );
                    return Ok(entry);
                }
                InsertResult::AlreadyExists => {
                    debug!(identity = %identity, ace_order, attempt, "ace order taken, retrying");
                }
            }
        }

        Err(AclError::Conflict(format!(
            "could not allocate an ace order on identity {} after {} attempts",
            identity, self.max_attempts
        )))
    }

    /// Append an entry unless one with the same (sid, mask, granting) is
    /// already stored on `identity`.
    ///
    /// The lookup and the append are one store operation, so concurrent
    /// identical calls leave a single entry.
    pub async fn append_if_absent(
        &self,
        identity: ObjectIdentityId,
        sid: SidId,
        mask: Permission,
        granting: bool,
    ) -> Result<EntryAppend> {
        let mask = validate_mask(mask)?;
        let draft = EntryDraft {
            object_identity_id: identity,
            sid_id: sid,
            mask,
            granting,
            audit_success: false,
            audit_failure: false,
        };
        let outcome = self.store.append_entry_if_absent(&draft).await?;
        if let EntryAppend::Created(entry) = &outcome {
            debug!(
                identity = %identity,
                sid = %sid,
                ace_order = entry.ace_order,
                mask = %mask,
                granting,
                "appended entry"
            );
        }
        Ok(outcome)
    }

    /// Place an entry at an explicit ace order.
    ///
    /// A negative order is a validation error; an occupied one a conflict.
    pub async fn insert_at(
        &self,
        identity: ObjectIdentityId,
        sid: SidId,
        mask: Permission,
        granting: bool,
        ace_order: i64,
    ) -> Result<Entry> {
        let mask = validate_mask(mask)?;
        let ace_order = validate_ace_order(ace_order)?;

        let new = NewEntry {
            object_identity_id: identity,
            sid_id: sid,
            ace_order,
            mask,
            granting,
            audit_success: false,
            audit_failure: false,
        };
        match self.store.insert_entry(&new).await? {
            InsertResult::Inserted(entry) => {
                debug!(identity = %identity, sid = %sid, ace_order, "placed entry");
                Ok(entry)
            }
            InsertResult::AlreadyExists => Err(AclError::Conflict(format!(
                "ace order {} is already used on identity {}",
                ace_order, identity
            ))),
        }
    }

    /// Entries of `identity` held by any of `sids`, ascending by ace order.
    pub async fn find_by_sids_ordered(
        &self,
        identity: ObjectIdentityId,
        sids: &[SidId],
    ) -> Result<Vec<Entry>> {
        Ok(self.store.entries_for_sids(identity, sids).await?)
    }

    /// All entries of `identity`, ascending by ace order.
    pub async fn list(&self, identity: ObjectIdentityId) -> Result<Vec<Entry>> {
        Ok(self.store.entries_for_identity(identity).await?)
    }

    /// Every stored entry, ascending by (identity, ace order).
    pub async fn list_all(&self) -> Result<Vec<Entry>> {
        Ok(self.store.list_entries().await?)
    }

    /// Take `mask` away from the (sid, granting) entries of `identity`.
    pub async fn remove_matching(
        &self,
        identity: ObjectIdentityId,
        sid: SidId,
        mask: Permission,
        granting: bool,
        mode: RevokeMode,
    ) -> Result<MaskRemoval> {
        let mask = validate_mask(mask)?;
        let removal = self
            .store
            .remove_entries(identity, sid, mask, granting, mode)
            .await?;
        debug!(
            identity = %identity,
            sid = %sid,
            mask = %mask,
            ?mode,
            deleted = removal.deleted,
            narrowed = removal.narrowed,
            "removed matching entries"
        );
        Ok(removal)
    }

    /// Drop every entry of an identity.
    pub async fn remove_all_for_identity(&self, identity: ObjectIdentityId) -> Result<u64> {
        Ok(self.store.delete_entries_for_identity(identity).await?)
    }

    /// Drop every entry of a SID across all identities.
    pub async fn remove_all_for_sid(&self, sid: SidId) -> Result<u64> {
        Ok(self.store.delete_entries_for_sid(sid).await?)
    }

    /// Delete a single entry. Returns `false` if it did not exist.
    pub async fn delete(&self, id: EntryId) -> Result<bool> {
        Ok(self.store.delete_entry(id).await?)
    }
}
