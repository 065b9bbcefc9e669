//! Role SID synchronization.
//!
//! Applies committed role lifecycle events to the SID table: created roles
//! get a SID, renamed roles move to a fresh SID and lose the old one with
//! all of its entries, deleted roles lose their SID and entries.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use aclgraph_core::{validate_name, Sid};
use aclgraph_perms::{AclError, EntryStore, SidRegistry, DEFAULT_MAX_INSERT_ATTEMPTS};
use aclgraph_store::Store;

use crate::error::Result;
use crate::events::{RoleAction, RoleLifecycleEvent};
use crate::outbox::RoleEventReceiver;

/// A role SID removed by an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovedRole {
    pub sid: Sid,
    pub entries_removed: u64,
}

/// What one event changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    /// The SID ensured for the event's role, if the event keeps the role.
    pub ensured: Option<Sid>,
    /// The SID removed by a rename or deletion, if one existed.
    pub removed: Option<RemovedRole>,
}

/// Counters returned by the background worker when its channel closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub processed: u64,
    pub failed: u64,
}

/// Keeps role SIDs consistent with the external identity service.
pub struct RoleSidSynchronizer<S: Store> {
    sids: SidRegistry<S>,
    entries: EntryStore<S>,
    max_attempts: u32,
}

impl<S: Store> Clone for RoleSidSynchronizer<S> {
    fn clone(&self) -> Self {
        Self {
            sids: self.sids.clone(),
            entries: self.entries.clone(),
            max_attempts: self.max_attempts,
        }
    }
}

impl<S: Store> RoleSidSynchronizer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::from_parts(SidRegistry::new(Arc::clone(&store)), EntryStore::new(store))
    }

    pub fn from_parts(sids: SidRegistry<S>, entries: EntryStore<S>) -> Self {
        Self {
            sids,
            entries,
            max_attempts: DEFAULT_MAX_INSERT_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Apply one event, reporting failures to the caller.
    pub async fn handle(&self, event: &RoleLifecycleEvent) -> Result<SyncOutcome> {
        let role = validate_name(&event.role_name, "role name")?;

        let outcome = match event.action {
            RoleAction::Created => SyncOutcome {
                ensured: Some(self.sids.resolve(role, false).await?),
                removed: None,
            },
            RoleAction::Updated => {
                let ensured = self.sids.resolve(role, false).await?;
                let removed = match event.rename_source() {
                    Some(previous) => self.remove_role(previous).await?,
                    None => None,
                };
                SyncOutcome {
                    ensured: Some(ensured),
                    removed,
                }
            }
            RoleAction::Deleted => SyncOutcome {
                ensured: None,
                removed: self.remove_role(role).await?,
            },
        };

        debug!(
            action = %event.action,
            role,
            removed = outcome.removed.as_ref().map(|r| r.sid.sid.as_str()),
            "applied role event"
        );
        Ok(outcome)
    }

    /// Apply one event, logging and swallowing any failure.
    ///
    /// Returns `true` if the event applied cleanly.
    pub async fn on_event(&self, event: &RoleLifecycleEvent) -> bool {
        match self.handle(event).await {
            Ok(_) => true,
            Err(err) => {
                warn!(
                    action = %event.action,
                    role = %event.role_name,
                    previous = ?event.previous_role_name,
                    error = %err,
                    "role sid synchronization failed"
                );
                false
            }
        }
    }

    /// Drop the role SID for `name` and every entry it holds.
    ///
    /// A missing SID is a no-op. Entries granted concurrently between the
    /// cascade and the row delete are swept on the next attempt.
    async fn remove_role(&self, name: &str) -> Result<Option<RemovedRole>> {
        let Some(sid) = self.sids.find(name, false).await? else {
            return Ok(None);
        };

        let mut entries_removed = 0;
        let mut attempt = 1;
        loop {
            entries_removed += self.entries.remove_all_for_sid(sid.id).await?;
            match self.sids.delete(sid.id).await {
                Ok(_) => break,
                Err(AclError::Conflict(_)) if attempt < self.max_attempts => {
                    debug!(role = name, attempt, "role sid gained entries during delete, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(Some(RemovedRole {
            sid,
            entries_removed,
        }))
    }
}

impl<S: Store + 'static> RoleSidSynchronizer<S> {
    /// Run the synchronizer on its own task until every outbox is dropped.
    pub fn spawn(self, mut receiver: RoleEventReceiver) -> JoinHandle<SyncStats> {
        tokio::spawn(async move {
            let mut stats = SyncStats::default();
            while let Some(event) = receiver.recv().await {
                stats.processed += 1;
                if !self.on_event(&event).await {
                    stats.failed += 1;
                }
            }
            debug!(processed = stats.processed, failed = stats.failed, "role event worker stopped");
            stats
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::outbox;
    use aclgraph_core::{ObjectKey, Permission};
    use aclgraph_perms::{IdentityOptions, ObjectIdentityRegistry};
    use aclgraph_store::MemoryStore;

    struct Setup {
        sync: RoleSidSynchronizer<MemoryStore>,
        sids: SidRegistry<MemoryStore>,
        entries: EntryStore<MemoryStore>,
        identities: ObjectIdentityRegistry<MemoryStore>,
    }

    fn setup() -> Setup {
        let store = Arc::new(MemoryStore::new());
        let sids = SidRegistry::new(Arc::clone(&store));
        let entries = EntryStore::new(Arc::clone(&store));
        Setup {
            sync: RoleSidSynchronizer::from_parts(sids.clone(), entries.clone()),
            identities: ObjectIdentityRegistry::new(store),
            sids,
            entries,
        }
    }

    #[tokio::test]
    async fn test_created_ensures_role_sid() {
        let s = setup();
        let outcome = s
            .sync
            .handle(&RoleLifecycleEvent::created("  VIEWER "))
            .await
            .unwrap();
        let sid = outcome.ensured.unwrap();
        assert_eq!(sid.sid, "VIEWER");
        assert!(!sid.principal);

        // Replays are harmless.
        let again = s.sync.handle(&RoleLifecycleEvent::created("VIEWER")).await.unwrap();
        assert_eq!(again.ensured.unwrap().id, sid.id);
    }

    #[tokio::test]
    async fn test_rename_drops_old_role_and_entries() {
        let s = setup();
        let doc = s
            .identities
            .ensure(&ObjectKey::new("Document", "1"), IdentityOptions::default())
            .await
            .unwrap();
        let author = s.sids.resolve("AUTHOR", false).await.unwrap();
        s.entries.append(doc.id, author.id, Permission::WRITE, true).await.unwrap();

        let outcome = s
            .sync
            .handle(&RoleLifecycleEvent::renamed("AUTHOR", "EDITOR"))
            .await
            .unwrap();

        let removed = outcome.removed.unwrap();
        assert_eq!(removed.sid.id, author.id);
        assert_eq!(removed.entries_removed, 1);

        assert!(s.sids.find("AUTHOR", false).await.unwrap().is_none());
        let editor = s.sids.find("EDITOR", false).await.unwrap().unwrap();
        assert!(s
            .entries
            .find_by_sids_ordered(doc.id, &[editor.id])
            .await
            .unwrap()
            .is_empty());
        assert!(s.entries.list(doc.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_principal_with_same_name_survives() {
        let s = setup();
        let principal = s.sids.resolve("AUTHOR", true).await.unwrap();
        s.sids.resolve("AUTHOR", false).await.unwrap();

        s.sync.handle(&RoleLifecycleEvent::deleted("AUTHOR")).await.unwrap();

        assert_eq!(s.sids.find("AUTHOR", true).await.unwrap(), Some(principal));
        assert!(s.sids.find("AUTHOR", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deleting_unknown_role_is_noop() {
        let s = setup();
        let outcome = s.sync.handle(&RoleLifecycleEvent::deleted("GHOST")).await.unwrap();
        assert_eq!(outcome, SyncOutcome::default());
    }

    #[tokio::test]
    async fn test_blank_name() {
        let s = setup();
        let event = RoleLifecycleEvent::created("  ");
        assert!(matches!(
            s.sync.handle(&event).await,
            Err(SyncError::Validation(_))
        ));
        assert!(!s.sync.on_event(&event).await);
    }

    #[tokio::test]
    async fn test_worker_applies_only_committed_events() {
        let s = setup();
        let (outbox, receiver) = outbox::channel();
        let worker = s.sync.clone().spawn(receiver);

        let mut committed = outbox.begin();
        committed.push(RoleLifecycleEvent::created("EDITOR"));
        committed.push(RoleLifecycleEvent::created(""));
        committed.commit().unwrap();

        let mut rolled_back = outbox.begin();
        rolled_back.push(RoleLifecycleEvent::created("AUDITOR"));
        rolled_back.rollback();

        drop(outbox);
        let stats = worker.await.unwrap();
        assert_eq!(stats, SyncStats { processed: 2, failed: 1 });

        assert!(s.sids.find("EDITOR", false).await.unwrap().is_some());
        assert!(s.sids.find("AUDITOR", false).await.unwrap().is_none());
    }
}
