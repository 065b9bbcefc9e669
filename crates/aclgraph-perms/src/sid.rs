//! Security identifier registry.

use std::sync::Arc;

use tracing::debug;

use aclgraph_core::{validate_name, Sid, SidId, SidKey};
use aclgraph_store::{InsertResult, Store};

use crate::error::{AclError, Result};

/// Default number of insert-then-fetch rounds before a creation race is
/// reported as a conflict.
pub const DEFAULT_MAX_INSERT_ATTEMPTS: u32 = 3;

/// Idempotent creation and lookup of principal and role SIDs.
pub struct SidRegistry<S: Store> {
    store: Arc<S>,
    max_attempts: u32,
}

impl<S: Store> Clone for SidRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            max_attempts: self.max_attempts,
        }
    }
}

impl<S: Store> SidRegistry<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_INSERT_ATTEMPTS,
        }
    }

    /// Bound the insert-then-fetch loop used by [`resolve`](Self::resolve).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Return the SID for `(name, principal)`, creating it if needed.
    ///
    /// The name is trimmed. Concurrent callers racing on the same key all
    /// receive the same row.
    pub async fn resolve(&self, name: &str, principal: bool) -> Result<Sid> {
        let name = validate_name(name, "sid")?;

        for attempt in 1..=self.max_attempts {
            if let Some(sid) = self.store.find_sid(name, principal).await? {
                return Ok(sid);
            }
            match self.store.insert_sid(name, principal).await? {
                InsertResult::Inserted(sid) => {
                    debug!(sid = %sid.sid, principal, id = %sid.id, "created sid");
                    return Ok(sid);
                }
                InsertResult::AlreadyExists => {
                    debug!(sid = name, principal, attempt, "lost sid creation race, re-reading");
                }
            }
        }

        // One last read: the winner may have committed after our final insert.
        self.store
            .find_sid(name, principal)
            .await?
            .ok_or_else(|| {
                AclError::Conflict(format!(
                    "could not create sid {} after {} attempts",
                    SidKey { name: name.to_owned(), principal },
                    self.max_attempts
                ))
            })
    }

    /// Resolve a caller-supplied key.
    pub async fn resolve_key(&self, key: &SidKey) -> Result<Sid> {
        self.resolve(&key.name, key.principal).await
    }

    /// Look up a SID without creating it.
    pub async fn find(&self, name: &str, principal: bool) -> Result<Option<Sid>> {
        let name = validate_name(name, "sid")?;
        Ok(self.store.find_sid(name, principal).await?)
    }

    /// Look up a SID that must exist.
    pub async fn require(&self, key: &SidKey) -> Result<Sid> {
        self.find(&key.name, key.principal)
            .await?
            .ok_or_else(|| AclError::NotFound(format!("sid {}", key.name.trim())))
    }

    /// Get a SID by id.
    pub async fn get(&self, id: SidId) -> Result<Option<Sid>> {
        Ok(self.store.get_sid(id).await?)
    }

    /// Every SID, ascending by id.
    pub async fn list(&self) -> Result<Vec<Sid>> {
        Ok(self.store.list_sids().await?)
    }

    /// Delete a SID row.
    ///
    /// Entries are not cascaded here: a SID that still has entries is a
    /// [`AclError::Conflict`]. Identities it owned lose their owner.
    /// Returns `false` if the row did not exist.
    pub async fn delete(&self, id: SidId) -> Result<bool> {
        let deleted = self.store.delete_sid(id).await?;
        if deleted {
            debug!(id = %id, "deleted sid");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aclgraph_core::ValidationError;
    use aclgraph_store::MemoryStore;

    fn registry() -> SidRegistry<MemoryStore> {
        SidRegistry::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent_and_trims() {
        let sids = registry();
        let a = sids.resolve("EDITOR", false).await.unwrap();
        let b = sids.resolve("  EDITOR  ", false).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(b.sid, "EDITOR");

        let principal = sids.resolve("EDITOR", true).await.unwrap();
        assert_ne!(principal.id, a.id);
    }

    #[tokio::test]
    async fn test_resolve_rejects_blank() {
        let err = registry().resolve("   ", true).await.unwrap_err();
        assert!(matches!(
            err,
            AclError::Validation(ValidationError::BlankName { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_resolve_yields_one_row() {
        let sids = registry();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let sids = sids.clone();
            handles.push(tokio::spawn(async move {
                sids.resolve("AUTHOR", false).await.unwrap()
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn test_require_missing_is_not_found() {
        let err = registry()
            .require(&SidKey::principal("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, AclError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete() {
        let sids = registry();
        let sid = sids.resolve("alice", true).await.unwrap();
        assert!(sids.delete(sid.id).await.unwrap());
        assert!(!sids.delete(sid.id).await.unwrap());
        assert!(sids.find("alice", true).await.unwrap().is_none());
    }
}
