//! Permission resolution.
//!
//! Read-only: the resolver walks the ancestor chain of an identity and lets
//! the first matching entry decide. It holds no cache, so any number of
//! tasks may call it concurrently.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use aclgraph_core::{validate_single_bit, Entry, ObjectIdentity, ObjectKey, Permission, SidId, SidKey};
use aclgraph_store::{Store, StoreExt};

use crate::entry::EntryStore;
use crate::error::{AclError, Result};
use crate::identity::ObjectIdentityRegistry;

/// Outcome of a resolution, with the evidence behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Decision {
    /// A granting entry matched first. `depth` 0 is the identity itself.
    Allowed { entry: Entry, depth: usize },
    /// A non-granting entry matched first.
    Denied { entry: Entry, depth: usize },
    /// Nothing on the chain matched.
    DefaultDenied,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// The entry that decided, if any.
    pub fn entry(&self) -> Option<&Entry> {
        match self {
            Decision::Allowed { entry, .. } | Decision::Denied { entry, .. } => Some(entry),
            Decision::DefaultDenied => None,
        }
    }
}

/// Computes allow/deny for a set of SIDs against an identity.
pub struct PermissionResolver<S: Store> {
    store: Arc<S>,
    identities: ObjectIdentityRegistry<S>,
    entries: EntryStore<S>,
}

impl<S: Store> Clone for PermissionResolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            identities: self.identities.clone(),
            entries: self.entries.clone(),
        }
    }
}

impl<S: Store> PermissionResolver<S> {
    pub fn new(
        store: Arc<S>,
        identities: ObjectIdentityRegistry<S>,
        entries: EntryStore<S>,
    ) -> Self {
        Self {
            store,
            identities,
            entries,
        }
    }

    /// True if `sids` hold `bit` on `identity`.
    pub async fn check(
        &self,
        identity: &ObjectIdentity,
        sids: &[SidId],
        bit: Permission,
    ) -> Result<bool> {
        Ok(self.decide(identity, sids, bit).await?.is_allowed())
    }

    /// Resolve `bit` for `sids` on `identity`.
    ///
    /// Each node of the ancestor chain is searched in ace order; the first
    /// entry whose mask carries `bit` decides. An exhausted chain denies.
    pub async fn decide(
        &self,
        identity: &ObjectIdentity,
        sids: &[SidId],
        bit: Permission,
    ) -> Result<Decision> {
        let bit = validate_single_bit(bit)?;
        if sids.is_empty() {
            return Ok(Decision::DefaultDenied);
        }

        let chain = self.identities.ancestor_chain(identity).await?;
        for (depth, node) in chain.iter().enumerate() {
            let entries = self.entries.find_by_sids_ordered(node.id, sids).await?;
            if let Some(entry) = entries.into_iter().find(|e| e.mask.contains(bit)) {
                trace!(
                    identity = %identity.id,
                    node = %node.id,
                    depth,
                    ace_order = entry.ace_order,
                    granting = entry.granting,
                    "entry decided"
                );
                return Ok(if entry.granting {
                    Decision::Allowed { entry, depth }
                } else {
                    Decision::Denied { entry, depth }
                });
            }
        }

        Ok(Decision::DefaultDenied)
    }

    /// Resolve by caller-facing keys.
    ///
    /// An unknown class is [`AclError::NotFound`]. An unknown object or SIDs
    /// that were never materialized simply deny.
    pub async fn decide_for(
        &self,
        key: &ObjectKey,
        sids: &[SidKey],
        bit: Permission,
    ) -> Result<Decision> {
        let bit = validate_single_bit(bit)?;
        if self.identities.find_class(&key.class_name).await?.is_none() {
            return Err(AclError::NotFound(format!("class {}", key.class_name)));
        }
        let Some(identity) = self.identities.find(key).await? else {
            return Ok(Decision::DefaultDenied);
        };
        let sid_ids = self.store.find_sid_ids(sids).await?;
        self.decide(&identity, &sid_ids, bit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityOptions;
    use crate::sid::SidRegistry;
    use aclgraph_core::ValidationError;
    use aclgraph_store::MemoryStore;

    struct Setup {
        resolver: PermissionResolver<MemoryStore>,
        identities: ObjectIdentityRegistry<MemoryStore>,
        entries: EntryStore<MemoryStore>,
        sids: SidRegistry<MemoryStore>,
    }

    fn setup() -> Setup {
        let store = Arc::new(MemoryStore::new());
        let identities = ObjectIdentityRegistry::new(Arc::clone(&store));
        let entries = EntryStore::new(Arc::clone(&store));
        let sids = SidRegistry::new(Arc::clone(&store));
        Setup {
            resolver: PermissionResolver::new(store, identities.clone(), entries.clone()),
            identities,
            entries,
            sids,
        }
    }

    #[tokio::test]
    async fn test_first_matching_entry_wins() {
        let s = setup();
        let doc = s
            .identities
            .ensure(&ObjectKey::new("Document", "1"), IdentityOptions::default())
            .await
            .unwrap();
        let alice = s.sids.resolve("alice", true).await.unwrap();

        s.entries.append(doc.id, alice.id, Permission::READ, false).await.unwrap();
        s.entries.append(doc.id, alice.id, Permission::READ, true).await.unwrap();

        let decision = s.resolver.decide(&doc, &[alice.id], Permission::READ).await.unwrap();
        assert!(matches!(decision, Decision::Denied { depth: 0, .. }));
        assert_eq!(decision.entry().map(|e| e.ace_order), Some(1));
    }

    #[tokio::test]
    async fn test_entry_without_bit_is_skipped() {
        let s = setup();
        let doc = s
            .identities
            .ensure(&ObjectKey::new("Document", "1"), IdentityOptions::default())
            .await
            .unwrap();
        let alice = s.sids.resolve("alice", true).await.unwrap();

        s.entries.append(doc.id, alice.id, Permission::WRITE, false).await.unwrap();
        s.entries
            .append(doc.id, alice.id, Permission::READ | Permission::WRITE, true)
            .await
            .unwrap();

        assert!(s.resolver.check(&doc, &[alice.id], Permission::READ).await.unwrap());
        assert!(!s.resolver.check(&doc, &[alice.id], Permission::WRITE).await.unwrap());
    }

    #[tokio::test]
    async fn test_inherited_decision_reports_depth() {
        let s = setup();
        let folder = s
            .identities
            .ensure(&ObjectKey::new("Folder", "f"), IdentityOptions::default())
            .await
            .unwrap();
        let doc = s
            .identities
            .ensure(
                &ObjectKey::new("Document", "1"),
                IdentityOptions::default().with_parent(folder.id),
            )
            .await
            .unwrap();
        let editors = s.sids.resolve("EDITOR", false).await.unwrap();
        s.entries.append(folder.id, editors.id, Permission::WRITE, true).await.unwrap();

        let decision = s
            .resolver
            .decide(&doc, &[editors.id], Permission::WRITE)
            .await
            .unwrap();
        assert!(matches!(decision, Decision::Allowed { depth: 1, .. }));
    }

    #[tokio::test]
    async fn test_empty_sids_and_bad_bits() {
        let s = setup();
        let doc = s
            .identities
            .ensure(&ObjectKey::new("Document", "1"), IdentityOptions::default())
            .await
            .unwrap();

        assert_eq!(
            s.resolver.decide(&doc, &[], Permission::READ).await.unwrap(),
            Decision::DefaultDenied
        );

        let err = s
            .resolver
            .check(&doc, &[], Permission::READ | Permission::WRITE)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AclError::Validation(ValidationError::NotSingleBit(3))
        ));
    }

    #[tokio::test]
    async fn test_decide_for_unknowns() {
        let s = setup();
        s.identities.ensure_class("Document").await.unwrap();

        let missing_class = s
            .resolver
            .decide_for(&ObjectKey::new("Ghost", "1"), &[SidKey::principal("a")], Permission::READ)
            .await
            .unwrap_err();
        assert!(matches!(missing_class, AclError::NotFound(_)));

        let missing_object = s
            .resolver
            .decide_for(
                &ObjectKey::new("Document", "404"),
                &[SidKey::principal("a")],
                Permission::READ,
            )
            .await
            .unwrap();
        assert_eq!(missing_object, Decision::DefaultDenied);
    }

    proptest::proptest! {
        #[test]
        fn single_grant_allows_exactly_its_bits(bits in 1u32.., bit_index in 0u32..32) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let mask = Permission::from_bits(bits);
            let bit = Permission::bit(bit_index);

            let decision = rt.block_on(async {
                let s = setup();
                let doc = s
                    .identities
                    .ensure(&ObjectKey::new("Document", "1"), IdentityOptions::default())
                    .await
                    .unwrap();
                let alice = s.sids.resolve("alice", true).await.unwrap();
                s.entries.append(doc.id, alice.id, mask, true).await.unwrap();
                s.resolver.decide(&doc, &[alice.id], bit).await.unwrap()
            });

            proptest::prop_assert_eq!(decision.is_allowed(), mask.contains(bit));
        }
    }
}
