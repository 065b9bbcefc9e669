//! Writes [`PolicyDescriptor`]s into the ACL tables.
//!
//! Each descriptor becomes one object identity (class = domain, external id
//! = `__root__` or `domain:component`) carrying one granting role entry per
//! role. Seeding is idempotent: an entry with the same role and mask is
//! left alone.

use std::sync::Arc;

use tracing::{debug, info};

use aclgraph_core::{ObjectIdentity, ObjectKey, Permission};
use aclgraph_perms::{EntryStore, IdentityOptions, ObjectIdentityRegistry, Result, SidRegistry};
use aclgraph_store::Store;

use crate::policy::{normalize_segment, PolicyAction, PolicyDescriptor, ROOT_IDENTITY};

/// What one [`PolicySeeder::apply`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Entries created. Entries already present are not counted.
    pub created: u64,
    /// Roles skipped for a blank name or an empty mask.
    pub skipped_roles: u64,
}

/// Where a descriptor's entries live.
pub fn descriptor_key(descriptor: &PolicyDescriptor) -> Option<ObjectKey> {
    let domain = normalize_segment(&descriptor.domain)?;
    let external_id = match descriptor.component.as_deref().and_then(normalize_segment) {
        Some(component) => format!("{}:{}", domain, component),
        None => ROOT_IDENTITY.to_owned(),
    };
    Some(ObjectKey::new(domain, external_id))
}

/// Applies descriptors through the registries.
pub struct PolicySeeder<S: Store> {
    sids: SidRegistry<S>,
    identities: ObjectIdentityRegistry<S>,
    entries: EntryStore<S>,
}

impl<S: Store> PolicySeeder<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::from_parts(
            SidRegistry::new(Arc::clone(&store)),
            ObjectIdentityRegistry::new(Arc::clone(&store)),
            EntryStore::new(store),
        )
    }

    pub fn from_parts(
        sids: SidRegistry<S>,
        identities: ObjectIdentityRegistry<S>,
        entries: EntryStore<S>,
    ) -> Self {
        Self {
            sids,
            identities,
            entries,
        }
    }

    /// Seed one descriptor. A blank domain is a no-op.
    pub async fn apply(&self, descriptor: &PolicyDescriptor) -> Result<SeedReport> {
        let mut report = SeedReport::default();
        let Some(key) = descriptor_key(descriptor) else {
            debug!(domain = %descriptor.domain, "policy descriptor has no usable domain, skipped");
            return Ok(report);
        };

        let identity = self.identities.ensure(&key, IdentityOptions::default()).await?;
        for role in &descriptor.roles {
            let name = role.role.trim();
            let mask = PolicyAction::mask_of(&role.actions);
            if name.is_empty() || mask == Permission::NONE {
                report.skipped_roles += 1;
                continue;
            }
            if self.seed_role(&identity, &key, &name.to_uppercase(), mask).await? {
                report.created += 1;
            }
        }
        Ok(report)
    }

    async fn seed_role(
        &self,
        identity: &ObjectIdentity,
        key: &ObjectKey,
        role: &str,
        mask: Permission,
    ) -> Result<bool> {
        let sid = self.sids.resolve(role, false).await?;
        let outcome = self
            .entries
            .append_if_absent(identity.id, sid.id, mask, true)
            .await?;
        if outcome.created() {
            info!(object = %key, role, mask = %mask, "seeded acl entry");
        }
        Ok(outcome.created())
    }
}
