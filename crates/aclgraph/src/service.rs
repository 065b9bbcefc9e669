//! The PermissionService: unified API over the ACL graph.
//!
//! Callers address objects by [`ObjectKey`] and actors by [`SidKey`]. The
//! service creates identities and SIDs lazily on first grant, keeps grants
//! idempotent, reports every mutation to a [`MetricsRecorder`], and tells a
//! [`RefreshListener`] whenever stored data changed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use aclgraph_core::{
    validate_mask, AclClass, Entry, EntryId, ObjectIdentity, ObjectKey, Permission, Sid, SidKey,
};
use aclgraph_perms::{
    AclError, Decision, EntryStore, IdentityOptions, ObjectIdentityRegistry, PermissionResolver,
    Result, SidRegistry,
};
use aclgraph_store::{SqliteStore, Store};
use aclgraph_sync::{outbox, RoleEventOutbox, RoleSidSynchronizer, SyncStats};

use crate::config::AclConfig;
use crate::metrics::{MetricsRecorder, NoopMetricsRecorder};
use crate::policy::{aggregate, DomainPolicy, PolicyDescriptor, PolicyRow, ResourceMapper};
use crate::refresh::{NoopRefreshListener, RefreshListener};
use crate::seed::PolicySeeder;

/// The main service struct.
///
/// Provides a unified API for:
/// - Granting, denying and revoking permissions
/// - Checking permissions against the inheritance chain
/// - Administering identities (parent, inheritance, owner) and entries
/// - Listing classes, SIDs, identities and entries for admin surfaces
/// - Seeding role policies and reading them back per domain
/// - Wiring the role SID synchronizer
pub struct PermissionService<S: Store> {
    store: Arc<S>,
    sids: SidRegistry<S>,
    identities: ObjectIdentityRegistry<S>,
    entries: EntryStore<S>,
    resolver: PermissionResolver<S>,
    metrics: Arc<dyn MetricsRecorder>,
    refresh: Arc<dyn RefreshListener>,
    config: AclConfig,
}

impl<S: Store> Clone for PermissionService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            sids: self.sids.clone(),
            identities: self.identities.clone(),
            entries: self.entries.clone(),
            resolver: self.resolver.clone(),
            metrics: Arc::clone(&self.metrics),
            refresh: Arc::clone(&self.refresh),
            config: self.config.clone(),
        }
    }
}

impl PermissionService<SqliteStore> {
    /// Open the SQLite database named by `config.database_path`, or an
    /// in-memory one if unset.
    pub fn open(config: AclConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let store = match &config.database_path {
            Some(path) => SqliteStore::open(path)
                .with_context(|| format!("failed to open acl database {}", path.display()))?,
            None => SqliteStore::open_memory().context("failed to open in-memory acl database")?,
        };
        Ok(Self::new(store, config))
    }
}

impl<S: Store> PermissionService<S> {
    /// Create a service that owns `store`.
    pub fn new(store: S, config: AclConfig) -> Self {
        Self::with_store(Arc::new(store), config)
    }

    /// Create a service over a shared store.
    pub fn with_store(store: Arc<S>, config: AclConfig) -> Self {
        let sids = SidRegistry::new(Arc::clone(&store)).with_max_attempts(config.max_insert_attempts);
        let identities = ObjectIdentityRegistry::new(Arc::clone(&store))
            .with_max_attempts(config.max_insert_attempts)
            .with_max_depth(config.max_chain_depth);
        let entries =
            EntryStore::new(Arc::clone(&store)).with_max_attempts(config.max_insert_attempts);
        let resolver =
            PermissionResolver::new(Arc::clone(&store), identities.clone(), entries.clone());

        Self {
            store,
            sids,
            identities,
            entries,
            resolver,
            metrics: Arc::new(NoopMetricsRecorder),
            refresh: Arc::new(NoopRefreshListener),
            config,
        }
    }

    /// Replace the metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replace the listener told about committed changes.
    pub fn with_refresh_listener(mut self, refresh: Arc<dyn RefreshListener>) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &AclConfig {
        &self.config
    }

    pub fn sids(&self) -> &SidRegistry<S> {
        &self.sids
    }

    pub fn identities(&self) -> &ObjectIdentityRegistry<S> {
        &self.identities
    }

    pub fn entries(&self) -> &EntryStore<S> {
        &self.entries
    }

    pub fn resolver(&self) -> &PermissionResolver<S> {
        &self.resolver
    }

    /// A synchronizer sharing this service's store and limits.
    pub fn synchronizer(&self) -> RoleSidSynchronizer<S> {
        RoleSidSynchronizer::from_parts(self.sids.clone(), self.entries.clone())
            .with_max_attempts(self.config.max_insert_attempts)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Grant / Deny / Revoke
    // ─────────────────────────────────────────────────────────────────────────

    /// Grant `mask` to `sid` on `object`.
    ///
    /// Creates the identity and SID if needed. An existing identical
    /// granting entry is returned unchanged.
    pub async fn grant(&self, object: &ObjectKey, sid: &SidKey, mask: Permission) -> Result<Entry> {
        let started = Instant::now();
        let result = self.add_entry(object, sid, mask, true).await;
        self.record("grant", started, &result, |(_, created)| u64::from(*created));

        let (entry, created) = result?;
        if created {
            self.audit("grant", object, Some(sid), mask, 1);
            self.refresh.refresh("grant");
        }
        Ok(entry)
    }

    /// Add an explicit deny of `mask` for `sid` on `object`.
    ///
    /// Same idempotency as [`grant`](Self::grant), with `granting = false`.
    pub async fn deny(&self, object: &ObjectKey, sid: &SidKey, mask: Permission) -> Result<Entry> {
        let started = Instant::now();
        let result = self.add_entry(object, sid, mask, false).await;
        self.record("deny", started, &result, |(_, created)| u64::from(*created));

        let (entry, created) = result?;
        if created {
            self.audit("deny", object, Some(sid), mask, 1);
            self.refresh.refresh("deny");
        }
        Ok(entry)
    }

    /// Remove granting entries for `mask`. Deny entries are left alone.
    ///
    /// Returns the number of entries deleted or narrowed. The object, its
    /// class and the SID must exist.
    pub async fn revoke(&self, object: &ObjectKey, sid: &SidKey, mask: Permission) -> Result<u64> {
        let started = Instant::now();
        let result = self.remove_grants(object, sid, &[mask]).await;
        self.record("revoke", started, &result, |count| *count);

        let count = result?;
        self.audit("revoke", object, Some(sid), mask, count);
        self.refresh_if("revoke", count);
        Ok(count)
    }

    /// Grant several masks at once. Masks already granted are skipped.
    ///
    /// Returns the entries created, in ace order.
    pub async fn grant_all(
        &self,
        object: &ObjectKey,
        sid: &SidKey,
        masks: &[Permission],
    ) -> Result<Vec<Entry>> {
        let started = Instant::now();
        let result = self.add_entries(object, sid, masks).await;
        self.record("bulk_grant", started, &result, |created| created.len() as u64);

        let created = result?;
        if !created.is_empty() {
            let combined = created.iter().fold(Permission::NONE, |acc, e| acc | e.mask);
            self.audit("bulk_grant", object, Some(sid), combined, created.len() as u64);
            self.refresh.refresh("bulk_grant");
        }
        Ok(created)
    }

    /// Revoke several masks at once.
    pub async fn revoke_all(
        &self,
        object: &ObjectKey,
        sid: &SidKey,
        masks: &[Permission],
    ) -> Result<u64> {
        let started = Instant::now();
        let result = self.remove_grants(object, sid, masks).await;
        self.record("bulk_revoke", started, &result, |count| *count);

        let count = result?;
        let combined = masks.iter().fold(Permission::NONE, |acc, m| acc | *m);
        self.audit("bulk_revoke", object, Some(sid), combined, count);
        self.refresh_if("bulk_revoke", count);
        Ok(count)
    }

    async fn add_entry(
        &self,
        object: &ObjectKey,
        sid: &SidKey,
        mask: Permission,
        granting: bool,
    ) -> Result<(Entry, bool)> {
        let mask = validate_mask(mask)?;
        let identity = self.identities.ensure(object, IdentityOptions::default()).await?;
        let sid = self.sids.resolve_key(sid).await?;

        let outcome = self
            .entries
            .append_if_absent(identity.id, sid.id, mask, granting)
            .await?;
        let created = outcome.created();
        if !created {
            debug!(object = %object, sid = %sid.sid, mask = %mask, granting, "entry already present");
        }
        Ok((outcome.into_entry(), created))
    }

    async fn add_entries(
        &self,
        object: &ObjectKey,
        sid: &SidKey,
        masks: &[Permission],
    ) -> Result<Vec<Entry>> {
        let mut requested: Vec<Permission> = Vec::with_capacity(masks.len());
        for mask in masks {
            let mask = validate_mask(*mask)?;
            if !requested.contains(&mask) {
                requested.push(mask);
            }
        }
        if requested.is_empty() {
            return Ok(Vec::new());
        }

        let identity = self.identities.ensure(object, IdentityOptions::default()).await?;
        let sid = self.sids.resolve_key(sid).await?;

        let mut created = Vec::new();
        for mask in requested {
            let outcome = self
                .entries
                .append_if_absent(identity.id, sid.id, mask, true)
                .await?;
            if outcome.created() {
                created.push(outcome.into_entry());
            }
        }
        Ok(created)
    }

    async fn remove_grants(
        &self,
        object: &ObjectKey,
        sid: &SidKey,
        masks: &[Permission],
    ) -> Result<u64> {
        for mask in masks {
            validate_mask(*mask)?;
        }
        let identity = self.identities.require(object).await?;
        let sid = self.sids.require(sid).await?;

        let mut affected = 0;
        for mask in masks {
            let removal = self
                .entries
                .remove_matching(identity.id, sid.id, *mask, true, self.config.revoke_mode)
                .await?;
            affected += removal.affected();
        }
        Ok(affected)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Evaluation
    // ─────────────────────────────────────────────────────────────────────────

    /// True if any of `sids` holds `bit` on `object`.
    ///
    /// An unknown class is [`AclError::NotFound`]. An unknown object or
    /// unknown SIDs are simply `false`.
    pub async fn check(&self, object: &ObjectKey, sids: &[SidKey], bit: Permission) -> Result<bool> {
        Ok(self.decide(object, sids, bit).await?.is_allowed())
    }

    /// Like [`check`](Self::check), with the deciding entry.
    pub async fn decide(
        &self,
        object: &ObjectKey,
        sids: &[SidKey],
        bit: Permission,
    ) -> Result<Decision> {
        self.resolver.decide_for(object, sids, bit).await
    }

    /// Entries of `object` in ace order.
    pub async fn list(&self, object: &ObjectKey) -> Result<Vec<Entry>> {
        let started = Instant::now();
        let result = match self.identities.require(object).await {
            Ok(identity) => self.entries.list(identity.id).await,
            Err(err) => Err(err),
        };
        self.record("list", started, &result, |entries| entries.len() as u64);
        result
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Administration
    // ─────────────────────────────────────────────────────────────────────────

    /// Create an identity up front, e.g. to link it under a parent before
    /// anything is granted on it. Returns an existing identity unchanged.
    pub async fn ensure_identity(
        &self,
        object: &ObjectKey,
        parent: Option<&ObjectKey>,
        entries_inheriting: bool,
    ) -> Result<ObjectIdentity> {
        let started = Instant::now();
        let result = async {
            let mut options = IdentityOptions::default().inheriting(entries_inheriting);
            if let Some(parent) = parent {
                options = options.with_parent(self.identities.require(parent).await?.id);
            }
            self.identities.ensure_tracked(object, options).await
        }
        .await;
        self.record("ensure", started, &result, |(_, created)| u64::from(*created));
        result.map(|(identity, _)| identity)
    }

    /// Delete the identity of `object` and all of its entries.
    ///
    /// Fails with [`AclError::Conflict`] while other identities name it as
    /// parent. Returns the number of entries removed.
    pub async fn delete_acl(&self, object: &ObjectKey) -> Result<u64> {
        let started = Instant::now();
        let result = match self.identities.require(object).await {
            Ok(identity) => self.identities.delete(identity.id).await,
            Err(err) => Err(err),
        };
        self.record("delete", started, &result, |_| 1);

        let removed = result?;
        self.audit("delete", object, None, Permission::NONE, removed);
        self.refresh.refresh("delete");
        Ok(removed)
    }

    /// Remove every entry of `object`, keeping the identity and its links.
    pub async fn clear_acl(&self, object: &ObjectKey) -> Result<u64> {
        let started = Instant::now();
        let result = match self.identities.require(object).await {
            Ok(identity) => self.entries.remove_all_for_identity(identity.id).await,
            Err(err) => Err(err),
        };
        self.record("clear", started, &result, |count| *count);

        let removed = result?;
        self.audit("clear", object, None, Permission::NONE, removed);
        self.refresh_if("clear", removed);
        Ok(removed)
    }

    /// Link `object` under `parent`, or detach it with `None`.
    pub async fn set_parent(
        &self,
        object: &ObjectKey,
        parent: Option<&ObjectKey>,
    ) -> Result<ObjectIdentity> {
        let started = Instant::now();
        let result = async {
            let identity = self.identities.require(object).await?;
            let parent_id = match parent {
                Some(parent) => Some(self.identities.require(parent).await?.id),
                None => None,
            };
            self.identities.set_parent(identity.id, parent_id).await
        }
        .await;
        self.record("set_parent", started, &result, |_| 1);

        let identity = result?;
        self.audit("set_parent", object, None, Permission::NONE, 1);
        self.refresh.refresh("set_parent");
        Ok(identity)
    }

    /// Turn inheritance from the parent on or off for `object`.
    pub async fn set_entries_inheriting(
        &self,
        object: &ObjectKey,
        entries_inheriting: bool,
    ) -> Result<ObjectIdentity> {
        let started = Instant::now();
        let result = async {
            let identity = self.identities.require(object).await?;
            self.identities
                .set_entries_inheriting(identity.id, entries_inheriting)
                .await
        }
        .await;
        self.record("set_inheriting", started, &result, |_| 1);

        let identity = result?;
        self.audit("set_inheriting", object, None, Permission::NONE, 1);
        self.refresh.refresh("set_inheriting");
        Ok(identity)
    }

    /// Change or clear the owner of `object`. The owner SID is created if
    /// needed.
    pub async fn set_owner(
        &self,
        object: &ObjectKey,
        owner: Option<&SidKey>,
    ) -> Result<ObjectIdentity> {
        let started = Instant::now();
        let result = async {
            let identity = self.identities.require(object).await?;
            let owner_id = match owner {
                Some(owner) => Some(self.sids.resolve_key(owner).await?.id),
                None => None,
            };
            self.identities.set_owner(identity.id, owner_id).await
        }
        .await;
        self.record("set_owner", started, &result, |_| 1);

        let identity = result?;
        self.audit("set_owner", object, owner, Permission::NONE, 1);
        self.refresh.refresh("set_owner");
        Ok(identity)
    }

    /// Place an entry at an explicit ace order on an existing identity.
    pub async fn insert_entry_at(
        &self,
        object: &ObjectKey,
        sid: &SidKey,
        mask: Permission,
        granting: bool,
        ace_order: i64,
    ) -> Result<Entry> {
        let started = Instant::now();
        let result = async {
            let identity = self.identities.require(object).await?;
            let sid = self.sids.resolve_key(sid).await?;
            self.entries
                .insert_at(identity.id, sid.id, mask, granting, ace_order)
                .await
        }
        .await;
        self.record("insert_entry", started, &result, |_| 1);

        let entry = result?;
        self.audit("insert_entry", object, Some(sid), mask, 1);
        self.refresh.refresh("insert_entry");
        Ok(entry)
    }

    /// Delete one entry by id.
    pub async fn delete_entry(&self, id: EntryId) -> Result<()> {
        let started = Instant::now();
        let result = match self.entries.delete(id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AclError::NotFound(format!("entry {}", id))),
            Err(err) => Err(err),
        };
        self.record("delete_entry", started, &result, |_| 1);

        result?;
        if self.config.audit_enabled {
            info!(target: "aclgraph::audit", action = "delete_entry", entry = %id, "acl change");
        }
        self.refresh.refresh("delete_entry");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Listing
    // ─────────────────────────────────────────────────────────────────────────

    /// Every class, ascending by id.
    pub async fn list_classes(&self) -> Result<Vec<AclClass>> {
        self.identities.list_classes().await
    }

    /// Every SID, ascending by id.
    pub async fn list_sids(&self) -> Result<Vec<Sid>> {
        self.sids.list().await
    }

    /// Every object identity, ascending by id.
    pub async fn list_object_identities(&self) -> Result<Vec<ObjectIdentity>> {
        self.identities.list().await
    }

    /// Every entry, grouped by identity in ace order.
    pub async fn list_entries(&self) -> Result<Vec<Entry>> {
        self.entries.list_all().await
    }

    /// Delete a class no identity belongs to.
    ///
    /// Fails with [`AclError::Conflict`] while identities still use it.
    /// Returns `false` if the class did not exist.
    pub async fn delete_class(&self, class_name: &str) -> Result<bool> {
        let started = Instant::now();
        let result = self.identities.delete_class(class_name).await;
        self.record("delete_class", started, &result, |deleted| u64::from(*deleted));

        let deleted = result?;
        if deleted {
            if self.config.audit_enabled {
                info!(target: "aclgraph::audit", action = "delete_class", class = class_name, "acl change");
            }
            self.refresh.refresh("delete_class");
        }
        Ok(deleted)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Policies
    // ─────────────────────────────────────────────────────────────────────────

    /// Seed one role policy descriptor. Returns the entries created.
    pub async fn sync_policy(&self, descriptor: &PolicyDescriptor) -> Result<u64> {
        self.sync_policies(std::slice::from_ref(descriptor)).await
    }

    /// Seed several descriptors, then notify the refresh listener once.
    ///
    /// An empty list does nothing. Returns the entries created.
    pub async fn sync_policies(&self, descriptors: &[PolicyDescriptor]) -> Result<u64> {
        if descriptors.is_empty() {
            return Ok(0);
        }
        let started = Instant::now();
        let result = async {
            let seeder = PolicySeeder::from_parts(
                self.sids.clone(),
                self.identities.clone(),
                self.entries.clone(),
            );
            let mut created = 0;
            for descriptor in descriptors {
                created += seeder.apply(descriptor).await?.created;
            }
            Ok::<_, AclError>(created)
        }
        .await;
        self.record("policy_sync", started, &result, |_| descriptors.len() as u64);

        let created = result?;
        if self.config.audit_enabled {
            info!(
                target: "aclgraph::audit",
                action = "policy_sync",
                descriptors = descriptors.len(),
                count = created,
                "acl change"
            );
        }
        self.refresh.refresh("policy_sync");
        Ok(created)
    }

    /// Seed the descriptors listed under `policies` in the configuration.
    pub async fn sync_configured_policies(&self) -> Result<u64> {
        self.sync_policies(&self.config.policies).await
    }

    /// Stored granting role entries folded into one policy per domain.
    ///
    /// Domains are mapped through the configured `domain_aliases`.
    pub async fn domain_policies(&self) -> Result<BTreeMap<String, DomainPolicy>> {
        let mapper = self
            .config
            .domain_aliases
            .iter()
            .fold(ResourceMapper::new(), |mapper, (from, to)| mapper.with_alias(from, to.clone()));
        self.domain_policies_with(&mapper).await
    }

    /// [`domain_policies`](Self::domain_policies) with an explicit mapper.
    pub async fn domain_policies_with(
        &self,
        mapper: &ResourceMapper,
    ) -> Result<BTreeMap<String, DomainPolicy>> {
        let classes: BTreeMap<_, _> = self
            .list_classes()
            .await?
            .into_iter()
            .map(|class| (class.id, class.class_name))
            .collect();
        let identities: BTreeMap<_, _> = self
            .list_object_identities()
            .await?
            .into_iter()
            .map(|identity| (identity.id, identity))
            .collect();
        let sids: BTreeMap<_, _> = self
            .list_sids()
            .await?
            .into_iter()
            .map(|sid| (sid.id, sid))
            .collect();

        let rows = self.list_entries().await?.into_iter().filter_map(|entry| {
            let identity = identities.get(&entry.object_identity_id)?;
            let sid = sids.get(&entry.sid_id)?;
            Some(PolicyRow {
                class_name: classes.get(&identity.class_id)?.clone(),
                external_id: identity.external_id.clone(),
                sid: sid.sid.clone(),
                principal: sid.principal,
                mask: entry.mask,
                granting: entry.granting,
            })
        });
        Ok(aggregate(rows, mapper))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn record<T>(
        &self,
        action: &str,
        started: Instant,
        result: &Result<T>,
        affected: impl FnOnce(&T) -> u64,
    ) {
        let count = match result {
            Ok(value) => affected(value),
            Err(_) => 0,
        };
        self.metrics.record(action, started.elapsed(), count);
    }

    fn refresh_if(&self, action: &str, count: u64) {
        if count > 0 {
            self.refresh.refresh(action);
        }
    }

    fn audit(
        &self,
        action: &str,
        object: &ObjectKey,
        sid: Option<&SidKey>,
        mask: Permission,
        count: u64,
    ) {
        if !self.config.audit_enabled {
            return;
        }
        let sid = sid.map(ToString::to_string).unwrap_or_else(|| "-".to_owned());
        info!(
            target: "aclgraph::audit",
            action,
            object = %object,
            sid = %sid,
            mask = %mask,
            count,
            "acl change"
        );
    }
}

impl<S: Store + 'static> PermissionService<S> {
    /// Start the role synchronizer on its own task.
    ///
    /// Returns the outbox the identity service pushes committed role events
    /// into, and the worker handle that yields [`SyncStats`] once every
    /// outbox clone is dropped.
    pub fn start_role_sync(&self) -> (RoleEventOutbox, JoinHandle<SyncStats>) {
        let (outbox, receiver) = outbox::channel();
        let worker = self.synchronizer().spawn(receiver);
        (outbox, worker)
    }
}
