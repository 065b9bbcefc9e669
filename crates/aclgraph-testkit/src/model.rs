//! A reference model of the engine.
//!
//! [`ReferenceModel`] keeps the whole ACL graph in plain vectors and
//! evaluates checks by walking parents directly. Property tests run the same
//! [`AclOp`] program against the model and a real [`PermissionService`] and
//! compare every outcome plus the final [`Snapshot`].

use std::collections::HashMap;

use aclgraph::PermissionService;
use aclgraph_core::{Permission, RevokeMode, SidKey};
use aclgraph_perms::AclError;
use aclgraph_store::Store;

use crate::generators::{object_key, AclOp, OBJECTS};

/// What an operation produced, reduced to what both sides can agree on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Checked(bool),
    Failed(&'static str),
}

impl<T> From<Result<T, AclError>> for Outcome {
    fn from(result: Result<T, AclError>) -> Self {
        match result {
            Ok(_) => Outcome::Done,
            Err(err) => Outcome::Failed(err.kind()),
        }
    }
}

/// One entry as the model sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEntry {
    pub sid: SidKey,
    pub mask: Permission,
    pub granting: bool,
    pub ace_order: u32,
}

/// One object as the model sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelObject {
    pub parent: Option<usize>,
    pub inheriting: bool,
    pub entries: Vec<ModelEntry>,
}

/// State of every object in the universe; `None` for objects never created.
pub type Snapshot = Vec<Option<ModelObject>>;

#[derive(Debug, Clone)]
struct Node {
    object: ModelObject,
    ace_order_hwm: u32,
}

/// In-memory reference implementation over the generator universe.
#[derive(Debug, Clone)]
pub struct ReferenceModel {
    objects: Vec<Option<Node>>,
    sids: Vec<SidKey>,
    revoke_mode: RevokeMode,
}

impl Default for ReferenceModel {
    fn default() -> Self {
        Self::new(RevokeMode::default())
    }
}

impl ReferenceModel {
    pub fn new(revoke_mode: RevokeMode) -> Self {
        Self {
            objects: vec![None; OBJECTS],
            sids: Vec::new(),
            revoke_mode,
        }
    }

    /// Apply one operation.
    pub fn apply(&mut self, op: &AclOp) -> Outcome {
        match op {
            AclOp::Grant { object, sid, mask } => self.add(*object, sid, *mask, true),
            AclOp::Deny { object, sid, mask } => self.add(*object, sid, *mask, false),
            AclOp::Revoke { object, sid, mask } => self.revoke(*object, sid, *mask),
            AclOp::SetParent { object, parent } => self.set_parent(*object, *parent),
            AclOp::SetInheriting { object, inheriting } => match self.node_mut(*object) {
                Some(node) => {
                    node.object.inheriting = *inheriting;
                    Outcome::Done
                }
                None => Outcome::Failed("not_found"),
            },
            AclOp::Check { object, sids, bit } => self.check(*object, sids, *bit),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.objects
            .iter()
            .map(|node| node.as_ref().map(|n| n.object.clone()))
            .collect()
    }

    fn node(&self, index: usize) -> Option<&Node> {
        self.objects.get(index).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, index: usize) -> Option<&mut Node> {
        self.objects.get_mut(index).and_then(Option::as_mut)
    }

    fn add(&mut self, object: usize, sid: &SidKey, mask: Permission, granting: bool) -> Outcome {
        if !self.sids.contains(sid) {
            self.sids.push(sid.clone());
        }
        let Some(slot) = self.objects.get_mut(object) else {
            return Outcome::Failed("not_found");
        };
        let node = slot.get_or_insert_with(|| Node {
            object: ModelObject {
                parent: None,
                inheriting: true,
                entries: Vec::new(),
            },
            ace_order_hwm: 0,
        });

        let exists = node
            .object
            .entries
            .iter()
            .any(|e| &e.sid == sid && e.mask == mask && e.granting == granting);
        if !exists {
            node.ace_order_hwm += 1;
            node.object.entries.push(ModelEntry {
                sid: sid.clone(),
                mask,
                granting,
                ace_order: node.ace_order_hwm,
            });
        }
        Outcome::Done
    }

    fn revoke(&mut self, object: usize, sid: &SidKey, mask: Permission) -> Outcome {
        if !self.sids.contains(sid) {
            return Outcome::Failed("not_found");
        }
        let mode = self.revoke_mode;
        let Some(node) = self.node_mut(object) else {
            return Outcome::Failed("not_found");
        };

        node.object.entries.retain_mut(|e| {
            if &e.sid != sid || !e.granting {
                return true;
            }
            match mode {
                RevokeMode::ExactMask => e.mask != mask,
                RevokeMode::ClearBits => {
                    e.mask = e.mask.without(mask);
                    !e.mask.is_empty()
                }
            }
        });
        Outcome::Done
    }

    fn set_parent(&mut self, object: usize, parent: Option<usize>) -> Outcome {
        if self.node(object).is_none() {
            return Outcome::Failed("not_found");
        }
        if let Some(parent) = parent {
            if self.node(parent).is_none() {
                return Outcome::Failed("not_found");
            }
            if parent == object {
                return Outcome::Failed("conflict");
            }
            let mut cursor = Some(parent);
            while let Some(current) = cursor {
                if current == object {
                    return Outcome::Failed("conflict");
                }
                cursor = self.node(current).and_then(|n| n.object.parent);
            }
        }
        if let Some(node) = self.node_mut(object) {
            node.object.parent = parent;
        }
        Outcome::Done
    }

    fn check(&self, object: usize, sids: &[SidKey], bit: Permission) -> Outcome {
        if self.objects.iter().all(Option::is_none) {
            return Outcome::Failed("not_found");
        }

        let mut cursor = Some(object);
        while let Some(current) = cursor {
            let Some(node) = self.node(current) else {
                return Outcome::Checked(false);
            };
            let decided = node
                .object
                .entries
                .iter()
                .find(|e| sids.contains(&e.sid) && e.mask.contains(bit));
            if let Some(entry) = decided {
                return Outcome::Checked(entry.granting);
            }
            cursor = if node.object.inheriting {
                node.object.parent
            } else {
                None
            };
        }
        Outcome::Checked(false)
    }
}

/// Apply one operation to a real service.
pub async fn apply_to_service<S: Store>(service: &PermissionService<S>, op: &AclOp) -> Outcome {
    match op {
        AclOp::Grant { object, sid, mask } => {
            service.grant(&object_key(*object), sid, *mask).await.into()
        }
        AclOp::Deny { object, sid, mask } => {
            service.deny(&object_key(*object), sid, *mask).await.into()
        }
        AclOp::Revoke { object, sid, mask } => {
            service.revoke(&object_key(*object), sid, *mask).await.into()
        }
        AclOp::SetParent { object, parent } => {
            let parent = parent.map(object_key);
            service
                .set_parent(&object_key(*object), parent.as_ref())
                .await
                .into()
        }
        AclOp::SetInheriting { object, inheriting } => service
            .set_entries_inheriting(&object_key(*object), *inheriting)
            .await
            .into(),
        AclOp::Check { object, sids, bit } => {
            match service.check(&object_key(*object), sids, *bit).await {
                Ok(allowed) => Outcome::Checked(allowed),
                Err(err) => Outcome::Failed(err.kind()),
            }
        }
    }
}

/// Read the service's state back in the model's shape.
pub async fn snapshot_service<S: Store>(
    service: &PermissionService<S>,
) -> Result<Snapshot, AclError> {
    let mut identities = Vec::with_capacity(OBJECTS);
    for index in 0..OBJECTS {
        identities.push(service.identities().find(&object_key(index)).await?);
    }
    let index_of: HashMap<_, _> = identities
        .iter()
        .enumerate()
        .filter_map(|(index, identity)| identity.as_ref().map(|i| (i.id, index)))
        .collect();

    let mut snapshot = Vec::with_capacity(OBJECTS);
    for identity in identities {
        let Some(identity) = identity else {
            snapshot.push(None);
            continue;
        };
        let mut entries = Vec::new();
        for entry in service.entries().list(identity.id).await? {
            let sid = service
                .sids()
                .get(entry.sid_id)
                .await?
                .ok_or_else(|| AclError::NotFound(format!("sid {}", entry.sid_id)))?;
            entries.push(ModelEntry {
                sid: sid.key(),
                mask: entry.mask,
                granting: entry.granting,
                ace_order: entry.ace_order,
            });
        }
        snapshot.push(Some(ModelObject {
            parent: identity.parent_id.and_then(|p| index_of.get(&p).copied()),
            inheriting: identity.entries_inheriting,
            entries,
        }));
    }
    Ok(snapshot)
}
