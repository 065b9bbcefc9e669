//! Strong type definitions for ACL records.
//!
//! Row identifiers are newtypes so an entry id can never be passed where a
//! SID id is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::permission::Permission;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Primary key of an [`AclClass`] row.
    ClassId
);
row_id!(
    /// Primary key of an [`ObjectIdentity`] row.
    ObjectIdentityId
);
row_id!(
    /// Primary key of a [`Sid`] row.
    SidId
);
row_id!(
    /// Primary key of an [`Entry`] row.
    EntryId
);

/// Logical domain type name, e.g. `"Document"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclClass {
    pub id: ClassId,
    pub class_name: String,
}

/// The ACL graph node for one securable domain object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectIdentity {
    pub id: ObjectIdentityId,
    pub class_id: ClassId,
    pub external_id: String,
    pub parent_id: Option<ObjectIdentityId>,
    pub owner_sid_id: Option<SidId>,
    /// Whether resolution continues to `parent_id` when no local entry matches.
    pub entries_inheriting: bool,
}

/// A principal (user) or a role/authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sid {
    pub id: SidId,
    pub principal: bool,
    pub sid: String,
}

impl Sid {
    /// The lookup key for this row.
    pub fn key(&self) -> SidKey {
        SidKey {
            name: self.sid.clone(),
            principal: self.principal,
        }
    }
}

/// One access control entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub object_identity_id: ObjectIdentityId,
    pub sid_id: SidId,
    /// Evaluation position on its identity. Lower values are evaluated first.
    pub ace_order: u32,
    pub mask: Permission,
    pub granting: bool,
    pub audit_success: bool,
    pub audit_failure: bool,
}

/// Caller-facing address of an object identity: (class name, external id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub class_name: String,
    pub external_id: String,
}

impl ObjectKey {
    pub fn new(class_name: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            external_id: external_id.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class_name, self.external_id)
    }
}

/// Caller-facing address of a SID: (name, principal flag).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SidKey {
    pub name: String,
    pub principal: bool,
}

impl SidKey {
    /// A named user.
    pub fn principal(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            principal: true,
        }
    }

    /// A role or granted authority.
    pub fn role(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            principal: false,
        }
    }
}

impl fmt::Display for SidKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.principal {
            write!(f, "principal:{}", self.name)
        } else {
            write!(f, "role:{}", self.name)
        }
    }
}
