//! Proptest generators for property-based testing.
//!
//! Operations draw from a deliberately small universe (four objects, two
//! users, two roles, three permission bits) so that random programs hit
//! the same identities and SIDs often enough to be interesting.

use proptest::prelude::*;

use aclgraph_core::{ObjectKey, Permission, SidKey};

/// Class shared by every generated object.
pub const CLASS: &str = "Document";

/// Number of distinct objects in the universe.
pub const OBJECTS: usize = 4;

/// The bits generated masks are built from.
pub const BITS: [Permission; 3] = [Permission::READ, Permission::WRITE, Permission::DELETE];

/// Key of generated object `index`.
pub fn object_key(index: usize) -> ObjectKey {
    ObjectKey::new(CLASS, format!("obj-{index}"))
}

/// Every SID in the universe.
pub fn all_sids() -> Vec<SidKey> {
    vec![
        SidKey::principal("alice"),
        SidKey::principal("bob"),
        SidKey::role("EDITOR"),
        SidKey::role("VIEWER"),
    ]
}

/// Generate an object index.
pub fn object_index() -> impl Strategy<Value = usize> {
    0..OBJECTS
}

/// Generate one of the universe's SIDs.
pub fn sid_key() -> impl Strategy<Value = SidKey> {
    prop::sample::select(all_sids())
}

/// Generate a subset of the universe's SIDs, possibly empty.
pub fn sid_set() -> impl Strategy<Value = Vec<SidKey>> {
    prop::sample::subsequence(all_sids(), 0..=4)
}

/// Generate a single well-known bit.
pub fn permission_bit() -> impl Strategy<Value = Permission> {
    prop::sample::select(BITS.to_vec())
}

/// Generate a non-empty mask over [`BITS`].
pub fn permission_mask() -> impl Strategy<Value = Permission> {
    (1u32..8).prop_map(|selector| {
        BITS.iter()
            .enumerate()
            .filter(|(i, _)| selector & (1 << i) != 0)
            .fold(Permission::NONE, |acc, (_, bit)| acc | *bit)
    })
}

/// One mutation or query against the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclOp {
    Grant { object: usize, sid: SidKey, mask: Permission },
    Deny { object: usize, sid: SidKey, mask: Permission },
    Revoke { object: usize, sid: SidKey, mask: Permission },
    SetParent { object: usize, parent: Option<usize> },
    SetInheriting { object: usize, inheriting: bool },
    Check { object: usize, sids: Vec<SidKey>, bit: Permission },
}

impl Arbitrary for AclOp {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        prop_oneof![
            3 => (object_index(), sid_key(), permission_mask())
                .prop_map(|(object, sid, mask)| AclOp::Grant { object, sid, mask }),
            2 => (object_index(), sid_key(), permission_mask())
                .prop_map(|(object, sid, mask)| AclOp::Deny { object, sid, mask }),
            2 => (object_index(), sid_key(), permission_mask())
                .prop_map(|(object, sid, mask)| AclOp::Revoke { object, sid, mask }),
            2 => (object_index(), proptest::option::of(object_index()))
                .prop_map(|(object, parent)| AclOp::SetParent { object, parent }),
            1 => (object_index(), any::<bool>())
                .prop_map(|(object, inheriting)| AclOp::SetInheriting { object, inheriting }),
            4 => (object_index(), sid_set(), permission_bit())
                .prop_map(|(object, sids, bit)| AclOp::Check { object, sids, bit }),
        ]
        .boxed()
    }
}

/// Generate a program of up to `max_len` operations.
pub fn program(max_len: usize) -> impl Strategy<Value = Vec<AclOp>> {
    prop::collection::vec(any::<AclOp>(), 1..=max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_masks_are_non_empty(mask in permission_mask()) {
            prop_assert!(!mask.is_empty());
            prop_assert!(BITS.iter().fold(Permission::NONE, |a, b| a | *b).contains(mask));
        }

        #[test]
        fn test_bits_are_single(bit in permission_bit()) {
            prop_assert!(bit.is_single_bit());
        }

        #[test]
        fn test_ops_stay_in_universe(op: AclOp) {
            let object = match &op {
                AclOp::Grant { object, .. }
                | AclOp::Deny { object, .. }
                | AclOp::Revoke { object, .. }
                | AclOp::SetParent { object, .. }
                | AclOp::SetInheriting { object, .. }
                | AclOp::Check { object, .. } => *object,
            };
            prop_assert!(object < OBJECTS);
        }
    }
}
