//! Parent-link validation shared by the backends.

use std::collections::HashSet;

use aclgraph_core::ObjectIdentityId;

use crate::error::{Result, StoreError};

/// Check that linking `id` under `parent` keeps the parent graph acyclic
/// and the parent's chain within `max_depth` hops.
///
/// `parent_of` reads the stored parent link of a node; `None` means the
/// node does not exist. Backends call this inside the same transaction or
/// lock that writes the link.
pub(crate) fn check_link<F>(
    id: ObjectIdentityId,
    parent: ObjectIdentityId,
    max_depth: u32,
    mut parent_of: F,
) -> Result<()>
where
    F: FnMut(ObjectIdentityId) -> Result<Option<Option<ObjectIdentityId>>>,
{
    if parent == id {
        return Err(StoreError::Hierarchy(format!(
            "identity {} cannot be its own parent",
            id
        )));
    }

    let mut visited = HashSet::new();
    let mut cursor = Some(parent);
    while let Some(node) = cursor {
        if node == id {
            return Err(StoreError::Hierarchy(format!(
                "making {} the parent of {} would create a cycle",
                parent, id
            )));
        }
        if !visited.insert(node) || visited.len() > max_depth as usize {
            return Err(StoreError::Hierarchy(format!(
                "ancestor chain of {} is cyclic or deeper than {}",
                parent, max_depth
            )));
        }
        cursor = match parent_of(node)? {
            Some(next) => next,
            None if node == parent => {
                return Err(StoreError::DanglingReference(format!(
                    "parent identity {} does not exist",
                    parent
                )))
            }
            None => None,
        };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(
        links: &[(i64, Option<i64>)],
    ) -> impl FnMut(ObjectIdentityId) -> Result<Option<Option<ObjectIdentityId>>> {
        let links: HashMap<i64, Option<i64>> = links.iter().copied().collect();
        move |node| Ok(links.get(&node.0).map(|p| p.map(ObjectIdentityId)))
    }

    #[test]
    fn test_check_link() {
        let graph = [(1, None), (2, Some(1)), (3, Some(2))];
        let id = ObjectIdentityId;

        assert!(check_link(id(4), id(3), 64, lookup(&graph)).is_ok());
        assert!(matches!(
            check_link(id(1), id(3), 64, lookup(&graph)),
            Err(StoreError::Hierarchy(_))
        ));
        assert!(matches!(
            check_link(id(2), id(2), 64, lookup(&graph)),
            Err(StoreError::Hierarchy(_))
        ));
        assert!(matches!(
            check_link(id(1), id(9), 64, lookup(&graph)),
            Err(StoreError::DanglingReference(_))
        ));
        // Chain 3 -> 2 -> 1 has three nodes.
        assert!(matches!(
            check_link(id(4), id(3), 2, lookup(&graph)),
            Err(StoreError::Hierarchy(_))
        ));
    }
}
