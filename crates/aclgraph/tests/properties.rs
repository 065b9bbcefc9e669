//! Behavioral properties of the engine, exercised end to end through the
//! PermissionService on both storage backends.

use std::sync::Arc;

use aclgraph::core::{ObjectKey, Permission, RevokeMode, SidKey};
use aclgraph::store::{MemoryStore, SqliteStore, Store};
use aclgraph::{AclConfig, AclError, Decision, InMemoryMetricsRecorder, PermissionService, RoleLifecycleEvent};

fn memory() -> PermissionService<MemoryStore> {
    PermissionService::new(MemoryStore::new(), AclConfig::default())
}

fn sqlite() -> PermissionService<SqliteStore> {
    PermissionService::new(SqliteStore::open_memory().unwrap(), AclConfig::default())
}

fn doc(id: &str) -> ObjectKey {
    ObjectKey::new("Document", id)
}

fn folder(id: &str) -> ObjectKey {
    ObjectKey::new("Folder", id)
}

/// Run an async property against a fresh service on each backend.
macro_rules! on_both_stores {
    ($name:ident, $body:ident) => {
        mod $name {
            use super::*;

            #[tokio::test]
            async fn memory_store() {
                $body(memory()).await;
            }

            #[tokio::test]
            async fn sqlite_store() {
                $body(sqlite()).await;
            }
        }
    };
}

// ─────────────────────────────────────────────────────────────────────────────
// Ordering: the first matching entry decides
// ─────────────────────────────────────────────────────────────────────────────

async fn deny_before_grant_denies<S: Store>(svc: PermissionService<S>) {
    let alice = SidKey::principal("alice");
    let deny = svc.deny(&doc("1"), &alice, Permission::READ).await.unwrap();
    let grant = svc.grant(&doc("1"), &alice, Permission::READ).await.unwrap();
    assert_eq!((deny.ace_order, grant.ace_order), (1, 2));

    assert!(!svc.check(&doc("1"), &[alice.clone()], Permission::READ).await.unwrap());

    let decision = svc.decide(&doc("1"), &[alice], Permission::READ).await.unwrap();
    assert!(matches!(decision, Decision::Denied { depth: 0, .. }));
    assert_eq!(decision.entry().map(|e| e.id), Some(deny.id));
}
on_both_stores!(first_match_wins, deny_before_grant_denies);

// ─────────────────────────────────────────────────────────────────────────────
// Idempotent grant
// ─────────────────────────────────────────────────────────────────────────────

async fn grant_twice_creates_one_entry<S: Store>(svc: PermissionService<S>) {
    let a = SidKey::principal("a");
    svc.grant(&doc("1"), &a, Permission::WRITE).await.unwrap();
    svc.grant(&doc("1"), &a, Permission::WRITE).await.unwrap();

    let entries = svc.list(&doc("1")).await.unwrap();
    let matching: Vec<_> = entries
        .iter()
        .filter(|e| e.granting && e.mask == Permission::WRITE)
        .collect();
    assert_eq!(matching.len(), 1);
    assert_eq!(entries.len(), 1);
}
on_both_stores!(idempotent_grant, grant_twice_creates_one_entry);

// ─────────────────────────────────────────────────────────────────────────────
// Inheritance
// ─────────────────────────────────────────────────────────────────────────────

async fn inheritance_follows_flag<S: Store>(svc: PermissionService<S>) {
    let editors = SidKey::role("EDITOR");
    svc.grant(&folder("F"), &editors, Permission::WRITE).await.unwrap();
    svc.ensure_identity(&doc("D"), Some(&folder("F")), true).await.unwrap();

    assert!(svc.check(&doc("D"), &[editors.clone()], Permission::WRITE).await.unwrap());

    svc.set_entries_inheriting(&doc("D"), false).await.unwrap();
    assert!(!svc.check(&doc("D"), &[editors], Permission::WRITE).await.unwrap());
}
on_both_stores!(inheritance, inheritance_follows_flag);

async fn local_entry_shadows_parent<S: Store>(svc: PermissionService<S>) {
    let bob = SidKey::principal("bob");
    svc.grant(&folder("F"), &bob, Permission::READ).await.unwrap();
    svc.ensure_identity(&doc("D"), Some(&folder("F")), true).await.unwrap();
    svc.deny(&doc("D"), &bob, Permission::READ).await.unwrap();

    assert!(!svc.check(&doc("D"), &[bob.clone()], Permission::READ).await.unwrap());
    // The parent itself is unaffected.
    assert!(svc.check(&folder("F"), &[bob], Permission::READ).await.unwrap());
}
on_both_stores!(local_deny_shadows_inherited_grant, local_entry_shadows_parent);

// ─────────────────────────────────────────────────────────────────────────────
// Revoke
// ─────────────────────────────────────────────────────────────────────────────

async fn revoke_without_ancestor_grant<S: Store>(svc: PermissionService<S>) {
    let a = SidKey::principal("a");
    svc.grant(&doc("1"), &a, Permission::READ).await.unwrap();
    assert_eq!(svc.revoke(&doc("1"), &a, Permission::READ).await.unwrap(), 1);
    assert!(!svc.check(&doc("1"), &[a], Permission::READ).await.unwrap());
}
on_both_stores!(revoke_removes_grant, revoke_without_ancestor_grant);

async fn revoke_with_ancestor_grant<S: Store>(svc: PermissionService<S>) {
    let a = SidKey::principal("a");
    svc.grant(&folder("F"), &a, Permission::READ).await.unwrap();
    svc.ensure_identity(&doc("1"), Some(&folder("F")), true).await.unwrap();
    svc.grant(&doc("1"), &a, Permission::READ).await.unwrap();

    svc.revoke(&doc("1"), &a, Permission::READ).await.unwrap();
    assert!(svc.check(&doc("1"), &[a], Permission::READ).await.unwrap());
}
on_both_stores!(revoke_keeps_inherited_grant, revoke_with_ancestor_grant);

async fn revoke_leaves_denies<S: Store>(svc: PermissionService<S>) {
    let a = SidKey::principal("a");
    svc.deny(&doc("1"), &a, Permission::READ).await.unwrap();
    assert_eq!(svc.revoke(&doc("1"), &a, Permission::READ).await.unwrap(), 0);
    assert_eq!(svc.list(&doc("1")).await.unwrap().len(), 1);
}
on_both_stores!(revoke_is_not_undeny, revoke_leaves_denies);

async fn revoke_unknowns_are_not_found<S: Store>(svc: PermissionService<S>) {
    let a = SidKey::principal("a");
    assert!(matches!(
        svc.revoke(&doc("1"), &a, Permission::READ).await,
        Err(AclError::NotFound(_))
    ));
    svc.grant(&doc("1"), &a, Permission::READ).await.unwrap();
    assert!(matches!(
        svc.revoke(&doc("1"), &SidKey::principal("nobody"), Permission::READ).await,
        Err(AclError::NotFound(_))
    ));
    assert!(matches!(
        svc.revoke(&doc("2"), &a, Permission::READ).await,
        Err(AclError::NotFound(_))
    ));
}
on_both_stores!(revoke_unknowns, revoke_unknowns_are_not_found);

// ─────────────────────────────────────────────────────────────────────────────
// Partial-bit revoke
// ─────────────────────────────────────────────────────────────────────────────

async fn partial_revoke_clears_bits<S: Store>(svc: PermissionService<S>) {
    let a = SidKey::principal("a");
    svc.grant(&doc("1"), &a, Permission::READ | Permission::WRITE).await.unwrap();

    assert_eq!(svc.revoke(&doc("1"), &a, Permission::READ).await.unwrap(), 1);
    assert!(!svc.check(&doc("1"), &[a.clone()], Permission::READ).await.unwrap());
    assert!(svc.check(&doc("1"), &[a.clone()], Permission::WRITE).await.unwrap());

    svc.revoke(&doc("1"), &a, Permission::WRITE).await.unwrap();
    assert!(svc.list(&doc("1")).await.unwrap().is_empty());
}
on_both_stores!(partial_revoke, partial_revoke_clears_bits);

#[tokio::test]
async fn exact_mask_revoke_leaves_wider_entries() {
    let config = AclConfig {
        revoke_mode: RevokeMode::ExactMask,
        ..AclConfig::default()
    };
    let svc = PermissionService::new(MemoryStore::new(), config);
    let a = SidKey::principal("a");
    svc.grant(&doc("1"), &a, Permission::READ | Permission::WRITE).await.unwrap();

    assert_eq!(svc.revoke(&doc("1"), &a, Permission::READ).await.unwrap(), 0);
    assert!(svc.check(&doc("1"), &[a.clone()], Permission::READ).await.unwrap());

    assert_eq!(
        svc.revoke(&doc("1"), &a, Permission::READ | Permission::WRITE).await.unwrap(),
        1
    );
    assert!(!svc.check(&doc("1"), &[a], Permission::READ).await.unwrap());
}

// ─────────────────────────────────────────────────────────────────────────────
// Deleting ACLs
// ─────────────────────────────────────────────────────────────────────────────

async fn delete_acl_requires_no_children<S: Store>(svc: PermissionService<S>) {
    let a = SidKey::principal("a");
    svc.grant(&folder("P"), &a, Permission::READ).await.unwrap();
    svc.grant(&folder("P"), &a, Permission::WRITE).await.unwrap();
    svc.ensure_identity(&doc("C"), Some(&folder("P")), true).await.unwrap();

    assert!(matches!(
        svc.delete_acl(&folder("P")).await,
        Err(AclError::Conflict(_))
    ));
    assert_eq!(svc.list(&folder("P")).await.unwrap().len(), 2);

    svc.set_parent(&doc("C"), None).await.unwrap();
    assert_eq!(svc.delete_acl(&folder("P")).await.unwrap(), 2);

    assert!(matches!(
        svc.list(&folder("P")).await,
        Err(AclError::NotFound(_))
    ));
    assert!(matches!(
        svc.delete_acl(&folder("P")).await,
        Err(AclError::NotFound(_))
    ));
}
on_both_stores!(delete_acl, delete_acl_requires_no_children);

async fn set_parent_rejects_cycles<S: Store>(svc: PermissionService<S>) {
    svc.ensure_identity(&folder("A"), None, true).await.unwrap();
    svc.ensure_identity(&folder("B"), Some(&folder("A")), true).await.unwrap();
    svc.ensure_identity(&folder("C"), Some(&folder("B")), true).await.unwrap();

    assert!(matches!(
        svc.set_parent(&folder("A"), Some(&folder("C"))).await,
        Err(AclError::Conflict(_))
    ));
    assert!(matches!(
        svc.set_parent(&folder("A"), Some(&folder("A"))).await,
        Err(AclError::Conflict(_))
    ));
}
on_both_stores!(cycles, set_parent_rejects_cycles);

// ─────────────────────────────────────────────────────────────────────────────
// Role rename
// ─────────────────────────────────────────────────────────────────────────────

async fn rename_drops_old_role<S: Store>(svc: PermissionService<S>) {
    let author = SidKey::role("AUTHOR");
    svc.grant(&doc("1"), &author, Permission::WRITE).await.unwrap();
    svc.grant(&doc("2"), &author, Permission::READ).await.unwrap();

    let outcome = svc
        .synchronizer()
        .handle(&RoleLifecycleEvent::renamed("AUTHOR", "EDITOR"))
        .await
        .unwrap();
    assert_eq!(outcome.removed.map(|r| r.entries_removed), Some(2));

    assert!(svc.sids().find("AUTHOR", false).await.unwrap().is_none());
    let editor = svc.sids().find("EDITOR", false).await.unwrap().unwrap();
    for id in ["1", "2"] {
        let entries = svc.list(&doc(id)).await.unwrap();
        assert!(entries.is_empty());
        assert!(entries.iter().all(|e| e.sid_id != editor.id));
    }
    assert!(!svc
        .check(&doc("1"), &[author, SidKey::role("EDITOR")], Permission::WRITE)
        .await
        .unwrap());
}
on_both_stores!(role_rename, rename_drops_old_role);

#[tokio::test]
async fn committed_role_events_reach_the_worker() {
    let svc = memory();
    svc.grant(&doc("1"), &SidKey::role("AUTHOR"), Permission::WRITE).await.unwrap();

    let (outbox, worker) = svc.start_role_sync();

    let mut failed_tx = outbox.begin();
    failed_tx.push(RoleLifecycleEvent::deleted("AUTHOR"));
    failed_tx.rollback();

    let mut tx = outbox.begin();
    tx.push(RoleLifecycleEvent::created("REVIEWER"));
    tx.commit().unwrap();

    drop(outbox);
    let stats = worker.await.unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 0);

    // The rolled-back deletion never ran.
    assert_eq!(svc.list(&doc("1")).await.unwrap().len(), 1);
    assert!(svc.sids().find("REVIEWER", false).await.unwrap().is_some());
}

// ─────────────────────────────────────────────────────────────────────────────
// Metrics
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn mutations_report_metrics() {
    let metrics = Arc::new(InMemoryMetricsRecorder::new());
    let svc = memory().with_metrics(metrics.clone());
    let a = SidKey::principal("a");

    svc.grant(&doc("1"), &a, Permission::READ).await.unwrap();
    svc.revoke(&doc("1"), &a, Permission::READ).await.unwrap();
    svc.list(&doc("1")).await.unwrap();
    svc.delete_acl(&doc("1")).await.unwrap();
    let _ = svc.delete_acl(&doc("1")).await;

    let actions: Vec<String> = metrics.samples().into_iter().map(|s| s.action).collect();
    assert_eq!(actions, vec!["grant", "revoke", "list", "delete", "delete"]);
    assert_eq!(metrics.for_action("delete")[1].affected, 0);
}
