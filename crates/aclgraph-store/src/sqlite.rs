//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior,
};

use aclgraph_core::{
    AclClass, ClassId, Entry, EntryId, ObjectIdentity, ObjectIdentityId, Permission, RevokeMode,
    Sid, SidId,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::hierarchy::check_link;
use crate::traits::{
    EntryAppend, EntryDraft, InsertResult, MaskRemoval, NewEntry, NewObjectIdentity, Store,
};

/// SQLite-based store implementation.
///
/// One connection behind a mutex; every call runs on the blocking pool.
/// Each statement (or explicit transaction) commits before the lock is
/// released, so readers never observe a half-written row.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Task(format!("connection mutex poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}

/// Which constraint a failed statement tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Violation {
    Unique,
    ForeignKey,
}

fn violation(err: &rusqlite::Error) -> Option<Violation> {
    match err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            match e.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => Some(Violation::Unique),
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => Some(Violation::ForeignKey),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Map an insert failure: unique violations become `AlreadyExists`.
fn insert_outcome<T>(
    result: rusqlite::Result<T>,
    what: impl FnOnce() -> String,
) -> Result<InsertResult<T>> {
    match result {
        Ok(row) => Ok(InsertResult::Inserted(row)),
        Err(e) => match violation(&e) {
            Some(Violation::Unique) => Ok(InsertResult::AlreadyExists),
            Some(Violation::ForeignKey) => Err(StoreError::DanglingReference(what())),
            None => Err(e.into()),
        },
    }
}

fn column_u32(row: &Row<'_>, idx: usize) -> rusqlite::Result<u32> {
    let value: i64 = row.get(idx)?;
    u32::try_from(value).map_err(|_| {
        rusqlite::Error::IntegralValueOutOfRange(idx, value)
    })
}

const SID_COLUMNS: &str = "id, principal, sid";

fn row_to_sid(row: &Row<'_>) -> rusqlite::Result<Sid> {
    Ok(Sid {
        id: SidId(row.get(0)?),
        principal: row.get(1)?,
        sid: row.get(2)?,
    })
}

const IDENTITY_COLUMNS: &str =
    "id, class_id, external_id, parent_id, owner_sid_id, entries_inheriting";

fn row_to_identity(row: &Row<'_>) -> rusqlite::Result<ObjectIdentity> {
    Ok(ObjectIdentity {
        id: ObjectIdentityId(row.get(0)?),
        class_id: ClassId(row.get(1)?),
        external_id: row.get(2)?,
        parent_id: row.get::<_, Option<i64>>(3)?.map(ObjectIdentityId),
        owner_sid_id: row.get::<_, Option<i64>>(4)?.map(SidId),
        entries_inheriting: row.get(5)?,
    })
}

const ENTRY_COLUMNS: &str = "id, object_identity_id, sid_id, ace_order, mask, granting, \
                             audit_success, audit_failure";

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<Entry> {
    Ok(Entry {
        id: EntryId(row.get(0)?),
        object_identity_id: ObjectIdentityId(row.get(1)?),
        sid_id: SidId(row.get(2)?),
        ace_order: column_u32(row, 3)?,
        mask: Permission::from_bits(column_u32(row, 4)?),
        granting: row.get(5)?,
        audit_success: row.get(6)?,
        audit_failure: row.get(7)?,
    })
}

fn row_to_class(row: &Row<'_>) -> rusqlite::Result<AclClass> {
    Ok(AclClass {
        id: ClassId(row.get(0)?),
        class_name: row.get(1)?,
    })
}

fn query_all<T>(
    conn: &Connection,
    sql: &str,
    map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], map)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Raise the identity's high-water mark past every existing order and
/// return it.
fn bump_ace_order(conn: &Connection, id: ObjectIdentityId) -> Result<u32> {
    let order: Option<i64> = conn
        .query_row(
            "UPDATE acl_object_identity
             SET ace_order_hwm = MAX(
                 ace_order_hwm,
                 (SELECT COALESCE(MAX(ace_order), 0) FROM acl_entry
                  WHERE object_identity_id = ?1)
             ) + 1
             WHERE id = ?1
             RETURNING ace_order_hwm",
            params![id.0],
            |row| row.get(0),
        )
        .optional()?;
    let order = order.ok_or_else(|| StoreError::NotFound(format!("identity {}", id)))?;
    u32::try_from(order)
        .map_err(|_| StoreError::InvalidData(format!("ace order {} out of range", order)))
}

fn insert_entry_row(conn: &Connection, new: &NewEntry) -> Result<InsertResult<Entry>> {
    let result = conn
        .execute(
            "INSERT INTO acl_entry (
                object_identity_id, sid_id, ace_order, mask, granting,
                audit_success, audit_failure
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new.object_identity_id.0,
                new.sid_id.0,
                new.ace_order as i64,
                new.mask.bits() as i64,
                new.granting,
                new.audit_success,
                new.audit_failure,
            ],
        )
        .map(|_| Entry {
            id: EntryId(conn.last_insert_rowid()),
            object_identity_id: new.object_identity_id,
            sid_id: new.sid_id,
            ace_order: new.ace_order,
            mask: new.mask,
            granting: new.granting,
            audit_success: new.audit_success,
            audit_failure: new.audit_failure,
        });
    insert_outcome(result, || {
        format!(
            "entry references identity {} or sid {} which does not exist",
            new.object_identity_id, new.sid_id
        )
    })
}

fn find_entry_row(
    conn: &Connection,
    identity: ObjectIdentityId,
    sid: SidId,
    mask: Permission,
    granting: bool,
) -> Result<Option<Entry>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM acl_entry
             WHERE object_identity_id = ?1 AND sid_id = ?2 AND mask = ?3 AND granting = ?4
             ORDER BY ace_order LIMIT 1",
            ENTRY_COLUMNS
        ),
        params![identity.0, sid.0, mask.bits() as i64, granting],
        row_to_entry,
    )
    .optional()
    .map_err(StoreError::from)
}

#[async_trait]
impl Store for SqliteStore {
    async fn find_class(&self, class_name: &str) -> Result<Option<AclClass>> {
        let class_name = class_name.to_owned();
        self.call(move |conn| {
            conn.query_row(
                "SELECT id, class_name FROM acl_class WHERE class_name = ?1",
                params![class_name],
                row_to_class,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn insert_class(&self, class_name: &str) -> Result<InsertResult<AclClass>> {
        let class_name = class_name.to_owned();
        self.call(move |conn| {
            let result = conn
                .execute(
                    "INSERT INTO acl_class (class_name) VALUES (?1)",
                    params![class_name],
                )
                .map(|_| AclClass {
                    id: ClassId(conn.last_insert_rowid()),
                    class_name: class_name.clone(),
                });
            insert_outcome(result, || format!("class {}", class_name))
        })
        .await
    }

    async fn list_classes(&self) -> Result<Vec<AclClass>> {
        self.call(|conn| {
            query_all(conn, "SELECT id, class_name FROM acl_class ORDER BY id", row_to_class)
        })
        .await
    }

    async fn delete_class(&self, id: ClassId) -> Result<bool> {
        self.call(move |conn| {
            let tx = conn.transaction()?;

            let members: i64 = tx.query_row(
                "SELECT COUNT(*) FROM acl_object_identity WHERE class_id = ?1",
                params![id.0],
                |row| row.get(0),
            )?;
            if members > 0 {
                return Err(StoreError::StillReferenced(format!(
                    "class {} has {} identities",
                    id, members
                )));
            }

            let deleted = tx.execute("DELETE FROM acl_class WHERE id = ?1", params![id.0])?;
            tx.commit()?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn find_sid(&self, name: &str, principal: bool) -> Result<Option<Sid>> {
        let name = name.to_owned();
        self.call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM acl_sid WHERE sid = ?1 AND principal = ?2",
                    SID_COLUMNS
                ),
                params![name, principal],
                row_to_sid,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_sid(&self, id: SidId) -> Result<Option<Sid>> {
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM acl_sid WHERE id = ?1", SID_COLUMNS),
                params![id.0],
                row_to_sid,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn insert_sid(&self, name: &str, principal: bool) -> Result<InsertResult<Sid>> {
        let name = name.to_owned();
        self.call(move |conn| {
            let result = conn
                .execute(
                    "INSERT INTO acl_sid (sid, principal) VALUES (?1, ?2)",
                    params![name, principal],
                )
                .map(|_| Sid {
                    id: SidId(conn.last_insert_rowid()),
                    principal,
                    sid: name.clone(),
                });
            insert_outcome(result, || format!("sid {}", name))
        })
        .await
    }

    async fn list_sids(&self) -> Result<Vec<Sid>> {
        self.call(|conn| {
            query_all(
                conn,
                &format!("SELECT {} FROM acl_sid ORDER BY id", SID_COLUMNS),
                row_to_sid,
            )
        })
        .await
    }

    async fn delete_sid(&self, id: SidId) -> Result<bool> {
        self.call(move |conn| {
            let tx = conn.transaction()?;

            let referencing: i64 = tx.query_row(
                "SELECT COUNT(*) FROM acl_entry WHERE sid_id = ?1",
                params![id.0],
                |row| row.get(0),
            )?;
            if referencing > 0 {
                return Err(StoreError::StillReferenced(format!(
                    "sid {} has {} entries",
                    id, referencing
                )));
            }

            tx.execute(
                "UPDATE acl_object_identity SET owner_sid_id = NULL WHERE owner_sid_id = ?1",
                params![id.0],
            )?;
            let deleted = tx.execute("DELETE FROM acl_sid WHERE id = ?1", params![id.0])?;
            tx.commit()?;

            Ok(deleted > 0)
        })
        .await
    }

    async fn find_object_identity(
        &self,
        class_id: ClassId,
        external_id: &str,
    ) -> Result<Option<ObjectIdentity>> {
        let external_id = external_id.to_owned();
        self.call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM acl_object_identity WHERE class_id = ?1 AND external_id = ?2",
                    IDENTITY_COLUMNS
                ),
                params![class_id.0, external_id],
                row_to_identity,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_object_identity(&self, id: ObjectIdentityId) -> Result<Option<ObjectIdentity>> {
        self.call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM acl_object_identity WHERE id = ?1",
                    IDENTITY_COLUMNS
                ),
                params![id.0],
                row_to_identity,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn insert_object_identity(
        &self,
        identity: &NewObjectIdentity,
    ) -> Result<InsertResult<ObjectIdentity>> {
        let new = identity.clone();
        self.call(move |conn| {
            let result = conn
                .execute(
                    "INSERT INTO acl_object_identity (
                        class_id, external_id, parent_id, owner_sid_id, entries_inheriting
                    ) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        new.class_id.0,
                        new.external_id,
                        new.parent_id.map(|p| p.0),
                        new.owner_sid_id.map(|s| s.0),
                        new.entries_inheriting,
                    ],
                )
                .map(|_| ObjectIdentity {
                    id: ObjectIdentityId(conn.last_insert_rowid()),
                    class_id: new.class_id,
                    external_id: new.external_id.clone(),
                    parent_id: new.parent_id,
                    owner_sid_id: new.owner_sid_id,
                    entries_inheriting: new.entries_inheriting,
                });
            insert_outcome(result, || {
                format!(
                    "identity {} references a missing class, parent or owner",
                    new.external_id
                )
            })
        })
        .await
    }

    async fn update_object_identity(&self, identity: &ObjectIdentity) -> Result<()> {
        let identity = identity.clone();
        self.call(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE acl_object_identity
                     SET parent_id = ?2, owner_sid_id = ?3, entries_inheriting = ?4
                     WHERE id = ?1",
                    params![
                        identity.id.0,
                        identity.parent_id.map(|p| p.0),
                        identity.owner_sid_id.map(|s| s.0),
                        identity.entries_inheriting,
                    ],
                )
                .map_err(|e| match violation(&e) {
                    Some(Violation::ForeignKey) => StoreError::DanglingReference(format!(
                        "identity {} references a missing parent or owner",
                        identity.id
                    )),
                    _ => StoreError::from(e),
                })?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("identity {}", identity.id)));
            }
            Ok(())
        })
        .await
    }

    async fn set_parent(
        &self,
        id: ObjectIdentityId,
        parent: Option<ObjectIdentityId>,
        max_depth: u32,
    ) -> Result<ObjectIdentity> {
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let exists = tx
                .query_row(
                    "SELECT 1 FROM acl_object_identity WHERE id = ?1",
                    params![id.0],
                    |_| Ok(()),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("identity {}", id)));
            }

            if let Some(parent) = parent {
                check_link(id, parent, max_depth, |node| {
                    let link: Option<Option<i64>> = tx
                        .query_row(
                            "SELECT parent_id FROM acl_object_identity WHERE id = ?1",
                            params![node.0],
                            |row| row.get(0),
                        )
                        .optional()?;
                    Ok(link.map(|p| p.map(ObjectIdentityId)))
                })?;
            }

            tx.execute(
                "UPDATE acl_object_identity SET parent_id = ?2 WHERE id = ?1",
                params![id.0, parent.map(|p| p.0)],
            )?;
            let identity = tx.query_row(
                &format!(
                    "SELECT {} FROM acl_object_identity WHERE id = ?1",
                    IDENTITY_COLUMNS
                ),
                params![id.0],
                row_to_identity,
            )?;
            tx.commit()?;
            Ok(identity)
        })
        .await
    }

    async fn list_object_identities(&self) -> Result<Vec<ObjectIdentity>> {
        self.call(|conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {} FROM acl_object_identity ORDER BY id",
                    IDENTITY_COLUMNS
                ),
                row_to_identity,
            )
        })
        .await
    }

    async fn delete_object_identity(&self, id: ObjectIdentityId) -> Result<u64> {
        self.call(move |conn| {
            let tx = conn.transaction()?;

            let children: i64 = tx.query_row(
                "SELECT COUNT(*) FROM acl_object_identity WHERE parent_id = ?1",
                params![id.0],
                |row| row.get(0),
            )?;
            if children > 0 {
                return Err(StoreError::StillReferenced(format!(
                    "identity {} is the parent of {} identities",
                    id, children
                )));
            }

            let removed = tx.execute(
                "DELETE FROM acl_entry WHERE object_identity_id = ?1",
                params![id.0],
            )?;
            let deleted = tx.execute(
                "DELETE FROM acl_object_identity WHERE id = ?1",
                params![id.0],
            )?;
            if deleted == 0 {
                return Err(StoreError::NotFound(format!("identity {}", id)));
            }
            tx.commit()?;

            Ok(removed as u64)
        })
        .await
    }

    async fn next_ace_order(&self, id: ObjectIdentityId) -> Result<u32> {
        self.call(move |conn| bump_ace_order(conn, id)).await
    }

    async fn insert_entry(&self, entry: &NewEntry) -> Result<InsertResult<Entry>> {
        let new = entry.clone();
        self.call(move |conn| insert_entry_row(conn, &new)).await
    }

    async fn append_entry_if_absent(&self, draft: &EntryDraft) -> Result<EntryAppend> {
        let draft = draft.clone();
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if let Some(existing) = find_entry_row(
                &tx,
                draft.object_identity_id,
                draft.sid_id,
                draft.mask,
                draft.granting,
            )? {
                return Ok(EntryAppend::Existing(existing));
            }

            let ace_order = bump_ace_order(&tx, draft.object_identity_id)?;
            let new = NewEntry {
                object_identity_id: draft.object_identity_id,
                sid_id: draft.sid_id,
                ace_order,
                mask: draft.mask,
                granting: draft.granting,
                audit_success: draft.audit_success,
                audit_failure: draft.audit_failure,
            };
            let entry = match insert_entry_row(&tx, &new)? {
                InsertResult::Inserted(entry) => entry,
                InsertResult::AlreadyExists => {
                    return Err(StoreError::InvalidData(format!(
                        "allocated ace order {} is taken on identity {}",
                        ace_order, draft.object_identity_id
                    )))
                }
            };
            tx.commit()?;
            Ok(EntryAppend::Created(entry))
        })
        .await
    }

    async fn entries_for_identity(&self, identity: ObjectIdentityId) -> Result<Vec<Entry>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM acl_entry WHERE object_identity_id = ?1 ORDER BY ace_order",
                ENTRY_COLUMNS
            ))?;
            let entries = stmt
                .query_map(params![identity.0], row_to_entry)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
        .await
    }

    async fn entries_for_sids(
        &self,
        identity: ObjectIdentityId,
        sids: &[SidId],
    ) -> Result<Vec<Entry>> {
        if sids.is_empty() {
            return Ok(Vec::new());
        }
        let mut values: Vec<i64> = Vec::with_capacity(sids.len() + 1);
        values.push(identity.0);
        values.extend(sids.iter().map(|s| s.0));

        self.call(move |conn| {
            let placeholders = (2..=values.len())
                .map(|i| format!("?{}", i))
                .collect::<Vec<_>>()
                .join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM acl_entry
                 WHERE object_identity_id = ?1 AND sid_id IN ({})
                 ORDER BY ace_order",
                ENTRY_COLUMNS, placeholders
            ))?;
            let entries = stmt
                .query_map(params_from_iter(values.iter()), row_to_entry)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
        .await
    }

    async fn remove_entries(
        &self,
        identity: ObjectIdentityId,
        sid: SidId,
        mask: Permission,
        granting: bool,
        mode: RevokeMode,
    ) -> Result<MaskRemoval> {
        let bits = mask.bits() as i64;
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let removal = match mode {
                RevokeMode::ExactMask => {
                    let deleted = tx.execute(
                        "DELETE FROM acl_entry
                         WHERE object_identity_id = ?1 AND sid_id = ?2 AND granting = ?3
                           AND mask = ?4",
                        params![identity.0, sid.0, granting, bits],
                    )?;
                    MaskRemoval {
                        deleted: deleted as u64,
                        narrowed: 0,
                    }
                }
                RevokeMode::ClearBits => {
                    // Entries left with no bits go first; the rest are narrowed.
                    let deleted = tx.execute(
                        "DELETE FROM acl_entry
                         WHERE object_identity_id = ?1 AND sid_id = ?2 AND granting = ?3
                           AND (mask & ?4) != 0 AND (mask & ~?4) = 0",
                        params![identity.0, sid.0, granting, bits],
                    )?;
                    let narrowed = tx.execute(
                        "UPDATE acl_entry SET mask = mask & ~?4
                         WHERE object_identity_id = ?1 AND sid_id = ?2 AND granting = ?3
                           AND (mask & ?4) != 0",
                        params![identity.0, sid.0, granting, bits],
                    )?;
                    MaskRemoval {
                        deleted: deleted as u64,
                        narrowed: narrowed as u64,
                    }
                }
            };
            tx.commit()?;
            Ok(removal)
        })
        .await
    }

    async fn delete_entry(&self, id: EntryId) -> Result<bool> {
        self.call(move |conn| {
            let deleted = conn.execute("DELETE FROM acl_entry WHERE id = ?1", params![id.0])?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn delete_entries_for_identity(&self, identity: ObjectIdentityId) -> Result<u64> {
        self.call(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM acl_entry WHERE object_identity_id = ?1",
                params![identity.0],
            )?;
            Ok(deleted as u64)
        })
        .await
    }

    async fn delete_entries_for_sid(&self, sid: SidId) -> Result<u64> {
        self.call(move |conn| {
            let deleted = conn.execute("DELETE FROM acl_entry WHERE sid_id = ?1", params![sid.0])?;
            Ok(deleted as u64)
        })
        .await
    }

    async fn list_entries(&self) -> Result<Vec<Entry>> {
        self.call(|conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {} FROM acl_entry ORDER BY object_identity_id, ace_order",
                    ENTRY_COLUMNS
                ),
                row_to_entry,
            )
        })
        .await
    }
}
