//! Database schema migrations for SQLite.
//!
//! Versioned migrations: each version is a SQL batch that moves the schema
//! from N-1 to N inside one transaction.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// Idempotent: running it against an up-to-date database does nothing.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
            tracing::debug!(version, "applied acl schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: the four ACL tables.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE acl_class (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            class_name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE acl_sid (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            principal INTEGER NOT NULL,         -- 1=user, 0=role/authority
            sid TEXT NOT NULL,

            UNIQUE(sid, principal)
        );

        CREATE TABLE acl_object_identity (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            class_id INTEGER NOT NULL REFERENCES acl_class(id),
            external_id TEXT NOT NULL,
            parent_id INTEGER REFERENCES acl_object_identity(id),
            owner_sid_id INTEGER REFERENCES acl_sid(id),
            entries_inheriting INTEGER NOT NULL DEFAULT 1,
            ace_order_hwm INTEGER NOT NULL DEFAULT 0,   -- highest order ever allocated

            UNIQUE(class_id, external_id)
        );

        CREATE TABLE acl_entry (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            object_identity_id INTEGER NOT NULL REFERENCES acl_object_identity(id),
            sid_id INTEGER NOT NULL REFERENCES acl_sid(id),
            ace_order INTEGER NOT NULL,
            mask INTEGER NOT NULL,
            granting INTEGER NOT NULL,
            audit_success INTEGER NOT NULL DEFAULT 0,
            audit_failure INTEGER NOT NULL DEFAULT 0,

            UNIQUE(object_identity_id, ace_order)
        );

        CREATE INDEX idx_acl_object_identity_parent ON acl_object_identity(parent_id);
        CREATE INDEX idx_acl_entry_identity_sid ON acl_entry(object_identity_id, sid_id);
        CREATE INDEX idx_acl_entry_sid ON acl_entry(sid_id);
        "#,
    )?;

    Ok(())
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
