//! Database schema migrations for store files.
//!
//! Each migration is a SQL batch that transforms the schema from version N to
//! N+1. Applied versions are recorded in `schema_migrations`.

use rusqlite::Connection;

use crate::error::{EngineError, Result};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// Idempotent: running it against an up-to-date store does nothing.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current = schema_version(conn)?;

    if current > CURRENT_VERSION {
        return Err(EngineError::Unsupported(format!(
            "Store schema version {} is newer than supported version {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, crate::now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

/// The highest applied migration, or 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?)
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(EngineError::Unexpected(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Store-wide settings: key method, KDF salt, key check, default profile
        CREATE TABLE config (
            name TEXT PRIMARY KEY,
            value TEXT
        );

        -- Profiles, each with its own wrapped profile key
        CREATE TABLE profiles (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            profile_key BLOB NOT NULL
        );

        -- Records and stored keys
        CREATE TABLE items (
            id INTEGER PRIMARY KEY,
            profile_id INTEGER NOT NULL,
            kind INTEGER NOT NULL,             -- 1=record, 2=key
            category_hash BLOB NOT NULL,       -- keyed hash, for lookup
            name_hash BLOB NOT NULL,           -- keyed hash, for lookup
            category BLOB NOT NULL,            -- encrypted
            name BLOB NOT NULL,                -- encrypted
            value BLOB NOT NULL,               -- encrypted
            tags BLOB NOT NULL,                -- encrypted JSON
            expiry INTEGER,                    -- unix ms, NULL = never

            UNIQUE(profile_id, kind, category_hash, name_hash)
        );

        CREATE INDEX idx_items_category ON items(profile_id, kind, category_hash);
        CREATE INDEX idx_items_expiry ON items(expiry);
        "#,
    )?;

    Ok(())
}
