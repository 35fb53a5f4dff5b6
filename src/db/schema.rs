// src/db/schema.rs

//! Registry schema
//!
//! The schema is created exactly once, when a registry file is first opened,
//! inside a single transaction. Running it again fails on the existing
//! `metadata` table; that failure is surfaced to the caller, never skipped.

use super::query;
use crate::error::{Error, Result};
use crate::version::vercmp;
use rusqlite::{Connection, OptionalExtension};
use std::cmp::Ordering;
use tracing::{debug, info, warn};

/// Schema version written to `metadata` on creation
pub const SCHEMA_VERSION: &str = "1.000";

/// Statements creating the durable schema. `BEGIN`/`COMMIT` are part of the list.
const CREATE_TABLES: &[&str] = &[
    "BEGIN",
    // metadata
    "CREATE TABLE metadata (key UNIQUE, value)",
    "INSERT INTO metadata (key, value) VALUES ('version', '1.000')",
    "INSERT INTO metadata (key, value) VALUES ('created', NOW())",
    // ports
    "CREATE TABLE ports (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT COLLATE NOCASE,
        source TEXT,
        url TEXT,
        location TEXT,
        epoch INTEGER,
        version TEXT COLLATE VERSION,
        revision TEXT COLLATE VERSION,
        variants TEXT,
        default_variants TEXT,
        state TEXT,
        date DATETIME,
        installtype TEXT,
        UNIQUE (name, epoch, version, revision, variants),
        UNIQUE (url, epoch, version, revision, variants)
    )",
    "CREATE INDEX port_name ON ports (name, epoch, version, revision, variants)",
    "CREATE INDEX port_url ON ports (url, epoch, version, revision, variants)",
    "CREATE INDEX port_state ON ports (state)",
    // file map; `id` refers to ports(id) but is deliberately not a foreign key
    "CREATE TABLE files (id INTEGER, path TEXT, mtime DATETIME)",
    "CREATE INDEX file_port ON files (id)",
    "COMMIT",
];

/// Connection-scoped scratch tables, rebuilt on every open.
const SCRATCH_TABLES: &[&str] = &[
    "BEGIN",
    "DROP TABLE IF EXISTS temp.items",
    "DROP TABLE IF EXISTS temp.indexes",
    "CREATE TEMPORARY TABLE items (refcount, proc UNIQUE, name, url, path, worker, options, variants)",
    "CREATE TEMPORARY TABLE indexes (file, name, attached)",
    "COMMIT",
];

/// Create all durable tables, indices and the seeded metadata rows.
///
/// Requires the `NOW` function and `VERSION` collation to be registered on
/// `conn` (see [`super::functions::register`]). On failure the open
/// transaction is rolled back, leaving the file untouched.
pub fn create_tables(conn: &Connection) -> Result<()> {
    debug!("Creating registry schema version {}", SCHEMA_VERSION);

    if let Err(e) = query::execute(conn, CREATE_TABLES) {
        rollback(conn);
        return Err(e);
    }

    info!("Registry schema version {} created", SCHEMA_VERSION);
    Ok(())
}

/// (Re)create the per-connection `items` and `indexes` tables.
pub fn create_scratch_tables(conn: &Connection) -> Result<()> {
    if let Err(e) = query::execute(conn, SCRATCH_TABLES) {
        rollback(conn);
        return Err(e);
    }
    Ok(())
}

/// Whether the durable schema exists in the database `conn` is attached to.
pub fn is_initialized(conn: &Connection) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'metadata'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Read `metadata.version` and refuse registries this build cannot handle.
pub fn check_version(conn: &Connection) -> Result<String> {
    let version: Option<Option<String>> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    let version = match version {
        None => {
            return Err(Error::Invalid(
                "Version number in metadata table not found".to_string(),
            ));
        }
        Some(None) => {
            return Err(Error::Invalid(
                "Version number in metadata table is NULL".to_string(),
            ));
        }
        Some(Some(v)) => v,
    };

    if vercmp(&version, SCHEMA_VERSION) == Ordering::Greater {
        return Err(Error::Invalid(format!(
            "Version number in metadata table is newer than expected ({} > {})",
            version, SCHEMA_VERSION
        )));
    }

    debug!("Registry schema version {}", version);
    Ok(version)
}

/// Best-effort ROLLBACK. Errors are dropped so the original failure is kept.
fn rollback(conn: &Connection) {
    if conn.is_autocommit() {
        return;
    }
    if let Err(e) = conn.execute_batch("ROLLBACK") {
        warn!("ROLLBACK after failed schema statement also failed: {}", e);
    }
}
