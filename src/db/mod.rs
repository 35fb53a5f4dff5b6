// src/db/mod.rs

//! Database layer for the port registry
//!
//! This module handles all SQLite operations including:
//! - Opening registry files and registering the SQL extensions
//! - One-time schema creation
//! - Connection-scoped scratch tables
//! - Transaction handling and metadata access
//!
//! A registry file is shared by many short-lived processes. Every process
//! opens its own connection; the engine's file locking plus the busy timeout
//! serialize writers. Callers that need to guard more than the database
//! itself (e.g. a port's build directory) take an advisory lock from
//! [`crate::lock`] around the critical section.

pub mod functions;
pub mod models;
pub mod query;
pub mod schema;

use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Settings applied when a registry is opened or initialized
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// How long a statement waits on a locked database before failing
    pub busy_timeout: Duration,
    /// Put a freshly created registry into WAL journal mode
    pub wal: bool,
    /// Ask the engine for full fsyncs on platforms that support them
    pub fullfsync: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5000),
            wal: true,
            fullfsync: true,
        }
    }
}

/// An open connection to one registry file
pub struct Registry {
    conn: Connection,
    path: PathBuf,
    options: RegistryOptions,
}

impl Registry {
    /// Open (creating if needed) the registry file at `path` with default options.
    ///
    /// The file is not initialized; see [`Registry::init`] and
    /// [`Registry::open_or_init`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, RegistryOptions::default())
    }

    /// Open the registry file at `path`.
    ///
    /// Registers `REGEXP`, `NOW` and the `VERSION` collation and rebuilds the
    /// connection-scoped scratch tables. A missing file is created, but only
    /// inside an existing directory.
    pub fn open_with(path: impl AsRef<Path>, options: RegistryOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!("Opening registry at: {}", path.display());

        if !path.exists() {
            let parent = match path.parent() {
                Some(p) if p.as_os_str().is_empty() => Path::new("."),
                Some(p) => p,
                None => Path::new("."),
            };
            let writable = std::fs::metadata(parent)
                .map(|m| m.is_dir() && !m.permissions().readonly())
                .unwrap_or(false);
            if !writable {
                return Err(Error::CannotInit(format!(
                    "port registry doesn't exist at \"{}\" and couldn't write to this location",
                    path.display()
                )));
            }
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(options.busy_timeout)?;
        functions::register(&conn)?;
        schema::create_scratch_tables(&conn)?;

        Ok(Self {
            conn,
            path,
            options,
        })
    }

    /// Open the registry at `path`, creating the schema if the file is new.
    pub fn open_or_init(path: impl AsRef<Path>) -> Result<Self> {
        let registry = Self::open(path)?;
        if registry.is_initialized()? {
            registry.check_version()?;
        } else {
            registry.init()?;
        }
        Ok(registry)
    }

    /// Create the registry schema. Call exactly once per freshly created file.
    ///
    /// Calling it on an initialized registry fails with the engine's
    /// duplicate-table `SqlFailure`. A failed init rolls back, so the file is
    /// unchanged, but the handle should be dropped rather than reused.
    pub fn init(&self) -> Result<()> {
        info!("Initializing registry at: {}", self.path.display());

        // Journal settings cannot change inside a transaction.
        let mut pragmas = Vec::new();
        if self.options.fullfsync {
            pragmas.push("PRAGMA fullfsync = 1");
        }
        if self.options.wal {
            pragmas.push("PRAGMA journal_mode = WAL");
        }
        query::execute(&self.conn, &pragmas)?;

        schema::create_tables(&self.conn)
    }

    /// Whether the durable schema exists in this file.
    pub fn is_initialized(&self) -> Result<bool> {
        schema::is_initialized(&self.conn)
    }

    /// Return the schema version, failing if it is missing or too new.
    pub fn check_version(&self) -> Result<String> {
        schema::check_version(&self.conn)
    }

    /// Path this registry was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying connection, for queries and model operations
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` in a deferred (read) transaction.
    pub fn read<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        transaction_with(&mut self.conn, TransactionBehavior::Deferred, f)
    }

    /// Run `f` in an exclusive (write) transaction.
    pub fn write<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        transaction_with(&mut self.conn, TransactionBehavior::Exclusive, f)
    }

    /// Look up a metadata value. Non-text values are returned as text.
    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT CAST(value AS TEXT) FROM metadata WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    /// Insert or replace a metadata value.
    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Remove a metadata value.
    pub fn del_metadata(&self, key: &str) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM metadata WHERE key = ?1", [key])?;
        if changed == 0 {
            return Err(Error::NotFound(format!("no metadata for key '{}'", key)));
        }
        Ok(())
    }

    /// Fold the WAL back into the main database file.
    pub fn checkpoint(&self) -> Result<()> {
        query::execute(&self.conn, &["PRAGMA wal_checkpoint(TRUNCATE)"])
    }

    /// Rebuild the database file, reclaiming free pages.
    pub fn vacuum(&self) -> Result<()> {
        query::execute(&self.conn, &["VACUUM"])
    }

    /// Close the connection, reporting any error the engine raises.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| Error::Database(e))
    }
}

/// Run `f` inside an immediate transaction on `conn`.
///
/// Commits when `f` returns `Ok`, rolls back otherwise.
pub fn transaction<T, F>(conn: &mut Connection, f: F) -> Result<T>
where
    F: FnOnce(&Transaction) -> Result<T>,
{
    transaction_with(conn, TransactionBehavior::Immediate, f)
}

fn transaction_with<T, F>(conn: &mut Connection, behavior: TransactionBehavior, f: F) -> Result<T>
where
    F: FnOnce(&Transaction) -> Result<T>,
{
    let tx = conn.transaction_with_behavior(behavior)?;
    match f(&tx) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback() {
                warn!("ROLLBACK after failed transaction also failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}
