// src/db/query.rs

//! Ordered execution of fixed SQL statement lists
//!
//! Used for schema creation and connection setup. Statements are internal
//! literals, never user input, so nothing here binds parameters. No
//! transaction is added implicitly; a list that needs atomicity carries its
//! own `BEGIN` and `COMMIT` entries.

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::debug;

/// Run `statements` in order, stopping at the first failure.
///
/// Each statement is prepared, stepped until the engine reports completion
/// (any rows produced, e.g. by a `PRAGMA`, are discarded) and finalized before
/// the next one starts. The returned `SqlFailure` names the statement that
/// failed together with the engine's code and message.
pub fn execute(conn: &Connection, statements: &[&str]) -> Result<()> {
    for statement in statements {
        run_one(conn, statement).map_err(|e| Error::sql(statement, e))?;
    }
    Ok(())
}

fn run_one(conn: &Connection, statement: &str) -> rusqlite::Result<()> {
    debug!("executing: {}", statement);
    // The statement is finalized when `stmt` drops, including on error.
    let mut stmt = conn.prepare(statement)?;
    let mut rows = stmt.raw_query();
    while rows.next()?.is_some() {}
    Ok(())
}
