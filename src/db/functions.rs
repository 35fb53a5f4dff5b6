// src/db/functions.rs

//! SQL extensions registered on every registry connection
//!
//! - `REGEXP(value, pattern)`: true when `value` matches `pattern`; an invalid
//!   pattern raises a query error instead of evaluating to false
//! - `NOW()`: current time in seconds since the Unix epoch
//! - `VERSION` collation: orders text with [`crate::version::vercmp`]
//!
//! `REGEXP` takes the value first. SQLite rewrites the infix form
//! `X REGEXP Y` into `regexp(Y, X)`, so queries use the call form.

use crate::version::vercmp;
use regex::Regex;
use rusqlite::Connection;
use rusqlite::functions::{Context, FunctionFlags};
use tracing::debug;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Register `REGEXP`, `NOW` and the `VERSION` collation on `conn`.
pub fn register(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        regexp,
    )?;
    conn.create_scalar_function("now", 0, FunctionFlags::SQLITE_UTF8, |_| {
        Ok(chrono::Utc::now().timestamp())
    })?;
    conn.create_collation("VERSION", |a: &str, b: &str| vercmp(a, b))?;

    debug!("Registered REGEXP, NOW and VERSION collation");
    Ok(())
}

fn regexp(ctx: &Context<'_>) -> rusqlite::Result<bool> {
    // Compiled once per statement and cached as auxiliary data on the pattern.
    let re = ctx.get_or_create_aux(1, |vr| -> std::result::Result<_, BoxError> {
        Ok(Regex::new(vr.as_str()?)?)
    })?;
    let value: Option<String> = ctx.get(0)?;
    Ok(value.is_some_and(|v| re.is_match(&v)))
}
