// src/error.rs

use thiserror::Error;

/// Core error types for the port registry
#[derive(Error, Debug)]
pub enum Error {
    /// A statement run through the query executor failed
    #[error("sqlite error: {engine_message} (code {engine_code}) while executing query: {statement}")]
    SqlFailure {
        statement: String,
        engine_code: i32,
        engine_message: String,
    },

    /// Database-related errors outside the query executor
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Advisory lock errors
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// No matching registry entry
    #[error("Not found: {0}")]
    NotFound(String),

    /// Registry content or arguments are invalid
    #[error("Invalid: {0}")]
    Invalid(String),

    /// The registry was used in the wrong state
    #[error("Misuse: {0}")]
    Misuse(String),

    /// The registry could not be created at the requested location
    #[error("Cannot initialize registry: {0}")]
    CannotInit(String),
}

impl Error {
    /// Build a `SqlFailure` from a driver error raised while running `statement`.
    pub fn sql(statement: &str, err: rusqlite::Error) -> Self {
        let (engine_code, engine_message) = match &err {
            rusqlite::Error::SqliteFailure(ffi, msg) => (
                ffi.extended_code,
                msg.clone().unwrap_or_else(|| ffi.to_string()),
            ),
            other => (rusqlite::ffi::SQLITE_ERROR, other.to_string()),
        };
        Error::SqlFailure {
            statement: statement.to_string(),
            engine_code,
            engine_message,
        }
    }

    /// True when the engine rejected a write because of a UNIQUE (or other) constraint.
    pub fn is_constraint_violation(&self) -> bool {
        let code = match self {
            Error::SqlFailure { engine_code, .. } => *engine_code,
            Error::Database(rusqlite::Error::SqliteFailure(ffi, _)) => ffi.extended_code,
            _ => return false,
        };
        code & 0xff == rusqlite::ffi::SQLITE_CONSTRAINT
    }
}

/// Failures of an advisory lock request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// A non-blocking request found the lock held elsewhere
    #[error("EAGAIN")]
    WouldBlock,

    /// The descriptor is not open (or not open for the required access)
    #[error("EBADF")]
    BadDescriptor,

    /// The combination of flags is not allowed
    #[error("EINVAL: {0}")]
    InvalidArgument(&'static str),

    /// The backend cannot provide the requested lock kind
    #[error("EOPNOTSUPP")]
    Unsupported,

    /// A pending event asked the waiting acquire to stop
    #[error("lock wait aborted: {0}")]
    Aborted(String),

    /// Any other OS failure
    #[error("{0}")]
    Os(String),
}

/// Result type alias using the registry's Error type
pub type Result<T> = std::result::Result<T, Error>;
