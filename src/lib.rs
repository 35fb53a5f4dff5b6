// src/lib.rs

//! Port Registry
//!
//! Local record of installed ports: which ports are present, in which
//! versions and variants, and which files each of them owns.
//!
//! # Architecture
//!
//! - Single SQLite file: shared by many short-lived processes
//! - Query executor: runs statement sequences with precise error reporting
//! - Version collation: `1.10` sorts after `1.9` inside the engine
//! - Advisory locks: cross-process shared/exclusive locks on descriptors

pub mod db;
mod error;
pub mod lock;
pub mod version;

pub use error::{Error, LockError, Result};
