// src/db/models.rs

//! Data models for registry entries
//!
//! This module defines Rust structs that correspond to the `ports` and
//! `files` tables and provides methods for creating, reading, updating, and
//! deleting records. Writes are expected to run inside a transaction opened
//! by the caller (see [`crate::db::Registry::write`]).

use crate::error::{Error, Result};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::str::FromStr;
use tracing::debug;

const PORT_COLUMNS: &str = "id, name, source, url, location, epoch, version, revision, \
                            variants, default_variants, state, date, installtype";

/// Columns that may be searched on or read/written as properties.
const PROPERTIES: &[&str] = &[
    "name",
    "source",
    "url",
    "location",
    "epoch",
    "version",
    "revision",
    "variants",
    "default_variants",
    "state",
    "date",
    "installtype",
];

fn check_property(key: &str) -> Result<()> {
    if PROPERTIES.contains(&key) {
        Ok(())
    } else {
        Err(Error::Invalid(format!("unknown port property: {}", key)))
    }
}

fn conversion_error(col: usize, e: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        col,
        Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
    )
}

/// Whether a port's files are active in the filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    /// Active: the port's files are in place and it owns them
    Installed,
    /// Present only as an image (deactivated)
    Imaged,
}

impl PortState {
    pub fn as_str(&self) -> &str {
        match self {
            PortState::Installed => "installed",
            PortState::Imaged => "imaged",
        }
    }
}

impl FromStr for PortState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "installed" => Ok(PortState::Installed),
            "imaged" => Ok(PortState::Imaged),
            _ => Err(format!("Invalid port state: {}", s)),
        }
    }
}

/// How a port was installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallType {
    Image,
    Direct,
}

impl InstallType {
    pub fn as_str(&self) -> &str {
        match self {
            InstallType::Image => "image",
            InstallType::Direct => "direct",
        }
    }
}

impl FromStr for InstallType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "image" => Ok(InstallType::Image),
            "direct" => Ok(InstallType::Direct),
            _ => Err(format!("Invalid install type: {}", s)),
        }
    }
}

/// How a search condition matches its column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Exact,
    Glob,
    Regexp,
    Null,
}

/// One `key <op> value` clause of [`Port::search`]
#[derive(Debug, Clone)]
pub struct Condition {
    pub key: String,
    pub value: String,
    pub strategy: Strategy,
}

impl Condition {
    pub fn exact(key: &str, value: &str) -> Self {
        Self::new(key, value, Strategy::Exact)
    }

    pub fn glob(key: &str, pattern: &str) -> Self {
        Self::new(key, pattern, Strategy::Glob)
    }

    pub fn regexp(key: &str, pattern: &str) -> Self {
        Self::new(key, pattern, Strategy::Regexp)
    }

    pub fn null(key: &str) -> Self {
        Self::new(key, "", Strategy::Null)
    }

    fn new(key: &str, value: &str, strategy: Strategy) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            strategy,
        }
    }
}

/// A port recorded in the registry
#[derive(Debug, Clone)]
pub struct Port {
    pub id: Option<i64>,
    pub name: String,
    pub source: Option<String>,
    pub url: Option<String>,
    pub location: Option<String>,
    pub epoch: i64,
    pub version: String,
    pub revision: String,
    pub variants: String,
    pub default_variants: Option<String>,
    pub state: Option<PortState>,
    pub date: Option<i64>,
    pub installtype: Option<InstallType>,
}

impl Port {
    /// Create a new, not yet registered Port
    pub fn new(name: &str, epoch: i64, version: &str, revision: &str, variants: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            source: None,
            url: None,
            location: None,
            epoch,
            version: version.to_string(),
            revision: revision.to_string(),
            variants: variants.to_string(),
            default_variants: None,
            state: None,
            date: None,
            installtype: None,
        }
    }

    /// Register this port. `date` is set to the current time.
    ///
    /// Fails with a constraint violation when a port with the same
    /// `(name, epoch, version, revision, variants)` or
    /// `(url, epoch, version, revision, variants)` is already registered.
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO ports (name, source, url, location, epoch, version, revision,
                                variants, default_variants, state, date, installtype)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NOW(), ?11)",
            params![
                &self.name,
                &self.source,
                &self.url,
                &self.location,
                &self.epoch,
                &self.version,
                &self.revision,
                &self.variants,
                &self.default_variants,
                self.state.as_ref().map(PortState::as_str),
                self.installtype.as_ref().map(InstallType::as_str),
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        self.date = conn.query_row("SELECT date FROM ports WHERE id = ?1", [id], |row| {
            row.get(0)
        })?;
        debug!("Registered port {} @{} as id {}", self.name, self.version, id);
        Ok(id)
    }

    /// Find a port by ID
    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!("SELECT {} FROM ports WHERE id = ?1", PORT_COLUMNS))?;
        let port = stmt.query_row([id], Self::from_row).optional()?;
        Ok(port)
    }

    /// Open the port matching the full identity tuple
    pub fn open(
        conn: &Connection,
        name: &str,
        epoch: i64,
        version: &str,
        revision: &str,
        variants: &str,
    ) -> Result<Self> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM ports
             WHERE name = ?1 AND epoch = ?2 AND version = ?3 AND revision = ?4 AND variants = ?5",
            PORT_COLUMNS
        ))?;

        stmt.query_row(params![name, epoch, version, revision, variants], Self::from_row)
            .optional()?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "no matching port found for: name={}, epoch={}, version={}, revision={}, variants={}",
                    name, epoch, version, revision, variants
                ))
            })
    }

    /// List all ports, ordered by name and then by version
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        Self::query(
            conn,
            &format!(
                "SELECT {} FROM ports ORDER BY name, epoch, version, revision",
                PORT_COLUMNS
            ),
            [],
        )
    }

    /// Find ports for which every condition holds. No conditions lists all ports.
    pub fn search(conn: &Connection, conditions: &[Condition]) -> Result<Vec<Self>> {
        let mut sql = format!("SELECT {} FROM ports", PORT_COLUMNS);
        let mut values = Vec::new();

        for (i, cond) in conditions.iter().enumerate() {
            check_property(&cond.key)?;
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });

            let clause = match cond.strategy {
                Strategy::Exact => format!("{} = ?", cond.key),
                Strategy::Glob => format!("{} GLOB ?", cond.key),
                Strategy::Regexp => format!("REGEXP({}, ?)", cond.key),
                Strategy::Null => format!("{} IS NULL", cond.key),
            };
            sql.push_str(&clause);
            if cond.strategy != Strategy::Null {
                values.push(cond.value.as_str());
            }
        }
        sql.push_str(" ORDER BY name, epoch, version, revision");

        Self::query(conn, &sql, params_from_iter(values))
    }

    /// Ports active in the filesystem, optionally restricted to one name
    pub fn installed(conn: &Connection, name: Option<&str>) -> Result<Vec<Self>> {
        let mut conditions = vec![Condition::exact("state", PortState::Installed.as_str())];
        if let Some(name) = name {
            conditions.push(Condition::exact("name", name));
        }
        Self::search(conn, &conditions)
    }

    /// Ports present as an image or installed, optionally narrowed down
    pub fn imaged(
        conn: &Connection,
        name: Option<&str>,
        version: Option<&str>,
        revision: Option<&str>,
        variants: Option<&str>,
    ) -> Result<Vec<Self>> {
        let sql = format!(
            "SELECT {} FROM ports
             WHERE (state = 'imaged' OR state = 'installed')
               AND (?1 IS NULL OR name = ?1)
               AND (?2 IS NULL OR version = ?2)
               AND (?3 IS NULL OR revision = ?3)
               AND (?4 IS NULL OR variants = ?4)
             ORDER BY name, epoch, version, revision",
            PORT_COLUMNS
        );
        Self::query(conn, &sql, params![name, version, revision, variants])
    }

    /// The installed port that maps `path`, if any
    pub fn owner(conn: &Connection, path: &str) -> Result<Option<Self>> {
        let sql = format!(
            "SELECT {} FROM ports WHERE state = 'installed'
               AND id IN (SELECT id FROM files WHERE path = ?1)
             LIMIT 1",
            PORT_COLUMNS
        );
        let port = conn.query_row(&sql, [path], Self::from_row).optional()?;
        Ok(port)
    }

    /// Read one property of a port as text
    pub fn get_property(conn: &Connection, id: i64, key: &str) -> Result<Option<String>> {
        check_property(key)?;
        let value: Option<Option<String>> = conn
            .query_row(
                &format!("SELECT CAST({} AS TEXT) FROM ports WHERE id = ?1", key),
                [id],
                |row| row.get(0),
            )
            .optional()?;
        match value {
            Some(v) => Ok(v),
            None => Err(Error::NotFound(format!("no port with id {}", id))),
        }
    }

    /// Write one property of a port
    pub fn set_property(conn: &Connection, id: i64, key: &str, value: &str) -> Result<()> {
        check_property(key)?;
        match key {
            "state" => value.parse::<PortState>().map(drop).map_err(Error::Invalid)?,
            "installtype" => value.parse::<InstallType>().map(drop).map_err(Error::Invalid)?,
            _ => {}
        }
        let changed = conn.execute(
            &format!("UPDATE ports SET {} = ?1 WHERE id = ?2", key),
            params![value, id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("no port with id {}", id)));
        }
        Ok(())
    }

    /// Record a state transition
    pub fn set_state(&mut self, conn: &Connection, state: PortState) -> Result<()> {
        let id = self
            .id
            .ok_or_else(|| Error::Misuse("Cannot update a port without ID".to_string()))?;
        Self::set_property(conn, id, "state", state.as_str())?;
        self.state = Some(state);
        Ok(())
    }

    /// Mark an imaged port as installed
    pub fn activate(&mut self, conn: &Connection) -> Result<()> {
        if self.state == Some(PortState::Installed) {
            return Err(Error::Invalid(format!("{} is already active", self.name)));
        }
        self.set_state(conn, PortState::Installed)
    }

    /// Mark an installed port as imaged
    pub fn deactivate(&mut self, conn: &Connection) -> Result<()> {
        if self.state != Some(PortState::Installed) {
            return Err(Error::Invalid(format!("{} is not active", self.name)));
        }
        self.set_state(conn, PortState::Imaged)
    }

    /// Delete a port and its file map
    pub fn delete(conn: &Connection, id: i64) -> Result<()> {
        let changed = conn.execute("DELETE FROM ports WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(Error::Invalid("an invalid entry was passed".to_string()));
        }
        conn.execute("DELETE FROM files WHERE id = ?1", [id])?;
        debug!("Deleted port id {}", id);
        Ok(())
    }

    fn query<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(sql)?;
        let ports = stmt
            .query_map(params, Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ports)
    }

    /// Convert a database row to a Port
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let state = row
            .get::<_, Option<String>>(10)?
            .map(|s| s.parse::<PortState>().map_err(|e| conversion_error(10, e)))
            .transpose()?;
        let installtype = row
            .get::<_, Option<String>>(12)?
            .map(|s| s.parse::<InstallType>().map_err(|e| conversion_error(12, e)))
            .transpose()?;

        Ok(Self {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            source: row.get(2)?,
            url: row.get(3)?,
            location: row.get(4)?,
            epoch: row.get(5)?,
            version: row.get(6)?,
            revision: row.get(7)?,
            variants: row.get(8)?,
            default_variants: row.get(9)?,
            state,
            date: row.get(11)?,
            installtype,
        })
    }
}

/// A path mapped to a port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// The owning port's ID
    pub id: i64,
    pub path: String,
    pub mtime: Option<i64>,
}

impl FileEntry {
    /// Create a new FileEntry
    pub fn new(id: i64, path: &str) -> Self {
        Self {
            id,
            path: path.to_string(),
            mtime: None,
        }
    }

    /// Insert this file into the database
    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO files (id, path, mtime) VALUES (?1, ?2, ?3)",
            params![&self.id, &self.path, &self.mtime],
        )?;
        Ok(())
    }

    /// Map `paths` to the port `port_id`
    pub fn map<S: AsRef<str>>(conn: &Connection, port_id: i64, paths: &[S]) -> Result<()> {
        let mut stmt = conn.prepare("INSERT INTO files (id, path) VALUES (?1, ?2)")?;
        for path in paths {
            stmt.execute(params![port_id, path.as_ref()])?;
        }
        Ok(())
    }

    /// Remove `paths` from the port `port_id`
    ///
    /// Every path must currently be mapped to that port.
    pub fn unmap<S: AsRef<str>>(conn: &Connection, port_id: i64, paths: &[S]) -> Result<()> {
        let mut stmt = conn.prepare("DELETE FROM files WHERE id = ?1 AND path = ?2")?;
        for path in paths {
            if stmt.execute(params![port_id, path.as_ref()])? == 0 {
                return Err(Error::Invalid(format!(
                    "this entry does not own the given file: {}",
                    path.as_ref()
                )));
            }
        }
        Ok(())
    }

    /// Find all files mapped to a port
    pub fn find_by_port(conn: &Connection, port_id: i64) -> Result<Vec<Self>> {
        let mut stmt =
            conn.prepare("SELECT id, path, mtime FROM files WHERE id = ?1 ORDER BY path")?;

        let files = stmt
            .query_map([port_id], Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(files)
    }

    /// Convert a database row to a FileEntry
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            path: row.get(1)?,
            mtime: row.get(2)?,
        })
    }
}
