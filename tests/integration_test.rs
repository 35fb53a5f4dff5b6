// tests/integration_test.rs

//! Integration tests for the port registry
//!
//! These tests verify end-to-end functionality across modules.

use portreg::db::models::{Condition, FileEntry, InstallType, Port, PortState};
use portreg::db::{Registry, RegistryOptions, schema};
use portreg::version::{Version, vercmp};
use portreg::{Error, db};
use std::cmp::Ordering;
use tempfile::TempDir;

fn registry_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("registry.db")
}

fn register(registry: &mut Registry, name: &str, version: &str, paths: &[&str]) -> i64 {
    registry
        .write(|tx| {
            let mut port = Port::new(name, 0, version, "0", "");
            port.state = Some(PortState::Imaged);
            port.installtype = Some(InstallType::Image);
            let id = port.insert(tx)?;
            FileEntry::map(tx, id, paths)?;
            port.activate(tx)?;
            Ok(id)
        })
        .unwrap()
}

#[test]
fn test_registry_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let path = registry_path(&dir);

    let registry = Registry::open(&path).unwrap();
    assert!(path.exists(), "opening creates the file");
    assert!(!registry.is_initialized().unwrap());

    registry.init().unwrap();
    assert!(registry.is_initialized().unwrap());
    assert_eq!(registry.check_version().unwrap(), schema::SCHEMA_VERSION);
    assert!(registry.get_metadata("created").unwrap().is_some());
    registry.close().unwrap();

    // A second process sees the same registry.
    let reopened = Registry::open(&path).unwrap();
    assert!(reopened.is_initialized().unwrap());
    let journal_mode: String = reopened
        .conn()
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(journal_mode.to_lowercase(), "wal");
}

#[test]
fn test_init_twice_fails_with_duplicate_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = registry_path(&dir);

    Registry::open(&path).unwrap().init().unwrap();

    let registry = Registry::open(&path).unwrap();
    match registry.init() {
        Err(Error::SqlFailure { engine_message, .. }) => {
            assert!(
                engine_message.contains("already exists"),
                "unexpected message: {}",
                engine_message
            );
        }
        other => panic!("expected SqlFailure, got {:?}", other),
    }

    // The failed attempt left the registry usable.
    assert_eq!(registry.check_version().unwrap(), schema::SCHEMA_VERSION);
}

#[test]
fn test_open_or_init_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = registry_path(&dir);

    Registry::open_or_init(&path).unwrap();
    let registry = Registry::open_or_init(&path).unwrap();
    assert!(registry.is_initialized().unwrap());
}

#[test]
fn test_open_in_missing_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("no/such/dir/registry.db");

    assert!(matches!(Registry::open(&path), Err(Error::CannotInit(_))));
    assert!(!path.exists());
}

#[test]
fn test_without_wal() {
    let dir = tempfile::tempdir().unwrap();
    let path = registry_path(&dir);
    let options = RegistryOptions {
        wal: false,
        ..Default::default()
    };

    let registry = Registry::open_with(&path, options).unwrap();
    registry.init().unwrap();
    let journal_mode: String = registry
        .conn()
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_ne!(journal_mode.to_lowercase(), "wal");
}

#[test]
fn test_duplicate_port_is_a_constraint_violation() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = Registry::open_or_init(registry_path(&dir)).unwrap();

    register(&mut registry, "zlib", "1.3.1", &[]);

    let err = registry
        .write(|tx| Port::new("zlib", 0, "1.3.1", "0", "").insert(tx))
        .unwrap_err();
    assert!(err.is_constraint_violation(), "got {:?}", err);

    // Names compare case-insensitively.
    let err = registry
        .write(|tx| Port::new("ZLIB", 0, "1.3.1", "0", "").insert(tx))
        .unwrap_err();
    assert!(err.is_constraint_violation());

    // A different variant set is a different port.
    registry
        .write(|tx| Port::new("zlib", 0, "1.3.1", "0", "+universal").insert(tx))
        .unwrap();
}

#[test]
fn test_versions_sort_inside_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = Registry::open_or_init(registry_path(&dir)).unwrap();

    for version in ["1.10", "1.2", "1.9", "1.10.1"] {
        registry
            .write(|tx| Port::new("gettext", 0, version, "0", "").insert(tx))
            .unwrap();
    }

    let versions: Vec<String> = Port::list_all(registry.conn())
        .unwrap()
        .into_iter()
        .map(|p| p.version)
        .collect();
    assert_eq!(versions, vec!["1.2", "1.9", "1.10", "1.10.1"]);

    // Same order as the library comparator.
    let mut expected = versions.clone();
    expected.sort_by(|a, b| Version(a).cmp(&Version(b)));
    assert_eq!(versions, expected);
    assert_eq!(vercmp("1.9", "1.10"), Ordering::Less);
}

#[test]
fn test_install_deactivate_uninstall_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let path = registry_path(&dir);
    let mut registry = Registry::open_or_init(&path).unwrap();

    let id = register(
        &mut registry,
        "curl",
        "8.9.1",
        &["/opt/local/bin/curl", "/opt/local/lib/libcurl.dylib"],
    );

    let installed = Port::installed(registry.conn(), Some("curl")).unwrap();
    assert_eq!(installed.len(), 1);
    let owner = Port::owner(registry.conn(), "/opt/local/bin/curl")
        .unwrap()
        .unwrap();
    assert_eq!(owner.id, Some(id));

    let hits = Port::search(registry.conn(), &[Condition::glob("name", "cu*")]).unwrap();
    assert_eq!(hits.len(), 1);
    let hits = Port::search(registry.conn(), &[Condition::regexp("version", r"^8\.")]).unwrap();
    assert_eq!(hits.len(), 1);

    // Deactivate: the port stays imaged but no longer owns anything.
    registry
        .write(|tx| {
            let mut port = Port::find_by_id(tx, id)?.unwrap();
            port.deactivate(tx)
        })
        .unwrap();
    assert!(Port::installed(registry.conn(), None).unwrap().is_empty());
    assert_eq!(
        Port::imaged(registry.conn(), Some("curl"), None, None, None)
            .unwrap()
            .len(),
        1
    );
    assert!(
        Port::owner(registry.conn(), "/opt/local/bin/curl")
            .unwrap()
            .is_none()
    );

    // Uninstall in one transaction.
    registry
        .write(|tx| {
            let files: Vec<String> = FileEntry::find_by_port(tx, id)?
                .into_iter()
                .map(|f| f.path)
                .collect();
            FileEntry::unmap(tx, id, &files)?;
            Port::delete(tx, id)
        })
        .unwrap();

    assert!(Port::list_all(registry.conn()).unwrap().is_empty());
    assert!(FileEntry::find_by_port(registry.conn(), id).unwrap().is_empty());
}

#[test]
fn test_failed_write_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = Registry::open_or_init(registry_path(&dir)).unwrap();

    let result = registry.write(|tx| {
        Port::new("openssl", 0, "3.3.2", "0", "").insert(tx)?;
        Port::new("openssl", 0, "3.3.2", "0", "").insert(tx)
    });
    assert!(result.is_err());
    assert!(Port::list_all(registry.conn()).unwrap().is_empty());
}

#[test]
fn test_transaction_helper_on_raw_connection() {
    let dir = tempfile::tempdir().unwrap();
    let path = registry_path(&dir);
    Registry::open_or_init(&path).unwrap();

    let registry = Registry::open(&path).unwrap();
    let mut conn = rusqlite::Connection::open(registry.path()).unwrap();
    db::functions::register(&conn).unwrap();

    db::transaction(&mut conn, |tx| {
        Port::new("xz", 0, "5.6.2", "0", "").insert(tx)?;
        Ok(())
    })
    .unwrap();

    assert_eq!(Port::list_all(registry.conn()).unwrap().len(), 1);
}

#[test]
fn test_scratch_tables_are_per_connection() {
    let dir = tempfile::tempdir().unwrap();
    let path = registry_path(&dir);
    let first = Registry::open_or_init(&path).unwrap();
    let second = Registry::open(&path).unwrap();

    first
        .conn()
        .execute("INSERT INTO items (refcount, proc, name) VALUES (1, 'p1', 'zlib')", [])
        .unwrap();

    let count = |r: &Registry| -> i64 {
        r.conn()
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
            .unwrap()
    };
    assert_eq!(count(&first), 1);
    assert_eq!(count(&second), 0);
}
