use std::fs::OpenOptions;
use std::io::Write;

use shaledb::{destroy, repair, Database, Error, Options, ReadOptions, WriteOptions};
use tempfile::TempDir;

// Layout knowledge shared with the engine: the commit log lives in this
// file inside a database directory.
const LOG_FILE: &str = "shale.log";

fn create_options() -> Options {
    let mut options = Options::new();
    options.create_if_missing(true);
    options
}

fn synced() -> WriteOptions {
    let mut wo = WriteOptions::new();
    wo.sync = true;
    wo
}

fn tear_log_tail(path: &std::path::Path) {
    let mut log = OpenOptions::new()
        .append(true)
        .open(path.join(LOG_FILE))
        .unwrap();
    // Garbage that cannot be a well-formed commit record.
    log.write_all(&[0xde, 0xad, 0xbe, 0xef, 0x01]).unwrap();
}

#[test]
fn test_destroy_removes_the_directory() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let options = create_options();

    {
        let db = Database::open(&path, &options).unwrap();
        db.put(&synced(), &"k", &"v").unwrap();
    }

    destroy(&path, &options).unwrap();
    assert!(!path.exists());

    // Destroying what is already gone is not an error.
    destroy(&path, &options).unwrap();
}

#[test]
fn test_destroy_refuses_an_open_database() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let options = create_options();

    let db = Database::open(&path, &options).unwrap();
    assert!(matches!(destroy(&path, &options), Err(Error::Engine(_))));

    drop(db);
    destroy(&path, &options).unwrap();
}

#[test]
fn test_open_recovers_past_a_torn_tail() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let options = create_options();

    {
        let db = Database::open(&path, &options).unwrap();
        db.put(&synced(), &"a", &"1").unwrap();
        db.put(&synced(), &"b", &"2").unwrap();
    }
    tear_log_tail(&path);

    // Default recovery drops the torn tail and keeps everything before it.
    let db = Database::open(&path, &options).unwrap();
    assert_eq!(
        db.get(&ReadOptions::new(), &"a", String::new()).unwrap(),
        "1"
    );
    assert_eq!(
        db.get(&ReadOptions::new(), &"b", String::new()).unwrap(),
        "2"
    );
}

#[test]
fn test_paranoid_checks_turn_a_torn_tail_into_an_open_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");

    {
        let db = Database::open(&path, &create_options()).unwrap();
        db.put(&synced(), &"a", &"1").unwrap();
    }
    tear_log_tail(&path);

    let mut paranoid = create_options();
    paranoid.paranoid_checks(true);
    assert!(matches!(
        Database::open(&path, &paranoid),
        Err(Error::Open { .. })
    ));
}

#[test]
fn test_repair_truncates_to_the_valid_prefix() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");

    {
        let db = Database::open(&path, &create_options()).unwrap();
        db.put(&synced(), &"keep", &"me").unwrap();
    }
    tear_log_tail(&path);

    repair(&path, &create_options()).unwrap();

    // After repair even a paranoid open succeeds: the torn bytes are gone.
    let mut paranoid = create_options();
    paranoid.paranoid_checks(true);
    let db = Database::open(&path, &paranoid).unwrap();
    assert_eq!(
        db.get(&ReadOptions::new(), &"keep", String::new()).unwrap(),
        "me"
    );
}

#[test]
fn test_repair_refuses_an_open_database() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let options = create_options();

    let _db = Database::open(&path, &options).unwrap();
    assert!(matches!(repair(&path, &options), Err(Error::Engine(_))));
}

#[test]
fn test_repair_of_a_missing_path_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("never-created");
    assert!(matches!(
        repair(&path, &create_options()),
        Err(Error::Engine(_))
    ));
}
