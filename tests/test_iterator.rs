use shaledb::{Comparator, Database, Error, Options, ReadOptions, WriteOptions};
use tempfile::TempDir;

fn setup_db() -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let mut options = Options::new();
    options.create_if_missing(true);
    let db = Database::open(dir.path().join("db"), &options).unwrap();
    (dir, db)
}

fn fill(db: &Database, keys: &[&str]) {
    let wo = WriteOptions::new();
    for key in keys {
        db.put(&wo, key, &format!("value-{key}")).unwrap();
    }
}

fn collect_forward(db: &Database) -> Vec<String> {
    let mut it = db.iter(&ReadOptions::new()).unwrap();
    let mut keys = Vec::new();
    it.seek_to_first();
    while it.valid() {
        keys.push(it.key_as::<String>().unwrap());
        it.next().unwrap();
    }
    it.status().unwrap();
    keys
}

#[test]
fn test_forward_iteration_is_comparator_ordered() {
    let (_dir, db) = setup_db();
    fill(&db, &["delta", "alpha", "charlie", "bravo"]);

    assert_eq!(
        collect_forward(&db),
        vec!["alpha", "bravo", "charlie", "delta"]
    );
}

#[test]
fn test_reverse_iteration_visits_keys_backwards() {
    let (_dir, db) = setup_db();
    fill(&db, &["a", "b", "c"]);

    let mut it = db.iter(&ReadOptions::new()).unwrap();
    let mut keys = Vec::new();
    it.seek_to_last();
    while it.valid() {
        keys.push(it.key_as::<String>().unwrap());
        it.prev().unwrap();
    }
    assert_eq!(keys, vec!["c", "b", "a"]);
}

#[test]
fn test_seek_positions_at_first_key_not_less_than_target() {
    let (_dir, db) = setup_db();
    fill(&db, &["a", "b", "d"]);

    let mut it = db.iter(&ReadOptions::new()).unwrap();

    it.seek(&"b");
    assert_eq!(it.key().unwrap(), b"b");

    it.seek(&"c");
    assert_eq!(it.key().unwrap(), b"d");
    assert_eq!(it.value().unwrap(), b"value-d");

    it.seek(&"z");
    assert!(!it.valid());
}

#[test]
fn test_fresh_iterator_is_unpositioned() {
    let (_dir, db) = setup_db();
    fill(&db, &["a"]);

    let it = db.iter(&ReadOptions::new()).unwrap();
    assert!(!it.valid());
    assert!(matches!(it.key(), Err(Error::InvalidState(_))));
    assert!(matches!(it.value(), Err(Error::InvalidState(_))));
}

#[test]
fn test_exhausted_iterator_rejects_access() {
    let (_dir, db) = setup_db();
    fill(&db, &["only"]);

    let mut it = db.iter(&ReadOptions::new()).unwrap();
    it.seek_to_first();
    it.next().unwrap();
    assert!(!it.valid());
    assert!(matches!(it.key(), Err(Error::InvalidState(_))));
    assert!(matches!(it.next(), Err(Error::InvalidState(_))));
    assert!(matches!(it.prev(), Err(Error::InvalidState(_))));
    it.status().unwrap();
}

#[test]
fn test_iteration_over_empty_database() {
    let (_dir, db) = setup_db();

    let mut it = db.iter(&ReadOptions::new()).unwrap();
    it.seek_to_first();
    assert!(!it.valid());
    it.seek_to_last();
    assert!(!it.valid());
}

#[test]
fn test_iterator_sees_a_consistent_view() {
    let (_dir, db) = setup_db();
    fill(&db, &["a", "b"]);

    let mut it = db.iter(&ReadOptions::new()).unwrap();
    db.put(&WriteOptions::new(), &"c", &"late").unwrap();

    let mut keys = Vec::new();
    it.seek_to_first();
    while it.valid() {
        keys.push(it.key_as::<String>().unwrap());
        it.next().unwrap();
    }
    // The write after iterator creation is not part of its view.
    assert_eq!(keys, vec!["a", "b"]);
}

#[test]
fn test_custom_comparator_drives_ordering_and_outlives_options() {
    let dir = TempDir::new().unwrap();

    // The options bundle is dropped right after open; the database keeps
    // the comparator alive as a co-owner.
    let db = {
        let mut options = Options::new();
        options.create_if_missing(true);
        options.comparator(Comparator::new("reverse-bytewise", |a, b| b.cmp(a)));
        Database::open(dir.path().join("db"), &options).unwrap()
    };

    fill(&db, &["a", "b", "c"]);
    assert_eq!(collect_forward(&db), vec!["c", "b", "a"]);

    // Seek follows the comparator's order too: the first key >= "b" in
    // reverse order is "b" itself, and stepping forward reaches "a".
    let mut it = db.iter(&ReadOptions::new()).unwrap();
    it.seek(&"b");
    assert_eq!(it.key().unwrap(), b"b");
    it.next().unwrap();
    assert_eq!(it.key().unwrap(), b"a");
}
