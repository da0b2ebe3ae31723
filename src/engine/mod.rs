//! The engine behind the raw surface: a comparator-ordered map made durable
//! by an append-only commit log.
//!
//! Nothing outside `raw.rs` talks to this module. The binding layer above
//! sees only the C-style contract, so it would behave identically against a
//! foreign engine.

pub(crate) mod wal;

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::raw::{c_char, c_int, c_void};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use lazy_static::lazy_static;
use log::{debug, info, warn};
use thiserror::Error;

use crate::constants::{LOCK_FILE_NAME, LOG_FILE_NAME};
use wal::{LogEntry, LogWriter};

/// Failure reported by the engine. The raw layer renders these into the
/// out-error strings the binding adapter consumes.
#[derive(Debug, Error)]
pub(crate) enum Status {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("corruption: {0}")]
    Corruption(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

lazy_static! {
    // The engine is single-process: a path may be open at most once, and
    // destroy/repair refuse paths with a live connection.
    static ref OPEN_PATHS: Mutex<HashSet<PathBuf>> = Mutex::new(HashSet::new());
}

fn open_paths() -> std::sync::MutexGuard<'static, HashSet<PathBuf>> {
    match OPEN_PATHS.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Signature of a foreign comparator callback.
pub(crate) type CompareFn =
    unsafe extern "C" fn(*mut c_void, *const u8, usize, *const u8, usize) -> c_int;
/// Signature of a foreign comparator name callback.
pub(crate) type NameFn = unsafe extern "C" fn(*mut c_void) -> *const c_char;
/// Signature of a foreign comparator state destructor.
pub(crate) type DestructorFn = unsafe extern "C" fn(*mut c_void);

/// Ordering authority for every key in one database.
pub(crate) enum KeyComparator {
    /// Lexicographic byte order, the engine default.
    Bytewise,
    /// Caller-supplied ordering reached through a state pointer.
    Foreign {
        state: *mut c_void,
        compare: CompareFn,
    },
}

// The safe constructor for foreign comparators requires the underlying
// closure to be Send + Sync, and the state pointer is never mutated here.
unsafe impl Send for KeyComparator {}
unsafe impl Sync for KeyComparator {}

impl KeyComparator {
    pub(crate) fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            KeyComparator::Bytewise => a.cmp(b),
            KeyComparator::Foreign { state, compare } => {
                let r = unsafe { compare(*state, a.as_ptr(), a.len(), b.as_ptr(), b.len()) };
                r.cmp(&0)
            }
        }
    }
}

/// Key stored in the ordered map; ordering delegates to the database's
/// comparator so every key in one map shares one ordering authority.
#[derive(Clone)]
pub(crate) struct EngineKey {
    bytes: Vec<u8>,
    cmp: Arc<KeyComparator>,
}

impl PartialEq for EngineKey {
    fn eq(&self, other: &EngineKey) -> bool {
        self.cmp.compare(&self.bytes, &other.bytes) == Ordering::Equal
    }
}

impl Eq for EngineKey {}

impl PartialOrd for EngineKey {
    fn partial_cmp(&self, other: &EngineKey) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EngineKey {
    fn cmp(&self, other: &EngineKey) -> Ordering {
        self.cmp.compare(&self.bytes, &other.bytes)
    }
}

/// Configuration the raw open call lowers out of its options handle.
pub(crate) struct EngineOptions {
    pub create_if_missing: bool,
    pub error_if_exists: bool,
    pub paranoid_checks: bool,
    pub comparator: Arc<KeyComparator>,
}

/// Point-in-time read view, owned by a snapshot handle until released.
pub(crate) struct SnapshotView {
    map: BTreeMap<EngineKey, Vec<u8>>,
}

impl SnapshotView {
    pub(crate) fn get(&self, key: &EngineKey) -> Option<Vec<u8>> {
        self.map.get(key).cloned()
    }

    pub(crate) fn entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.map
            .iter()
            .map(|(k, v)| (k.bytes.clone(), v.clone()))
            .collect()
    }
}

struct EngineInner {
    map: BTreeMap<EngineKey, Vec<u8>>,
    log: LogWriter,
}

/// One open connection to a database directory.
pub(crate) struct Engine {
    path: PathBuf,
    cmp: Arc<KeyComparator>,
    inner: RwLock<EngineInner>,
    // Held for the connection's lifetime; closing the handle releases it.
    _lock_file: File,
}

impl Engine {
    pub(crate) fn open(path: &Path, opts: EngineOptions) -> Result<Engine, Status> {
        if !path.exists() {
            if !opts.create_if_missing {
                return Err(Status::InvalidArgument(format!(
                    "{}: does not exist (create_if_missing is false)",
                    path.display()
                )));
            }
            fs::create_dir_all(path)?;
        } else if !path.is_dir() {
            return Err(Status::InvalidArgument(format!(
                "{}: exists but is not a directory",
                path.display()
            )));
        }

        let log_path = path.join(LOG_FILE_NAME);
        if log_path.exists() && opts.error_if_exists {
            return Err(Status::InvalidArgument(format!(
                "{}: exists (error_if_exists is true)",
                path.display()
            )));
        }

        let canonical = path.canonicalize()?;
        {
            let mut open = open_paths();
            if !open.insert(canonical.clone()) {
                return Err(Status::InvalidArgument(format!(
                    "{}: already open in this process",
                    path.display()
                )));
            }
        }

        // Everything past the registry insert must unregister on failure.
        match Engine::open_registered(path, &log_path, &opts) {
            Ok((map, log, lock_file)) => {
                info!("opened database at {}", path.display());
                Ok(Engine {
                    path: canonical,
                    cmp: opts.comparator,
                    inner: RwLock::new(EngineInner { map, log }),
                    _lock_file: lock_file,
                })
            }
            Err(status) => {
                open_paths().remove(&canonical);
                Err(status)
            }
        }
    }

    fn open_registered(
        path: &Path,
        log_path: &Path,
        opts: &EngineOptions,
    ) -> Result<(BTreeMap<EngineKey, Vec<u8>>, LogWriter, File), Status> {
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path.join(LOCK_FILE_NAME))?;

        let mut map = BTreeMap::new();
        if log_path.exists() {
            let outcome = wal::replay(log_path)?;
            if outcome.torn {
                if opts.paranoid_checks {
                    return Err(Status::Corruption(format!(
                        "torn record in commit log after {} bytes",
                        outcome.valid_len
                    )));
                }
                warn!(
                    "dropping torn commit log tail at {} after {} bytes",
                    log_path.display(),
                    outcome.valid_len
                );
                let file = OpenOptions::new().write(true).open(log_path)?;
                file.set_len(outcome.valid_len)?;
            }
            let mut applied = 0usize;
            for commit in outcome.commits {
                applied += commit.len();
                for entry in commit {
                    apply_entry(&mut map, &opts.comparator, entry);
                }
            }
            debug!(
                "replayed {} entries into {} live keys",
                applied,
                map.len()
            );
        }

        let log = LogWriter::open(log_path)?;
        Ok((map, log, lock_file))
    }

    pub(crate) fn key(&self, bytes: &[u8]) -> EngineKey {
        EngineKey {
            bytes: bytes.to_vec(),
            cmp: Arc::clone(&self.cmp),
        }
    }

    pub(crate) fn comparator(&self) -> Arc<KeyComparator> {
        Arc::clone(&self.cmp)
    }

    pub(crate) fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let inner = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.map.get(&self.key(key)).cloned()
    }

    /// Apply one commit atomically: log first, then the in-memory view,
    /// all under the write lock.
    pub(crate) fn commit(&self, entries: Vec<LogEntry>, sync: bool) -> Result<(), Status> {
        if entries.is_empty() {
            return Ok(());
        }
        let record = wal::encode_commit(&entries);
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.log.append(&record)?;
        if sync {
            inner.log.sync()?;
        }
        for entry in entries {
            apply_entry(&mut inner.map, &self.cmp, entry);
        }
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> SnapshotView {
        let inner = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        SnapshotView {
            map: inner.map.clone(),
        }
    }

    /// Ordered entries of the live map, a fresh implicit read view.
    pub(crate) fn entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let inner = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner
            .map
            .iter()
            .map(|(k, v)| (k.bytes.clone(), v.clone()))
            .collect()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        open_paths().remove(&self.path);
        debug!("closed database at {}", self.path.display());
    }
}

fn apply_entry(
    map: &mut BTreeMap<EngineKey, Vec<u8>>,
    cmp: &Arc<KeyComparator>,
    entry: LogEntry,
) {
    match entry {
        LogEntry::Put { key, value } => {
            map.insert(
                EngineKey {
                    bytes: key,
                    cmp: Arc::clone(cmp),
                },
                value,
            );
        }
        LogEntry::Delete { key } => {
            map.remove(&EngineKey {
                bytes: key,
                cmp: Arc::clone(cmp),
            });
        }
    }
}

fn refuse_open_path(path: &Path, verb: &str) -> Result<(), Status> {
    if let Ok(canonical) = path.canonicalize() {
        if open_paths().contains(&canonical) {
            return Err(Status::InvalidArgument(format!(
                "{}: cannot {verb} a database that is open",
                path.display()
            )));
        }
    }
    Ok(())
}

/// Remove a database directory. Removing a directory that never existed is
/// not an error; removing one that is currently open is.
pub(crate) fn destroy(path: &Path) -> Result<(), Status> {
    refuse_open_path(path, "destroy")?;
    if !path.exists() {
        return Ok(());
    }
    fs::remove_dir_all(path)?;
    info!("destroyed database at {}", path.display());
    Ok(())
}

/// Rewrite the commit log to its longest well-formed prefix.
pub(crate) fn repair(path: &Path) -> Result<(), Status> {
    refuse_open_path(path, "repair")?;
    if !path.is_dir() {
        return Err(Status::InvalidArgument(format!(
            "{}: does not exist",
            path.display()
        )));
    }
    let log_path = path.join(LOG_FILE_NAME);
    if !log_path.exists() {
        return Ok(());
    }
    let outcome = wal::replay(&log_path)?;
    if outcome.torn {
        let file = OpenOptions::new().write(true).open(&log_path)?;
        let lost = file.metadata()?.len() - outcome.valid_len;
        file.set_len(outcome.valid_len)?;
        warn!(
            "repair truncated {} bytes from {}",
            lost,
            log_path.display()
        );
    }
    info!(
        "repaired database at {}: {} commits retained",
        path.display(),
        outcome.commits.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_options() -> EngineOptions {
        EngineOptions {
            create_if_missing: true,
            error_if_exists: false,
            paranoid_checks: false,
            comparator: Arc::new(KeyComparator::Bytewise),
        }
    }

    #[test]
    fn open_refuses_missing_dir_without_create() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent");
        let mut opts = test_options();
        opts.create_if_missing = false;
        assert!(matches!(
            Engine::open(&path, opts),
            Err(Status::InvalidArgument(_))
        ));
    }

    #[test]
    fn double_open_is_refused() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), test_options()).unwrap();
        let second = Engine::open(dir.path(), test_options());
        assert!(matches!(second, Err(Status::InvalidArgument(_))));
        drop(engine);
        // Closing the first connection frees the path again.
        Engine::open(dir.path(), test_options()).unwrap();
    }

    #[test]
    fn commits_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let engine = Engine::open(dir.path(), test_options()).unwrap();
            engine
                .commit(
                    vec![LogEntry::Put {
                        key: b"k".to_vec(),
                        value: b"v".to_vec(),
                    }],
                    true,
                )
                .unwrap();
        }
        let engine = Engine::open(dir.path(), test_options()).unwrap();
        assert_eq!(engine.get(b"k"), Some(b"v".to_vec()));
    }

    #[test]
    fn destroy_refuses_open_database() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("db");
        let engine = Engine::open(&db_path, test_options()).unwrap();
        assert!(matches!(
            destroy(&db_path),
            Err(Status::InvalidArgument(_))
        ));
        drop(engine);
        destroy(&db_path).unwrap();
        assert!(!db_path.exists());
    }

    #[test]
    fn foreign_comparator_orders_keys() {
        unsafe extern "C" fn reversed(
            _state: *mut c_void,
            a: *const u8,
            alen: usize,
            b: *const u8,
            blen: usize,
        ) -> c_int {
            let a = std::slice::from_raw_parts(a, alen);
            let b = std::slice::from_raw_parts(b, blen);
            match b.cmp(a) {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            }
        }

        let dir = TempDir::new().unwrap();
        let mut opts = test_options();
        opts.comparator = Arc::new(KeyComparator::Foreign {
            state: std::ptr::null_mut(),
            compare: reversed,
        });
        let engine = Engine::open(dir.path(), opts).unwrap();
        engine
            .commit(
                vec![
                    LogEntry::Put {
                        key: b"a".to_vec(),
                        value: b"1".to_vec(),
                    },
                    LogEntry::Put {
                        key: b"b".to_vec(),
                        value: b"2".to_vec(),
                    },
                ],
                false,
            )
            .unwrap();
        let keys: Vec<_> = engine.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"a".to_vec()]);
    }
}
