//! C-style surface of the engine: opaque handle pointers, pointer+length
//! buffers, and nullable out-error strings.
//!
//! Every fallible call takes `errptr: *mut *mut c_char`; a non-null result
//! owns a heap string the adapter in `error.rs` must free. Buffers returned
//! by `sdb_get` are engine allocations released through [`sdb_free`], never
//! a generic allocator. The safe layer above talks exclusively to this
//! module.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_uchar, c_void};
use std::path::PathBuf;
use std::ptr;
use std::slice;
use std::sync::Arc;

use bitflags::bitflags;
use log::debug;

use crate::constants::{DEFAULT_BLOCK_SIZE, DEFAULT_MAX_OPEN_FILES, DEFAULT_WRITE_BUFFER_SIZE};
use crate::engine::wal::LogEntry;
use crate::engine::{self, CompareFn, DestructorFn, Engine, EngineOptions, KeyComparator, NameFn, SnapshotView, Status};

pub(crate) const COMPRESSION_NONE: c_int = 0;
pub(crate) const COMPRESSION_SNAPPY: c_int = 1;

/// Opaque connection handle.
pub(crate) struct RawDb {
    engine: Engine,
}

/// Opaque options handle mutated through the `sdb_options_set_*` setters.
pub(crate) struct RawOptions {
    create_if_missing: bool,
    error_if_exists: bool,
    paranoid_checks: bool,
    compression: c_int,
    write_buffer_size: usize,
    max_open_files: c_int,
    block_size: usize,
    cache: *mut RawCache,
    filter_policy: *mut RawFilterPolicy,
    comparator: *mut RawComparator,
    env: *mut RawEnv,
}

impl Default for RawOptions {
    fn default() -> RawOptions {
        RawOptions {
            create_if_missing: false,
            error_if_exists: false,
            paranoid_checks: false,
            compression: COMPRESSION_SNAPPY,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            block_size: DEFAULT_BLOCK_SIZE,
            cache: ptr::null_mut(),
            filter_policy: ptr::null_mut(),
            comparator: ptr::null_mut(),
            env: ptr::null_mut(),
        }
    }
}

/// Per-read options, built fresh at each call site.
#[derive(Clone, Copy)]
pub(crate) struct RawReadOptions {
    pub verify_checksums: bool,
    pub fill_cache: bool,
    pub snapshot: *const RawSnapshot,
}

impl Default for RawReadOptions {
    fn default() -> RawReadOptions {
        RawReadOptions {
            verify_checksums: false,
            fill_cache: true,
            snapshot: ptr::null(),
        }
    }
}

/// Per-write options, built fresh at each call site.
#[derive(Clone, Copy, Default)]
pub(crate) struct RawWriteOptions {
    pub sync: bool,
}

/// Opaque buffered batch of mutations.
pub(crate) struct RawWriteBatch {
    entries: Vec<LogEntry>,
}

/// Opaque point-in-time read token.
pub(crate) struct RawSnapshot {
    view: SnapshotView,
}

/// Opaque block cache handle.
pub(crate) struct RawCache {
    capacity: usize,
}

/// Opaque filter policy handle.
pub(crate) struct RawFilterPolicy {
    bits_per_key: c_int,
}

/// Opaque comparator handle: a state pointer plus callbacks.
pub(crate) struct RawComparator {
    pub(crate) state: *mut c_void,
    pub(crate) destructor: DestructorFn,
    pub(crate) compare: CompareFn,
    pub(crate) name: NameFn,
}

/// Opaque environment handle.
pub(crate) struct RawEnv;

bitflags! {
    /// Cursor state of a raw iterator.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct IterFlags: u32 {
        const INITIALIZED = 0x01;
        const EOF = 0x02;
    }
}

/// Opaque iterator over a consistent ordered view.
pub(crate) struct RawIterator {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    cmp: Arc<KeyComparator>,
    pos: usize,
    flags: IterFlags,
}

impl RawIterator {
    fn current(&self) -> Option<&(Vec<u8>, Vec<u8>)> {
        if self.flags.contains(IterFlags::INITIALIZED) && !self.flags.contains(IterFlags::EOF) {
            self.entries.get(self.pos)
        } else {
            None
        }
    }
}

// Write a failure into the out-error pointer. The string is a CString
// allocation the adapter reclaims with CString::from_raw.
unsafe fn set_error(errptr: *mut *mut c_char, status: Status) {
    if errptr.is_null() {
        return;
    }
    let sanitized = status.to_string().replace('\0', "?");
    let message = CString::new(sanitized).unwrap_or_else(|_| CString::from(c"engine error"));
    *errptr = message.into_raw();
}

unsafe fn copy_in(ptr: *const u8, len: usize) -> Vec<u8> {
    if len == 0 {
        Vec::new()
    } else {
        slice::from_raw_parts(ptr, len).to_vec()
    }
}

// Hand a buffer to the caller; ownership transfers until sdb_free.
unsafe fn leak_buffer(bytes: Vec<u8>, len_out: *mut usize) -> *mut u8 {
    let boxed = bytes.into_boxed_slice();
    if !len_out.is_null() {
        *len_out = boxed.len();
    }
    Box::into_raw(boxed) as *mut u8
}

/// Release a buffer previously returned by this module.
pub(crate) unsafe fn sdb_free(ptr: *mut u8, len: usize) {
    if ptr.is_null() {
        return;
    }
    drop(Box::from_raw(slice::from_raw_parts_mut(ptr, len) as *mut [u8]));
}

// ---------------------------------------------------------------------------
// Options and auxiliary objects
// ---------------------------------------------------------------------------

pub(crate) unsafe fn sdb_options_create() -> *mut RawOptions {
    Box::into_raw(Box::new(RawOptions::default()))
}

pub(crate) unsafe fn sdb_options_destroy(options: *mut RawOptions) {
    if !options.is_null() {
        drop(Box::from_raw(options));
    }
}

pub(crate) unsafe fn sdb_options_set_create_if_missing(options: *mut RawOptions, v: c_uchar) {
    (*options).create_if_missing = v != 0;
}

pub(crate) unsafe fn sdb_options_set_error_if_exists(options: *mut RawOptions, v: c_uchar) {
    (*options).error_if_exists = v != 0;
}

pub(crate) unsafe fn sdb_options_set_paranoid_checks(options: *mut RawOptions, v: c_uchar) {
    (*options).paranoid_checks = v != 0;
}

pub(crate) unsafe fn sdb_options_set_compression(options: *mut RawOptions, mode: c_int) {
    (*options).compression = mode;
}

pub(crate) unsafe fn sdb_options_set_write_buffer_size(options: *mut RawOptions, size: usize) {
    (*options).write_buffer_size = size;
}

pub(crate) unsafe fn sdb_options_set_max_open_files(options: *mut RawOptions, n: c_int) {
    (*options).max_open_files = n;
}

pub(crate) unsafe fn sdb_options_set_block_size(options: *mut RawOptions, size: usize) {
    (*options).block_size = size;
}

pub(crate) unsafe fn sdb_options_set_cache(options: *mut RawOptions, cache: *mut RawCache) {
    (*options).cache = cache;
}

pub(crate) unsafe fn sdb_options_set_filter_policy(
    options: *mut RawOptions,
    policy: *mut RawFilterPolicy,
) {
    (*options).filter_policy = policy;
}

pub(crate) unsafe fn sdb_options_set_comparator(
    options: *mut RawOptions,
    comparator: *mut RawComparator,
) {
    (*options).comparator = comparator;
}

pub(crate) unsafe fn sdb_options_set_env(options: *mut RawOptions, env: *mut RawEnv) {
    (*options).env = env;
}

pub(crate) unsafe fn sdb_cache_create_lru(capacity: usize) -> *mut RawCache {
    Box::into_raw(Box::new(RawCache { capacity }))
}

pub(crate) unsafe fn sdb_cache_destroy(cache: *mut RawCache) {
    if !cache.is_null() {
        drop(Box::from_raw(cache));
    }
}

pub(crate) unsafe fn sdb_filterpolicy_create_bloom(bits_per_key: c_int) -> *mut RawFilterPolicy {
    Box::into_raw(Box::new(RawFilterPolicy { bits_per_key }))
}

pub(crate) unsafe fn sdb_filterpolicy_destroy(policy: *mut RawFilterPolicy) {
    if !policy.is_null() {
        drop(Box::from_raw(policy));
    }
}

pub(crate) unsafe fn sdb_comparator_create(
    state: *mut c_void,
    destructor: DestructorFn,
    compare: CompareFn,
    name: NameFn,
) -> *mut RawComparator {
    Box::into_raw(Box::new(RawComparator {
        state,
        destructor,
        compare,
        name,
    }))
}

pub(crate) unsafe fn sdb_comparator_destroy(comparator: *mut RawComparator) {
    if comparator.is_null() {
        return;
    }
    let comparator = Box::from_raw(comparator);
    (comparator.destructor)(comparator.state);
}

pub(crate) unsafe fn sdb_env_create() -> *mut RawEnv {
    Box::into_raw(Box::new(RawEnv))
}

pub(crate) unsafe fn sdb_env_destroy(env: *mut RawEnv) {
    if !env.is_null() {
        drop(Box::from_raw(env));
    }
}

// ---------------------------------------------------------------------------
// Connection lifecycle
// ---------------------------------------------------------------------------

unsafe fn comparator_name(comparator: &RawComparator) -> String {
    let name = (comparator.name)(comparator.state);
    if name.is_null() {
        String::from("<unnamed>")
    } else {
        CStr::from_ptr(name).to_string_lossy().into_owned()
    }
}

pub(crate) unsafe fn sdb_open(
    options: *const RawOptions,
    path: *const c_char,
    errptr: *mut *mut c_char,
) -> *mut RawDb {
    let defaults = RawOptions::default();
    let opts = options.as_ref().unwrap_or(&defaults);
    let path = PathBuf::from(CStr::from_ptr(path).to_string_lossy().into_owned());

    let comparator = if opts.comparator.is_null() {
        Arc::new(KeyComparator::Bytewise)
    } else {
        let c = &*opts.comparator;
        debug!("ordering {} with comparator {}", path.display(), comparator_name(c));
        Arc::new(KeyComparator::Foreign {
            state: c.state,
            compare: c.compare,
        })
    };

    if !opts.cache.is_null() {
        debug!("block cache capacity: {} bytes", (*opts.cache).capacity);
    }
    if !opts.filter_policy.is_null() {
        debug!("bloom filter: {} bits per key", (*opts.filter_policy).bits_per_key);
    }
    if !opts.env.is_null() {
        debug!("custom environment attached");
    }
    debug!(
        "open tuning: write_buffer_size={} block_size={} max_open_files={} compression={}",
        opts.write_buffer_size, opts.block_size, opts.max_open_files, opts.compression
    );

    match Engine::open(
        &path,
        EngineOptions {
            create_if_missing: opts.create_if_missing,
            error_if_exists: opts.error_if_exists,
            paranoid_checks: opts.paranoid_checks,
            comparator,
        },
    ) {
        Ok(engine) => Box::into_raw(Box::new(RawDb { engine })),
        Err(status) => {
            set_error(errptr, status);
            ptr::null_mut()
        }
    }
}

pub(crate) unsafe fn sdb_close(db: *mut RawDb) {
    if !db.is_null() {
        drop(Box::from_raw(db));
    }
}

// ---------------------------------------------------------------------------
// Reads and writes
// ---------------------------------------------------------------------------

pub(crate) unsafe fn sdb_put(
    db: *mut RawDb,
    options: *const RawWriteOptions,
    key: *const u8,
    keylen: usize,
    val: *const u8,
    vallen: usize,
    errptr: *mut *mut c_char,
) {
    let sync = options.as_ref().map(|o| o.sync).unwrap_or(false);
    let entry = LogEntry::Put {
        key: copy_in(key, keylen),
        value: copy_in(val, vallen),
    };
    if let Err(status) = (*db).engine.commit(vec![entry], sync) {
        set_error(errptr, status);
    }
}

pub(crate) unsafe fn sdb_delete(
    db: *mut RawDb,
    options: *const RawWriteOptions,
    key: *const u8,
    keylen: usize,
    errptr: *mut *mut c_char,
) {
    let sync = options.as_ref().map(|o| o.sync).unwrap_or(false);
    let entry = LogEntry::Delete {
        key: copy_in(key, keylen),
    };
    if let Err(status) = (*db).engine.commit(vec![entry], sync) {
        set_error(errptr, status);
    }
}

/// Returns an engine-allocated copy of the stored value, or null with
/// `*vallen == 0` when the key is absent. Absence is not an error; the
/// out-error pointer stays null for it.
pub(crate) unsafe fn sdb_get(
    db: *mut RawDb,
    options: *const RawReadOptions,
    key: *const u8,
    keylen: usize,
    vallen: *mut usize,
    _errptr: *mut *mut c_char,
) -> *mut u8 {
    let db = &*db;
    let key = copy_in(key, keylen);
    let value = match options.as_ref().filter(|o| !o.snapshot.is_null()) {
        Some(o) => (*o.snapshot).view.get(&db.engine.key(&key)),
        None => db.engine.get(&key),
    };
    match value {
        Some(value) => leak_buffer(value, vallen),
        None => {
            if !vallen.is_null() {
                *vallen = 0;
            }
            ptr::null_mut()
        }
    }
}

pub(crate) unsafe fn sdb_write(
    db: *mut RawDb,
    options: *const RawWriteOptions,
    batch: *mut RawWriteBatch,
    errptr: *mut *mut c_char,
) {
    let sync = options.as_ref().map(|o| o.sync).unwrap_or(false);
    let entries = (*batch).entries.clone();
    if let Err(status) = (*db).engine.commit(entries, sync) {
        set_error(errptr, status);
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

pub(crate) unsafe fn sdb_create_snapshot(db: *mut RawDb) -> *const RawSnapshot {
    Box::into_raw(Box::new(RawSnapshot {
        view: (*db).engine.snapshot(),
    }))
}

pub(crate) unsafe fn sdb_release_snapshot(_db: *mut RawDb, snapshot: *const RawSnapshot) {
    if !snapshot.is_null() {
        drop(Box::from_raw(snapshot as *mut RawSnapshot));
    }
}

// ---------------------------------------------------------------------------
// Iterators
// ---------------------------------------------------------------------------

pub(crate) unsafe fn sdb_create_iterator(
    db: *mut RawDb,
    options: *const RawReadOptions,
) -> *mut RawIterator {
    let db = &*db;
    let entries = match options.as_ref().filter(|o| !o.snapshot.is_null()) {
        Some(o) => (*o.snapshot).view.entries(),
        None => db.engine.entries(),
    };
    if let Some(o) = options.as_ref() {
        debug!(
            "iterator over {} entries (verify_checksums={} fill_cache={})",
            entries.len(),
            o.verify_checksums,
            o.fill_cache
        );
    }
    Box::into_raw(Box::new(RawIterator {
        entries,
        cmp: db.engine.comparator(),
        pos: 0,
        flags: IterFlags::empty(),
    }))
}

pub(crate) unsafe fn sdb_iter_destroy(iter: *mut RawIterator) {
    if !iter.is_null() {
        drop(Box::from_raw(iter));
    }
}

pub(crate) unsafe fn sdb_iter_valid(iter: *const RawIterator) -> c_uchar {
    (*iter).current().is_some() as c_uchar
}

pub(crate) unsafe fn sdb_iter_seek_to_first(iter: *mut RawIterator) {
    let it = &mut *iter;
    it.pos = 0;
    it.flags = if it.entries.is_empty() {
        IterFlags::INITIALIZED | IterFlags::EOF
    } else {
        IterFlags::INITIALIZED
    };
}

pub(crate) unsafe fn sdb_iter_seek_to_last(iter: *mut RawIterator) {
    let it = &mut *iter;
    if it.entries.is_empty() {
        it.pos = 0;
        it.flags = IterFlags::INITIALIZED | IterFlags::EOF;
    } else {
        it.pos = it.entries.len() - 1;
        it.flags = IterFlags::INITIALIZED;
    }
}

/// Position at the first entry whose key is >= the target in the
/// comparator's order.
pub(crate) unsafe fn sdb_iter_seek(iter: *mut RawIterator, key: *const u8, keylen: usize) {
    let it = &mut *iter;
    let target = if keylen == 0 {
        &[][..]
    } else {
        slice::from_raw_parts(key, keylen)
    };
    let pos = it
        .entries
        .partition_point(|(k, _)| it.cmp.compare(k, target) == std::cmp::Ordering::Less);
    it.pos = pos;
    it.flags = if pos < it.entries.len() {
        IterFlags::INITIALIZED
    } else {
        IterFlags::INITIALIZED | IterFlags::EOF
    };
}

pub(crate) unsafe fn sdb_iter_next(iter: *mut RawIterator) {
    let it = &mut *iter;
    if it.current().is_none() {
        return;
    }
    it.pos += 1;
    if it.pos >= it.entries.len() {
        it.flags |= IterFlags::EOF;
    }
}

pub(crate) unsafe fn sdb_iter_prev(iter: *mut RawIterator) {
    let it = &mut *iter;
    if it.current().is_none() {
        return;
    }
    if it.pos == 0 {
        it.flags |= IterFlags::EOF;
    } else {
        it.pos -= 1;
    }
}

/// Borrowed key span of the current entry; null when not positioned.
/// Valid until the next positioning call or destroy.
pub(crate) unsafe fn sdb_iter_key(iter: *const RawIterator, keylen: *mut usize) -> *const u8 {
    match (*iter).current() {
        Some((key, _)) => {
            *keylen = key.len();
            key.as_ptr()
        }
        None => {
            *keylen = 0;
            ptr::null()
        }
    }
}

/// Borrowed value span of the current entry; null when not positioned.
pub(crate) unsafe fn sdb_iter_value(iter: *const RawIterator, vallen: *mut usize) -> *const u8 {
    match (*iter).current() {
        Some((_, value)) => {
            *vallen = value.len();
            value.as_ptr()
        }
        None => {
            *vallen = 0;
            ptr::null()
        }
    }
}

/// Surface any error discovered lazily during traversal. Iteration over a
/// materialized view cannot fail, so the out-error stays null; a foreign
/// engine behind this surface would report corruption here.
pub(crate) unsafe fn sdb_iter_get_error(_iter: *const RawIterator, _errptr: *mut *mut c_char) {}

// ---------------------------------------------------------------------------
// Write batches
// ---------------------------------------------------------------------------

/// Callback invoked for each buffered put during batch replay.
pub(crate) type BatchPutFn = unsafe extern "C" fn(*mut c_void, *const u8, usize, *const u8, usize);
/// Callback invoked for each buffered delete during batch replay.
pub(crate) type BatchDeleteFn = unsafe extern "C" fn(*mut c_void, *const u8, usize);

pub(crate) unsafe fn sdb_writebatch_create() -> *mut RawWriteBatch {
    Box::into_raw(Box::new(RawWriteBatch {
        entries: Vec::new(),
    }))
}

pub(crate) unsafe fn sdb_writebatch_destroy(batch: *mut RawWriteBatch) {
    if !batch.is_null() {
        drop(Box::from_raw(batch));
    }
}

pub(crate) unsafe fn sdb_writebatch_clear(batch: *mut RawWriteBatch) {
    (*batch).entries.clear();
}

pub(crate) unsafe fn sdb_writebatch_count(batch: *const RawWriteBatch) -> usize {
    (*batch).entries.len()
}

pub(crate) unsafe fn sdb_writebatch_put(
    batch: *mut RawWriteBatch,
    key: *const u8,
    keylen: usize,
    val: *const u8,
    vallen: usize,
) {
    (*batch).entries.push(LogEntry::Put {
        key: copy_in(key, keylen),
        value: copy_in(val, vallen),
    });
}

pub(crate) unsafe fn sdb_writebatch_delete(batch: *mut RawWriteBatch, key: *const u8, keylen: usize) {
    (*batch).entries.push(LogEntry::Delete {
        key: copy_in(key, keylen),
    });
}

/// Replay buffered entries in insertion order through the caller's
/// callbacks.
pub(crate) unsafe fn sdb_writebatch_iterate(
    batch: *const RawWriteBatch,
    state: *mut c_void,
    put: BatchPutFn,
    deleted: BatchDeleteFn,
) {
    for entry in &(*batch).entries {
        match entry {
            LogEntry::Put { key, value } => {
                put(state, key.as_ptr(), key.len(), value.as_ptr(), value.len())
            }
            LogEntry::Delete { key } => deleted(state, key.as_ptr(), key.len()),
        }
    }
}

// ---------------------------------------------------------------------------
// Module-level maintenance
// ---------------------------------------------------------------------------

pub(crate) unsafe fn sdb_destroy_db(
    _options: *const RawOptions,
    path: *const c_char,
    errptr: *mut *mut c_char,
) {
    let path = PathBuf::from(CStr::from_ptr(path).to_string_lossy().into_owned());
    if let Err(status) = engine::destroy(&path) {
        set_error(errptr, status);
    }
}

pub(crate) unsafe fn sdb_repair_db(
    _options: *const RawOptions,
    path: *const c_char,
    errptr: *mut *mut c_char,
) {
    let path = PathBuf::from(CStr::from_ptr(path).to_string_lossy().into_owned());
    if let Err(status) = engine::repair(&path) {
        set_error(errptr, status);
    }
}
