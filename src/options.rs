use std::cmp::Ordering;
use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::slice;
use std::sync::Arc;

use crate::error::Result;
use crate::raw::{
    self, RawCache, RawComparator, RawEnv, RawFilterPolicy, RawOptions, RawReadOptions,
    RawWriteOptions,
};
use crate::snapshot::Snapshot;

/// Compression mode forwarded to the engine.
///
/// The engine may fall back to storing blocks uncompressed when the chosen
/// codec is unavailable, so this is a preference, not a format guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Snappy,
}

impl Compression {
    fn to_raw(self) -> c_int {
        match self {
            Compression::None => raw::COMPRESSION_NONE,
            Compression::Snappy => raw::COMPRESSION_SNAPPY,
        }
    }
}

/// Block cache attached to an options bundle.
pub struct Cache {
    pub(crate) raw: *mut RawCache,
}

// The raw handle is only ever read by the engine; the wrapper itself holds
// no interior mutability.
unsafe impl Send for Cache {}
unsafe impl Sync for Cache {}

impl Cache {
    /// LRU cache bounded by `capacity` bytes.
    pub fn new_lru(capacity: usize) -> Cache {
        Cache {
            raw: unsafe { raw::sdb_cache_create_lru(capacity) },
        }
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        unsafe { raw::sdb_cache_destroy(self.raw) };
    }
}

/// Filter policy attached to an options bundle.
pub struct FilterPolicy {
    pub(crate) raw: *mut RawFilterPolicy,
}

unsafe impl Send for FilterPolicy {}
unsafe impl Sync for FilterPolicy {}

impl FilterPolicy {
    /// Bloom filter with the given number of bits per key.
    pub fn bloom(bits_per_key: i32) -> FilterPolicy {
        FilterPolicy {
            raw: unsafe { raw::sdb_filterpolicy_create_bloom(bits_per_key) },
        }
    }
}

impl Drop for FilterPolicy {
    fn drop(&mut self) {
        unsafe { raw::sdb_filterpolicy_destroy(self.raw) };
    }
}

/// Engine environment attached to an options bundle.
pub struct Env {
    pub(crate) raw: *mut RawEnv,
}

unsafe impl Send for Env {}
unsafe impl Sync for Env {}

impl Env {
    /// The engine's default environment.
    pub fn default_env() -> Env {
        Env {
            raw: unsafe { raw::sdb_env_create() },
        }
    }
}

impl Drop for Env {
    fn drop(&mut self) {
        unsafe { raw::sdb_env_destroy(self.raw) };
    }
}

// State handed to the engine through the comparator's state pointer.
struct ComparatorState {
    name: CString,
    compare: Box<dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync>,
}

unsafe extern "C" fn comparator_compare(
    state: *mut c_void,
    a: *const u8,
    alen: usize,
    b: *const u8,
    blen: usize,
) -> c_int {
    let state = &*(state as *const ComparatorState);
    let a = if alen == 0 {
        &[][..]
    } else {
        slice::from_raw_parts(a, alen)
    };
    let b = if blen == 0 {
        &[][..]
    } else {
        slice::from_raw_parts(b, blen)
    };
    match (state.compare)(a, b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

unsafe extern "C" fn comparator_name(state: *mut c_void) -> *const c_char {
    (*(state as *const ComparatorState)).name.as_ptr()
}

unsafe extern "C" fn comparator_destructor(state: *mut c_void) {
    drop(Box::from_raw(state as *mut ComparatorState));
}

/// Caller-supplied key ordering.
///
/// The same ordering must be used on every open of a path that was first
/// created with it; the engine owns that invariant and this layer does not
/// police it.
pub struct Comparator {
    pub(crate) raw: *mut RawComparator,
}

unsafe impl Send for Comparator {}
unsafe impl Sync for Comparator {}

impl Comparator {
    pub fn new<F>(name: &str, compare: F) -> Comparator
    where
        F: Fn(&[u8], &[u8]) -> Ordering + Send + Sync + 'static,
    {
        let state = Box::new(ComparatorState {
            name: CString::new(name).unwrap_or_else(|_| CString::from(c"comparator")),
            compare: Box::new(compare),
        });
        let raw = unsafe {
            raw::sdb_comparator_create(
                Box::into_raw(state) as *mut c_void,
                comparator_destructor,
                comparator_compare,
                comparator_name,
            )
        };
        Comparator { raw }
    }
}

impl Drop for Comparator {
    fn drop(&mut self) {
        unsafe { raw::sdb_comparator_destroy(self.raw) };
    }
}

/// Strong references to the auxiliary objects an options bundle carries.
/// A database opened with the bundle clones these, so the objects live at
/// least as long as every connection that used them.
#[derive(Default)]
pub(crate) struct AuxObjects {
    pub(crate) cache: Option<Arc<Cache>>,
    pub(crate) filter_policy: Option<Arc<FilterPolicy>>,
    pub(crate) comparator: Option<Arc<Comparator>>,
    pub(crate) env: Option<Arc<Env>>,
}

impl Clone for AuxObjects {
    fn clone(&self) -> AuxObjects {
        AuxObjects {
            cache: self.cache.clone(),
            filter_policy: self.filter_policy.clone(),
            comparator: self.comparator.clone(),
            env: self.env.clone(),
        }
    }
}

/// Configuration for opening a database.
///
/// Each named field maps 1:1 to a native setter. Attaching a cache, filter
/// policy, comparator, or environment makes the bundle a co-owner of the
/// object in addition to forwarding its pointer.
pub struct Options {
    raw: *mut RawOptions,
    aux: AuxObjects,
}

unsafe impl Send for Options {}
unsafe impl Sync for Options {}

impl Options {
    pub fn new() -> Options {
        Options {
            raw: unsafe { raw::sdb_options_create() },
            aux: AuxObjects::default(),
        }
    }

    /// Create the database directory when it does not exist yet.
    pub fn create_if_missing(&mut self, v: bool) -> &mut Options {
        unsafe { raw::sdb_options_set_create_if_missing(self.raw, v as u8) };
        self
    }

    /// Refuse to open a database that already exists.
    pub fn error_if_exists(&mut self, v: bool) -> &mut Options {
        unsafe { raw::sdb_options_set_error_if_exists(self.raw, v as u8) };
        self
    }

    /// Treat any detected corruption as an open failure instead of
    /// recovering past it.
    pub fn paranoid_checks(&mut self, v: bool) -> &mut Options {
        unsafe { raw::sdb_options_set_paranoid_checks(self.raw, v as u8) };
        self
    }

    pub fn compression(&mut self, mode: Compression) -> &mut Options {
        unsafe { raw::sdb_options_set_compression(self.raw, mode.to_raw()) };
        self
    }

    pub fn write_buffer_size(&mut self, size: usize) -> &mut Options {
        unsafe { raw::sdb_options_set_write_buffer_size(self.raw, size) };
        self
    }

    pub fn max_open_files(&mut self, n: i32) -> &mut Options {
        unsafe { raw::sdb_options_set_max_open_files(self.raw, n) };
        self
    }

    pub fn block_size(&mut self, size: usize) -> &mut Options {
        unsafe { raw::sdb_options_set_block_size(self.raw, size) };
        self
    }

    pub fn cache(&mut self, cache: Cache) -> &mut Options {
        unsafe { raw::sdb_options_set_cache(self.raw, cache.raw) };
        self.aux.cache = Some(Arc::new(cache));
        self
    }

    pub fn filter_policy(&mut self, policy: FilterPolicy) -> &mut Options {
        unsafe { raw::sdb_options_set_filter_policy(self.raw, policy.raw) };
        self.aux.filter_policy = Some(Arc::new(policy));
        self
    }

    pub fn comparator(&mut self, comparator: Comparator) -> &mut Options {
        unsafe { raw::sdb_options_set_comparator(self.raw, comparator.raw) };
        self.aux.comparator = Some(Arc::new(comparator));
        self
    }

    pub fn env(&mut self, env: Env) -> &mut Options {
        unsafe { raw::sdb_options_set_env(self.raw, env.raw) };
        self.aux.env = Some(Arc::new(env));
        self
    }

    pub(crate) fn raw(&self) -> *const RawOptions {
        self.raw
    }

    pub(crate) fn aux(&self) -> AuxObjects {
        self.aux.clone()
    }
}

impl Default for Options {
    fn default() -> Options {
        Options::new()
    }
}

impl Drop for Options {
    fn drop(&mut self) {
        unsafe { raw::sdb_options_destroy(self.raw) };
    }
}

/// Per-read configuration, constructed fresh at each call site.
pub struct ReadOptions<'s> {
    /// Verify checksums of every block touched by the read.
    pub verify_checksums: bool,
    /// Let the read populate the block cache.
    pub fill_cache: bool,
    /// Read from this point-in-time view instead of the live state.
    pub snapshot: Option<&'s Snapshot<'s>>,
}

impl<'s> ReadOptions<'s> {
    pub fn new() -> ReadOptions<'s> {
        ReadOptions {
            verify_checksums: false,
            fill_cache: true,
            snapshot: None,
        }
    }

    pub(crate) fn to_raw(&self) -> Result<RawReadOptions> {
        let snapshot = match self.snapshot {
            Some(snapshot) => snapshot.as_raw()?,
            None => ptr::null(),
        };
        Ok(RawReadOptions {
            verify_checksums: self.verify_checksums,
            fill_cache: self.fill_cache,
            snapshot,
        })
    }
}

impl<'s> Default for ReadOptions<'s> {
    fn default() -> ReadOptions<'s> {
        ReadOptions::new()
    }
}

/// Per-write configuration, constructed fresh at each call site.
#[derive(Default)]
pub struct WriteOptions {
    /// Force the commit to physical storage before the write returns.
    pub sync: bool,
}

impl WriteOptions {
    pub fn new() -> WriteOptions {
        WriteOptions { sync: false }
    }

    pub(crate) fn to_raw(&self) -> RawWriteOptions {
        RawWriteOptions { sync: self.sync }
    }
}
