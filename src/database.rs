use std::ffi::CString;
use std::os::raw::c_char;
use std::path::{Path, PathBuf};
use std::ptr;

use crate::batch::WriteBatch;
use crate::codec::Codec;
use crate::error::{consume_error, Error, Result};
use crate::iterator::Iter;
use crate::options::{AuxObjects, Options, ReadOptions, WriteOptions};
use crate::raw::{self, RawDb};
use crate::snapshot::Snapshot;
use crate::value::ByteView;

/// One connection to a database directory.
///
/// A handle moves `Closed -> Open -> Closed`: it is born open, every
/// operation on it after [`close`](Database::close) fails with
/// `InvalidState`, and closing releases the native connection exactly once.
/// Concurrent reads through one handle are fine; writers are serialized by
/// the engine, not by a lock in this layer.
pub struct Database {
    raw: *mut RawDb,
    path: PathBuf,
    // Co-owned auxiliary objects from the options bundle; they must outlive
    // the connection because the engine holds their pointers.
    _aux: AuxObjects,
}

// The engine guards its state internally and the aux objects are required
// to be Send + Sync by their constructors.
unsafe impl Send for Database {}
unsafe impl Sync for Database {}

impl Database {
    /// Open the database at `path` with the given options.
    pub fn open<P: AsRef<Path>>(path: P, options: &Options) -> Result<Database> {
        let path = path.as_ref().to_path_buf();
        let c_path = path_to_cstring(&path)?;

        let mut err: *mut c_char = ptr::null_mut();
        let raw = unsafe { raw::sdb_open(options.raw(), c_path.as_ptr(), &mut err) };
        match unsafe { consume_error(err) } {
            Ok(()) => {}
            Err(Error::Engine(message)) => return Err(Error::Open { path, message }),
            Err(other) => return Err(other),
        }
        if raw.is_null() {
            // The engine gave neither a handle nor a message.
            return Err(Error::Open {
                path,
                message: "open failed for an unspecified reason".into(),
            });
        }

        Ok(Database {
            raw,
            path,
            _aux: options.aux(),
        })
    }

    /// Close the connection. Idempotent and infallible; a dropped handle
    /// closes itself the same way.
    pub fn close(&mut self) {
        if !self.raw.is_null() {
            unsafe { raw::sdb_close(self.raw) };
            self.raw = ptr::null_mut();
        }
    }

    pub fn is_open(&self) -> bool {
        !self.raw.is_null()
    }

    /// Path this handle was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn raw_handle(&self) -> Result<*mut RawDb> {
        if self.raw.is_null() {
            return Err(Error::InvalidState("database is closed"));
        }
        Ok(self.raw)
    }

    /// Store `value` under `key`.
    pub fn put<K: Codec, V: Codec>(
        &self,
        options: &WriteOptions,
        key: &K,
        value: &V,
    ) -> Result<()> {
        let handle = self.raw_handle()?;
        let raw_opts = options.to_raw();
        let k = key.encode();
        let v = value.encode();
        let mut err = ptr::null_mut();
        unsafe {
            raw::sdb_put(
                handle,
                &raw_opts,
                k.as_ptr(),
                k.len(),
                v.as_ptr(),
                v.len(),
                &mut err,
            );
            consume_error(err)
        }
    }

    /// Remove `key`. Deleting an absent key is not an error.
    pub fn delete<K: Codec>(&self, options: &WriteOptions, key: &K) -> Result<()> {
        let handle = self.raw_handle()?;
        let raw_opts = options.to_raw();
        let k = key.encode();
        let mut err = ptr::null_mut();
        unsafe {
            raw::sdb_delete(handle, &raw_opts, k.as_ptr(), k.len(), &mut err);
            consume_error(err)
        }
    }

    /// Look up `key`, returning `default` when it is absent.
    ///
    /// Absence is success, never an error. A stored span that cannot
    /// satisfy `V`'s shape is an `Encoding` failure.
    pub fn get<K: Codec, V: Codec>(
        &self,
        options: &ReadOptions<'_>,
        key: &K,
        default: V,
    ) -> Result<V> {
        let handle = self.raw_handle()?;
        let raw_opts = options.to_raw()?;
        let k = key.encode();
        let mut vallen = 0usize;
        let mut err = ptr::null_mut();
        let value =
            unsafe { raw::sdb_get(handle, &raw_opts, k.as_ptr(), k.len(), &mut vallen, &mut err) };
        unsafe { consume_error(err) }?;
        if value.is_null() {
            return Ok(default);
        }
        // The engine allocated the span; the view releases it exactly once
        // when it goes out of scope.
        let view = unsafe { ByteView::from_owned(value, vallen) };
        V::decode(view.as_bytes()?)
    }

    /// Apply `batch` atomically: every entry becomes visible together, or
    /// none do.
    pub fn write(&self, options: &WriteOptions, batch: &WriteBatch) -> Result<()> {
        let handle = self.raw_handle()?;
        let raw_opts = options.to_raw();
        let mut err = ptr::null_mut();
        unsafe {
            raw::sdb_write(handle, &raw_opts, batch.raw(), &mut err);
            consume_error(err)
        }
    }

    /// Take a point-in-time read token.
    pub fn snapshot(&self) -> Result<Snapshot<'_>> {
        Snapshot::create(self)
    }

    /// Create an iterator over a consistent view of the database.
    pub fn iter(&self, options: &ReadOptions<'_>) -> Result<Iter<'_>> {
        Iter::create(self, options)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.close();
    }
}

/// Remove the database directory at `path`.
///
/// Must not run against a path with a live connection; the engine refuses
/// it. A path that never existed destroys to nothing successfully.
pub fn destroy<P: AsRef<Path>>(path: P, options: &Options) -> Result<()> {
    let c_path = path_to_cstring(path.as_ref())?;
    let mut err = ptr::null_mut();
    unsafe {
        raw::sdb_destroy_db(options.raw(), c_path.as_ptr(), &mut err);
        consume_error(err)
    }
}

/// Recover as much of the database at `path` as is well-formed, dropping a
/// torn tail if the process died mid-commit.
pub fn repair<P: AsRef<Path>>(path: P, options: &Options) -> Result<()> {
    let c_path = path_to_cstring(path.as_ref())?;
    let mut err = ptr::null_mut();
    unsafe {
        raw::sdb_repair_db(options.raw(), c_path.as_ptr(), &mut err);
        consume_error(err)
    }
}

fn path_to_cstring(path: &Path) -> Result<CString> {
    CString::new(path.to_string_lossy().into_owned()).map_err(|_| Error::Open {
        path: path.to_path_buf(),
        message: "path contains an interior nul byte".into(),
    })
}
