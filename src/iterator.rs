use std::marker::PhantomData;
use std::ptr;
use std::slice;

use crate::codec::Codec;
use crate::database::Database;
use crate::error::{consume_error, Error, Result};
use crate::options::ReadOptions;
use crate::raw::{self, RawIterator};

/// Ordered iterator over a consistent view of the database.
///
/// A fresh iterator is unpositioned; position it with [`seek_to_first`],
/// [`seek_to_last`], or [`seek`] before reading. The spans returned by
/// [`key`] and [`value`] stay valid until the next positioning call, which
/// the borrow on `&self` enforces.
///
/// [`seek_to_first`]: Iter::seek_to_first
/// [`seek_to_last`]: Iter::seek_to_last
/// [`seek`]: Iter::seek
/// [`key`]: Iter::key
/// [`value`]: Iter::value
pub struct Iter<'db> {
    raw: *mut RawIterator,
    _db: PhantomData<&'db Database>,
}

impl<'db> Iter<'db> {
    pub(crate) fn create(db: &'db Database, options: &ReadOptions<'_>) -> Result<Iter<'db>> {
        let handle = db.raw_handle()?;
        let raw_opts = options.to_raw()?;
        let raw = unsafe { raw::sdb_create_iterator(handle, &raw_opts) };
        Ok(Iter {
            raw,
            _db: PhantomData,
        })
    }

    /// True while the iterator is positioned on an entry.
    pub fn valid(&self) -> bool {
        unsafe { raw::sdb_iter_valid(self.raw) != 0 }
    }

    /// Position at the first entry in comparator order, or exhaust the
    /// iterator when the database is empty.
    pub fn seek_to_first(&mut self) {
        unsafe { raw::sdb_iter_seek_to_first(self.raw) };
    }

    /// Position at the last entry in comparator order.
    pub fn seek_to_last(&mut self) {
        unsafe { raw::sdb_iter_seek_to_last(self.raw) };
    }

    /// Position at the first entry whose key is >= `key` in the
    /// comparator's order.
    pub fn seek<K: Codec>(&mut self, key: &K) {
        let k = key.encode();
        unsafe { raw::sdb_iter_seek(self.raw, k.as_ptr(), k.len()) };
    }

    /// Advance to the next entry; may exhaust the iterator.
    pub fn next(&mut self) -> Result<()> {
        self.ensure_positioned()?;
        unsafe { raw::sdb_iter_next(self.raw) };
        Ok(())
    }

    /// Step back to the previous entry; may exhaust the iterator.
    pub fn prev(&mut self) -> Result<()> {
        self.ensure_positioned()?;
        unsafe { raw::sdb_iter_prev(self.raw) };
        Ok(())
    }

    /// Key span of the current entry, valid until the next positioning
    /// call.
    pub fn key(&self) -> Result<&[u8]> {
        let mut len = 0usize;
        let ptr = unsafe { raw::sdb_iter_key(self.raw, &mut len) };
        if ptr.is_null() {
            return Err(Error::InvalidState("iterator is not positioned on an entry"));
        }
        Ok(unsafe { borrowed_span(ptr, len) })
    }

    /// Value span of the current entry, valid until the next positioning
    /// call.
    pub fn value(&self) -> Result<&[u8]> {
        let mut len = 0usize;
        let ptr = unsafe { raw::sdb_iter_value(self.raw, &mut len) };
        if ptr.is_null() {
            return Err(Error::InvalidState("iterator is not positioned on an entry"));
        }
        Ok(unsafe { borrowed_span(ptr, len) })
    }

    /// Decode the current key through its codec.
    pub fn key_as<K: Codec>(&self) -> Result<K> {
        K::decode(self.key()?)
    }

    /// Decode the current value through its codec.
    pub fn value_as<V: Codec>(&self) -> Result<V> {
        V::decode(self.value()?)
    }

    /// Surface any error the engine discovered lazily during traversal.
    pub fn status(&self) -> Result<()> {
        let mut err = ptr::null_mut();
        unsafe {
            raw::sdb_iter_get_error(self.raw, &mut err);
            consume_error(err)
        }
    }

    fn ensure_positioned(&self) -> Result<()> {
        if !self.valid() {
            return Err(Error::InvalidState("iterator is not positioned on an entry"));
        }
        Ok(())
    }
}

impl Drop for Iter<'_> {
    fn drop(&mut self) {
        unsafe { raw::sdb_iter_destroy(self.raw) };
    }
}

unsafe fn borrowed_span<'a>(ptr: *const u8, len: usize) -> &'a [u8] {
    if len == 0 {
        &[]
    } else {
        slice::from_raw_parts(ptr, len)
    }
}
