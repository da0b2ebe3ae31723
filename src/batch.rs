use std::os::raw::c_void;
use std::slice;

use crate::codec::Codec;
use crate::raw::{self, RawWriteBatch};

/// One buffered operation, handed to a [`WriteBatch::iterate`] visitor.
#[derive(Debug, PartialEq, Eq)]
pub enum BatchEntry<'a> {
    Put { key: &'a [u8], value: &'a [u8] },
    Delete { key: &'a [u8] },
}

/// An ordered sequence of puts and deletes applied atomically by
/// [`Database::write`](crate::Database::write).
///
/// A batch buffers natively and has no tie to any database until it is
/// written; the same batch may be applied to several databases in turn.
pub struct WriteBatch {
    raw: *mut RawWriteBatch,
}

impl WriteBatch {
    pub fn new() -> WriteBatch {
        WriteBatch {
            raw: unsafe { raw::sdb_writebatch_create() },
        }
    }

    /// Buffer a put; the key and value are copied into the batch.
    pub fn put<K: Codec, V: Codec>(&mut self, key: &K, value: &V) {
        let k = key.encode();
        let v = value.encode();
        unsafe {
            raw::sdb_writebatch_put(self.raw, k.as_ptr(), k.len(), v.as_ptr(), v.len());
        }
    }

    /// Buffer a delete.
    pub fn delete<K: Codec>(&mut self, key: &K) {
        let k = key.encode();
        unsafe { raw::sdb_writebatch_delete(self.raw, k.as_ptr(), k.len()) };
    }

    /// Drop all buffered operations; the batch stays usable.
    pub fn clear(&mut self) {
        unsafe { raw::sdb_writebatch_clear(self.raw) };
    }

    pub fn len(&self) -> usize {
        unsafe { raw::sdb_writebatch_count(self.raw) }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replay the buffered operations in insertion order.
    pub fn iterate<F>(&self, mut visitor: F)
    where
        F: FnMut(BatchEntry<'_>),
    {
        let state = &mut visitor as *mut F as *mut c_void;
        unsafe { raw::sdb_writebatch_iterate(self.raw, state, replay_put::<F>, replay_delete::<F>) };
    }

    pub(crate) fn raw(&self) -> *mut RawWriteBatch {
        self.raw
    }
}

impl Default for WriteBatch {
    fn default() -> WriteBatch {
        WriteBatch::new()
    }
}

impl Drop for WriteBatch {
    fn drop(&mut self) {
        unsafe { raw::sdb_writebatch_destroy(self.raw) };
    }
}

unsafe fn span<'a>(ptr: *const u8, len: usize) -> &'a [u8] {
    if len == 0 {
        &[]
    } else {
        slice::from_raw_parts(ptr, len)
    }
}

// Trampolines bridging the engine's two-callback replay convention onto a
// single closure.
unsafe extern "C" fn replay_put<F>(
    state: *mut c_void,
    key: *const u8,
    keylen: usize,
    val: *const u8,
    vallen: usize,
) where
    F: FnMut(BatchEntry<'_>),
{
    let visitor = &mut *(state as *mut F);
    visitor(BatchEntry::Put {
        key: span(key, keylen),
        value: span(val, vallen),
    });
}

unsafe extern "C" fn replay_delete<F>(state: *mut c_void, key: *const u8, keylen: usize)
where
    F: FnMut(BatchEntry<'_>),
{
    let visitor = &mut *(state as *mut F);
    visitor(BatchEntry::Delete {
        key: span(key, keylen),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterate_replays_in_insertion_order() {
        let mut batch = WriteBatch::new();
        batch.put(&"a", &"1");
        batch.delete(&"b");
        batch.put(&"c", &"3");
        assert_eq!(batch.len(), 3);

        let mut seen = Vec::new();
        batch.iterate(|entry| match entry {
            BatchEntry::Put { key, value } => {
                seen.push((key.to_vec(), Some(value.to_vec())));
            }
            BatchEntry::Delete { key } => seen.push((key.to_vec(), None)),
        });
        assert_eq!(
            seen,
            vec![
                (b"a".to_vec(), Some(b"1".to_vec())),
                (b"b".to_vec(), None),
                (b"c".to_vec(), Some(b"3".to_vec())),
            ]
        );
    }

    #[test]
    fn clear_empties_without_consuming() {
        let mut batch = WriteBatch::new();
        batch.put(&"k", &"v");
        assert!(!batch.is_empty());
        batch.clear();
        assert!(batch.is_empty());
        batch.put(&"k2", &"v2");
        assert_eq!(batch.len(), 1);
    }
}
