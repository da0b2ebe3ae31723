use std::mem;
use std::slice;

use crate::error::{Error, Result};
use crate::raw;

/// Ownership-aware view over a contiguous byte range crossing the engine
/// boundary.
///
/// A view is either a pure borrow of caller memory, never released, or the
/// owner of an engine-allocated buffer that is handed back to the engine's
/// free routine exactly once. After release the view is invalid and every
/// dereference is rejected.
#[derive(Debug)]
pub struct ByteView {
    ptr: *const u8,
    len: usize,
    owned: bool,
    released: bool,
}

impl ByteView {
    /// Wrap caller memory without taking ownership.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` readable bytes that outlive every
    /// dereference of the view. The view carries no lifetime of its own.
    pub unsafe fn from_borrowed(ptr: *const u8, len: usize) -> ByteView {
        ByteView {
            ptr,
            len,
            owned: false,
            released: false,
        }
    }

    /// Wrap an engine-allocated buffer, promising to release it exactly once.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation of `len` bytes made by the engine,
    /// not yet released, and must not be released by anyone else.
    pub unsafe fn from_owned(ptr: *const u8, len: usize) -> ByteView {
        ByteView {
            ptr,
            len,
            owned: true,
            released: false,
        }
    }

    /// Number of bytes visible through the view.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True for views that own their buffer.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Read-only slice bounded by the view's length.
    pub fn as_bytes(&self) -> Result<&[u8]> {
        if self.released {
            return Err(Error::InvalidState("byte view already released"));
        }
        if self.len == 0 {
            return Ok(&[]);
        }
        Ok(unsafe { slice::from_raw_parts(self.ptr, self.len) })
    }

    /// Reinterpret the leading bytes of the view as `T`.
    ///
    /// Fails when the view is shorter than `T`; never reads out of bounds.
    /// The read is unaligned, so `T` may start anywhere in the buffer.
    pub fn as_typed<T: Copy>(&self) -> Result<T> {
        if self.released {
            return Err(Error::InvalidState("byte view already released"));
        }
        if mem::size_of::<T>() > self.len {
            return Err(Error::encoding(format!(
                "span of {} bytes is too small for a {}-byte target",
                self.len,
                mem::size_of::<T>()
            )));
        }
        Ok(unsafe { (self.ptr as *const T).read_unaligned() })
    }

    /// Hand an owning view's buffer back to the engine.
    ///
    /// Safe to call more than once: the second call finds the view already
    /// released and does nothing, so a double free cannot happen. Borrowed
    /// views ignore release entirely.
    pub fn release(&mut self) {
        if self.released || !self.owned {
            return;
        }
        self.released = true;
        // Owned buffers go back through the engine's own free routine,
        // never a generic allocator.
        unsafe { raw::sdb_free(self.ptr as *mut u8, self.len) };
    }
}

impl Drop for ByteView {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrowed_view_reads_in_bounds() {
        let data = [1u8, 2, 3, 4];
        let view = unsafe { ByteView::from_borrowed(data.as_ptr(), data.len()) };
        assert_eq!(view.as_bytes().unwrap(), &data);
        assert_eq!(view.len(), 4);
        assert!(!view.is_owned());
    }

    #[test]
    fn typed_read_rejects_short_span() {
        let data = [7u8, 0];
        let view = unsafe { ByteView::from_borrowed(data.as_ptr(), data.len()) };
        assert_eq!(view.as_typed::<u16>().unwrap(), 7u16.to_le());
        assert!(matches!(
            view.as_typed::<u64>(),
            Err(Error::Encoding(_))
        ));
    }

    #[test]
    fn owned_view_releases_once() {
        // Allocate through the raw layer so release has something to free.
        let buf = vec![9u8; 16].into_boxed_slice();
        let len = buf.len();
        let ptr = Box::into_raw(buf) as *mut u8;
        let mut view = unsafe { ByteView::from_owned(ptr, len) };
        assert_eq!(view.as_bytes().unwrap().len(), 16);
        view.release();
        assert!(matches!(
            view.as_bytes(),
            Err(Error::InvalidState(_))
        ));
        // Second release is a caught no-op, drop is a third.
        view.release();
    }

    #[test]
    fn empty_view_is_valid() {
        let view = unsafe { ByteView::from_borrowed(std::ptr::null(), 0) };
        assert!(view.as_bytes().unwrap().is_empty());
    }
}
