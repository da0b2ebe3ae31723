use std::ffi::{CStr, CString};
use std::io;
use std::os::raw::c_char;
use std::path::PathBuf;
use std::result;

use thiserror::Error;

/// Custom result type for shaledb operations
pub type Result<T> = result::Result<T, Error>;

/// Errors surfaced by the binding layer.
///
/// Everything the engine reports crosses the boundary verbatim inside
/// `Engine`. Absence of a key is not an error anywhere in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The database at `path` could not be opened.
    #[error("cannot open database at {}: {}", .path.display(), .message)]
    Open {
        /// Path handed to the failed open.
        path: PathBuf,
        /// Engine message, or a generic note when the engine gave none.
        message: String,
    },

    /// A failure reported by the engine, message carried verbatim.
    #[error("engine error: {0}")]
    Engine(String),

    /// A typed value could not be encoded to or decoded from a byte span.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Operation attempted on a closed handle, an unpositioned iterator,
    /// or a released snapshot.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Filesystem failure in this layer's own bookkeeping.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Shorthand used by the codec impls.
    pub(crate) fn encoding(msg: impl Into<String>) -> Error {
        Error::Encoding(msg.into())
    }
}

/// Drains the engine's nullable out-error pointer.
///
/// Every fallible raw call takes `&mut errptr` where `errptr` starts null.
/// A null pointer after the call means success and nothing is freed. A
/// non-null pointer owns a heap string: the message is copied out, the
/// native string is freed, and the call reports failure. This runs at every
/// call site; there is no shared error state.
pub(crate) unsafe fn consume_error(errptr: *mut c_char) -> Result<()> {
    if errptr.is_null() {
        return Ok(());
    }
    let message = CStr::from_ptr(errptr).to_string_lossy().into_owned();
    // Reclaim the allocation made by the raw layer.
    drop(CString::from_raw(errptr));
    Err(Error::Engine(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn null_pointer_is_success() {
        assert!(unsafe { consume_error(ptr::null_mut()) }.is_ok());
    }

    #[test]
    fn message_is_copied_and_freed() {
        let native = CString::new("lock held by another process")
            .unwrap()
            .into_raw();
        let err = unsafe { consume_error(native) }.unwrap_err();
        match err {
            Error::Engine(msg) => assert_eq!(msg, "lock held by another process"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn display_includes_path() {
        let err = Error::Open {
            path: PathBuf::from("/tmp/t1"),
            message: "no such directory".into(),
        };
        assert!(err.to_string().contains("/tmp/t1"));
    }
}
