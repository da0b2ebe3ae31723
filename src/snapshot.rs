use crate::database::Database;
use crate::error::{Error, Result};
use crate::raw::{self, RawSnapshot};

/// A point-in-time read token.
///
/// Reads through a [`ReadOptions`](crate::ReadOptions) carrying a snapshot
/// see the database exactly as it was when the snapshot was taken. The
/// borrow of the database keeps release ordering honest: a snapshot cannot
/// outlive its connection, so it is necessarily released before close.
pub struct Snapshot<'db> {
    db: &'db Database,
    raw: *const RawSnapshot,
    released: bool,
}

impl<'db> Snapshot<'db> {
    pub(crate) fn create(db: &'db Database) -> Result<Snapshot<'db>> {
        let handle = db.raw_handle()?;
        let raw = unsafe { raw::sdb_create_snapshot(handle) };
        Ok(Snapshot {
            db,
            raw,
            released: false,
        })
    }

    /// Hand the token back to the engine.
    ///
    /// Idempotent: further calls (and the drop at scope end) find the
    /// snapshot already released and do nothing. Reads that still hold the
    /// snapshot in their options fail with `InvalidState` afterwards.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Ok(handle) = self.db.raw_handle() {
            unsafe { raw::sdb_release_snapshot(handle, self.raw) };
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub(crate) fn as_raw(&self) -> Result<*const RawSnapshot> {
        if self.released {
            return Err(Error::InvalidState("snapshot already released"));
        }
        Ok(self.raw)
    }
}

impl Drop for Snapshot<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
