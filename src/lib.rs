//! # shaledb
//!
//! A safe binding layer over an embedded, ordered, single-process
//! key-value engine with a C-style surface: opaque handles, pointer plus
//! length buffers, and nullable out-error strings.
//!
//! The layer turns that surface into structured results with deterministic,
//! exactly-once release of every native resource. Typed keys and values
//! flow through an explicit shape-driven codec, and every byte span that
//! crosses the boundary travels in an ownership-aware [`ByteView`].
//!
//! ```no_run
//! use shaledb::{Database, Options, ReadOptions, WriteOptions};
//!
//! # fn main() -> shaledb::Result<()> {
//! let mut options = Options::new();
//! options.create_if_missing(true);
//! let db = Database::open("/tmp/t1", &options)?;
//!
//! db.put(&WriteOptions::new(), &"Hello", &"World")?;
//! let value = db.get(&ReadOptions::new(), &"Hello", String::new())?;
//! assert_eq!(value, "World");
//! # Ok(())
//! # }
//! ```

mod batch;
mod codec;
mod constants;
mod database;
mod engine;
mod error;
mod iterator;
mod options;
mod raw;
mod snapshot;
mod value;

pub use batch::{BatchEntry, WriteBatch};
pub use codec::{decode_plain, Codec, PlainLayout, RawSpan, Shape, Span};
pub use database::{destroy, repair, Database};
pub use error::{Error, Result};
pub use iterator::Iter;
pub use options::{
    Cache, Comparator, Compression, Env, FilterPolicy, Options, ReadOptions, WriteOptions,
};
pub use snapshot::Snapshot;
pub use value::ByteView;

use constants::{VERSION_MAJOR, VERSION_MINOR};

/// Binding layer version.
pub fn version() -> (u32, u32) {
    (VERSION_MAJOR, VERSION_MINOR)
}
