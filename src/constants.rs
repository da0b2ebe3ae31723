// Engine defaults and on-disk names.

/// Default size of the engine's in-memory write buffer.
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Default limit on files the engine keeps open at once.
pub const DEFAULT_MAX_OPEN_FILES: i32 = 1000;

/// Default block size for the engine's table layer.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Commit log file inside a database directory.
pub const LOG_FILE_NAME: &str = "shale.log";

/// Lock file held open for the lifetime of a connection.
pub const LOCK_FILE_NAME: &str = "LOCK";

/// Version numbers major
pub const VERSION_MAJOR: u32 = 0;
/// Version numbers minor
pub const VERSION_MINOR: u32 = 1;
