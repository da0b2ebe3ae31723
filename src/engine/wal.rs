//! Append-only commit log behind the engine.
//!
//! One record per atomic commit. On-disk record layout:
//!
//! ```text
//! ┌──────────┬─────────┬───────────┬─────────────────────────┐
//! │ CRC (4B) │ Len (4B)│ Count (4B)│ Entries (variable)      │
//! └──────────┴─────────┴───────────┴─────────────────────────┘
//! ```
//!
//! Entry: `tag (1B) | key len (4B) | key | [val len (4B) | val]`, the value
//! half present only for puts. CRC covers everything after the Len field.
//! A record whose CRC fails, or that runs past the end of the file, marks a
//! torn tail: replay stops there and everything before it is valid.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use memmap2::Mmap;

use super::Status;

const CRC_SIZE: usize = 4;
const LEN_SIZE: usize = 4;
const COUNT_SIZE: usize = 4;
const HEADER_SIZE: usize = CRC_SIZE + LEN_SIZE;

const TAG_PUT: u8 = 0x01;
const TAG_DELETE: u8 = 0x02;

/// One buffered mutation inside a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LogEntry {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Serialize one commit (including the CRC header).
pub(crate) fn encode_commit(entries: &[LogEntry]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(COUNT_SIZE + 16 * entries.len());
    payload.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for entry in entries {
        match entry {
            LogEntry::Put { key, value } => {
                payload.push(TAG_PUT);
                payload.extend_from_slice(&(key.len() as u32).to_le_bytes());
                payload.extend_from_slice(key);
                payload.extend_from_slice(&(value.len() as u32).to_le_bytes());
                payload.extend_from_slice(value);
            }
            LogEntry::Delete { key } => {
                payload.push(TAG_DELETE);
                payload.extend_from_slice(&(key.len() as u32).to_le_bytes());
                payload.extend_from_slice(key);
            }
        }
    }

    let mut record = Vec::with_capacity(HEADER_SIZE + payload.len());
    record.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    record.extend_from_slice(&payload);
    record
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

/// Decode one commit starting at `data[0]`. Returns the entries and the
/// number of bytes consumed.
pub(crate) fn decode_commit(data: &[u8]) -> Result<(Vec<LogEntry>, usize), Status> {
    if data.len() < HEADER_SIZE {
        return Err(Status::Corruption("record header truncated".into()));
    }
    let stored_crc = read_u32(data, 0).ok_or_else(|| Status::Corruption("short crc".into()))?;
    let payload_len =
        read_u32(data, CRC_SIZE).ok_or_else(|| Status::Corruption("short length".into()))? as usize;

    let total = HEADER_SIZE + payload_len;
    if data.len() < total {
        return Err(Status::Corruption("record truncated".into()));
    }
    let payload = &data[HEADER_SIZE..total];
    if crc32fast::hash(payload) != stored_crc {
        return Err(Status::Corruption("record checksum mismatch".into()));
    }
    if payload.len() < COUNT_SIZE {
        return Err(Status::Corruption("commit count missing".into()));
    }

    let count = read_u32(payload, 0)
        .ok_or_else(|| Status::Corruption("short count".into()))? as usize;
    let mut entries = Vec::with_capacity(count);
    let mut offset = COUNT_SIZE;
    for _ in 0..count {
        let tag = *payload
            .get(offset)
            .ok_or_else(|| Status::Corruption("entry tag missing".into()))?;
        offset += 1;
        let key_len = read_u32(payload, offset)
            .ok_or_else(|| Status::Corruption("key length missing".into()))? as usize;
        offset += 4;
        let key = payload
            .get(offset..offset + key_len)
            .ok_or_else(|| Status::Corruption("key exceeds record".into()))?
            .to_vec();
        offset += key_len;
        match tag {
            TAG_PUT => {
                let val_len = read_u32(payload, offset)
                    .ok_or_else(|| Status::Corruption("value length missing".into()))?
                    as usize;
                offset += 4;
                let value = payload
                    .get(offset..offset + val_len)
                    .ok_or_else(|| Status::Corruption("value exceeds record".into()))?
                    .to_vec();
                offset += val_len;
                entries.push(LogEntry::Put { key, value });
            }
            TAG_DELETE => entries.push(LogEntry::Delete { key }),
            other => {
                return Err(Status::Corruption(format!("invalid entry tag: {other}")));
            }
        }
    }

    Ok((entries, total))
}

/// Result of scanning a commit log from the start.
pub(crate) struct ReplayOutcome {
    /// Commits decoded in log order.
    pub commits: Vec<Vec<LogEntry>>,
    /// Byte length of the well-formed prefix.
    pub valid_len: u64,
    /// True when the scan stopped before the end of the file.
    pub torn: bool,
}

/// Scan the log at `path`, stopping at the first torn or corrupt record.
pub(crate) fn replay(path: &Path) -> Result<ReplayOutcome, Status> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    if file_len == 0 {
        return Ok(ReplayOutcome {
            commits: Vec::new(),
            valid_len: 0,
            torn: false,
        });
    }

    // Read the whole log through a shared map rather than buffered reads.
    let map = unsafe { Mmap::map(&file)? };
    let data = &map[..];

    let mut commits = Vec::new();
    let mut offset = 0usize;
    let mut torn = false;
    while offset < data.len() {
        match decode_commit(&data[offset..]) {
            Ok((entries, consumed)) => {
                commits.push(entries);
                offset += consumed;
            }
            Err(_) => {
                torn = true;
                break;
            }
        }
    }

    Ok(ReplayOutcome {
        commits,
        valid_len: offset as u64,
        torn,
    })
}

/// Appends commit records; the engine holds one per open database.
pub(crate) struct LogWriter {
    file: File,
}

impl LogWriter {
    /// Open the log for appending, creating it if absent.
    pub(crate) fn open(path: &Path) -> Result<LogWriter, Status> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(LogWriter { file })
    }

    pub(crate) fn append(&mut self, record: &[u8]) -> Result<(), Status> {
        self.file.write_all(record)?;
        Ok(())
    }

    /// Force the log to physical storage.
    pub(crate) fn sync(&mut self) -> Result<(), Status> {
        self.file.sync_data()?;
        Ok(())
    }
}
