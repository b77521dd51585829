//! Sorted String Table (SSTable) — immutable, sorted, on-disk tables.
//!
//! Each table is a single self-describing file holding five regions:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ data      — records in key order, fixed record layout    │
//! │ index     — [key_len:8][key][data_offset:8] per record   │
//! │ summary   — min/max keys + sparse index over the index   │
//! │ bloom     — seeded bloom filter over all keys            │
//! │ footer    — region offsets, record count, CRC32          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The index, summary, and bloom regions are wrapped in checksummed
//! blocks (`[len:4][bytes][crc32:4]`); data records carry their own
//! per-record CRC over the value bytes.
//!
//! # Reading
//!
//! [`SsTable::open`] memory-maps the file, validates the footer and every
//! auxiliary block once, and keeps the parsed summary and bloom filter in
//! memory. A [`get`](SsTable::get) consults the bloom filter, binary
//! searches the summary for the index sub-range bracketing the key, scans
//! that sub-range for an exact match, and finally decodes one record from
//! the data region. A record whose CRC fails is reported absent and
//! logged, never surfaced as data.
//!
//! # Lifecycle
//!
//! `Writing → Sealed → Live → Retiring → Deleted`. The builder owns the
//! first two steps (temp file, then atomic rename); the LSM manager flips
//! tables to `Live` once the manifest records them and walks them through
//! `Retiring`/`Deleted` during compaction. Only `Live` tables answer
//! reads.
//!
//! # Concurrency
//!
//! Files are immutable after sealing, so concurrent reads need no locks.

pub mod builder;
pub mod iterator;

#[cfg(test)]
mod tests;

pub use builder::{BuiltTable, TableBuilder};
pub use iterator::TableIter;

use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU8, Ordering},
};

use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;
use tracing::warn;

use crate::bloom::BloomFilter;
use crate::encoding::{self, Decode, EncodingError};
use crate::record::{Record, RecordError};

pub(crate) const SST_MAGIC: [u8; 4] = *b"STB1";
pub(crate) const SST_VERSION: u32 = 1;
pub(crate) const SST_FOOTER_SIZE: usize = 4 + 4 + 8 * 5 + 4;
pub(crate) const BLOCK_LEN_SIZE: usize = 4;
pub(crate) const BLOCK_CRC_SIZE: usize = 4;

/// Errors returned by SSTable operations.
#[derive(Debug, Error)]
pub enum SstableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error in an auxiliary block.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Malformed record in the data region.
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// A block or footer checksum did not match.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Structural invariant violation (bad magic, truncated block, …).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Lifecycle state of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TableState {
    /// Being written to a temp file; invisible to readers.
    Writing = 0,

    /// Fully written and renamed, not yet in the manifest.
    Sealed = 1,

    /// Recorded in the manifest; answers reads.
    Live = 2,

    /// Chosen as compaction input; about to be deleted.
    Retiring = 3,

    /// File removed.
    Deleted = 4,
}

impl TableState {
    fn from_u8(raw: u8) -> TableState {
        match raw {
            0 => TableState::Writing,
            1 => TableState::Sealed,
            2 => TableState::Live,
            3 => TableState::Retiring,
            _ => TableState::Deleted,
        }
    }
}

/// Parsed footer of an SSTable file.
#[derive(Debug)]
pub(crate) struct Footer {
    pub(crate) data_off: u64,
    pub(crate) index_off: u64,
    pub(crate) summary_off: u64,
    pub(crate) bloom_off: u64,
    pub(crate) record_count: u64,
}

/// One sparse-index entry: the first key of an index run and the byte
/// offset of that run within the index region.
#[derive(Debug)]
pub(crate) struct SummaryEntry {
    pub(crate) first_key: Vec<u8>,
    pub(crate) index_offset: u64,
}

/// Parsed summary region: table key bounds plus the sparse index.
#[derive(Debug)]
pub(crate) struct TableSummary {
    pub(crate) min_key: Vec<u8>,
    pub(crate) max_key: Vec<u8>,
    pub(crate) entries: Vec<SummaryEntry>,
}

/// A memory-mapped, immutable SSTable.
pub struct SsTable {
    /// Unique identifier assigned by the manifest.
    pub id: u64,

    /// Level this table currently belongs to.
    pub level: usize,

    path: PathBuf,
    mmap: Mmap,
    bloom: BloomFilter,
    summary: TableSummary,
    footer: Footer,
    /// Byte range of the index block *content* within the file.
    index_content: (usize, usize),
    file_size: u64,
    state: AtomicU8,
}

impl std::fmt::Debug for SsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsTable")
            .field("id", &self.id)
            .field("level", &self.level)
            .field("records", &self.footer.record_count)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SsTable {
    /// Opens a sealed table, verifying footer and auxiliary block
    /// checksums.
    ///
    /// The caller (the LSM manager) assigns `id` and `level` and flips the
    /// state to [`TableState::Live`] once the manifest lists the table.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SstableError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;

        // Safe: the file is sealed and never written again; the map is
        // read-only and all block bounds are validated before slicing.
        let mmap = unsafe { Mmap::map(&file)? };
        let file_size = mmap.len() as u64;

        if mmap.len() < SST_FOOTER_SIZE {
            return Err(SstableError::Internal("file smaller than footer".into()));
        }

        let footer = decode_footer(&mmap[mmap.len() - SST_FOOTER_SIZE..])?;

        let index_content = checked_block(&mmap, footer.index_off)?;
        let summary_content = checked_block(&mmap, footer.summary_off)?;
        let bloom_content = checked_block(&mmap, footer.bloom_off)?;

        let summary = decode_summary(&mmap[summary_content.0..summary_content.1])?;
        let (bloom, _) =
            encoding::decode_from_slice::<BloomFilter>(&mmap[bloom_content.0..bloom_content.1])?;

        Ok(Self {
            id: 0,
            level: 0,
            path,
            mmap,
            bloom,
            summary,
            footer,
            index_content,
            file_size,
            state: AtomicU8::new(TableState::Sealed as u8),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TableState {
        TableState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Advances the lifecycle state.
    pub fn set_state(&self, state: TableState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// On-disk size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Number of records in the data region.
    pub fn record_count(&self) -> u64 {
        self.footer.record_count
    }

    /// Smallest key in the table.
    pub fn min_key(&self) -> &[u8] {
        &self.summary.min_key
    }

    /// Largest key in the table.
    pub fn max_key(&self) -> &[u8] {
        &self.summary.max_key
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` when `key` falls inside this table's key range.
    pub fn covers(&self, key: &[u8]) -> bool {
        self.summary.min_key.as_slice() <= key && key <= self.summary.max_key.as_slice()
    }

    /// `true` when the key span `[min, max]` overlaps this table's range.
    pub fn overlaps(&self, min: &[u8], max: &[u8]) -> bool {
        !(max < self.summary.min_key.as_slice() || min > self.summary.max_key.as_slice())
    }

    /// Point lookup.
    ///
    /// Returns the stored record — tombstone or live — or `None` when the
    /// table holds nothing for `key`. A record failing CRC validation is
    /// logged and reported as absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<Record>, SstableError> {
        if !self.covers(key) {
            return Ok(None);
        }
        if !self.bloom.may_contain(key) {
            return Ok(None);
        }

        let (run_start, run_end) = self.index_run_for(key);
        let index = &self.mmap[self.index_content.0..self.index_content.1];

        let mut cursor = run_start;
        while cursor < run_end {
            let (entry_key, data_off, consumed) = decode_index_entry(&index[cursor..])?;
            match entry_key.cmp(key) {
                std::cmp::Ordering::Less => cursor += consumed,
                std::cmp::Ordering::Equal => return self.read_record_at(data_off),
                std::cmp::Ordering::Greater => break,
            }
        }

        Ok(None)
    }

    /// Locates the index sub-range `[start, end)` whose keys bracket
    /// `key`, using the sparse summary.
    fn index_run_for(&self, key: &[u8]) -> (usize, usize) {
        let index_len = self.index_content.1 - self.index_content.0;
        if self.summary.entries.is_empty() {
            return (0, index_len);
        }

        let pos = self
            .summary
            .entries
            .partition_point(|entry| entry.first_key.as_slice() <= key);
        if pos == 0 {
            // Key precedes the first summarized run.
            return (0, 0);
        }

        let start = self.summary.entries[pos - 1].index_offset as usize;
        let end = self
            .summary
            .entries
            .get(pos)
            .map(|entry| entry.index_offset as usize)
            .unwrap_or(index_len);
        (start, end)
    }

    /// Decodes one record from the data region, enforcing its CRC.
    fn read_record_at(&self, offset: u64) -> Result<Option<Record>, SstableError> {
        let data_start = self.footer.data_off as usize;
        let data_end = self.footer.index_off as usize;
        let at = data_start + offset as usize;
        if at >= data_end {
            return Err(SstableError::Internal(
                "index points past data region".into(),
            ));
        }

        match Record::decode(&self.mmap[at..data_end]) {
            Ok(decoded) if decoded.checksum_ok => Ok(Some(decoded.record)),
            Ok(_) => {
                warn!(
                    table = self.id,
                    offset, "record checksum mismatch; reporting absent"
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Sequential iterator over all records in key order.
    pub fn iter(&self) -> TableIter<'_> {
        TableIter::new(
            self,
            self.footer.data_off as usize,
            self.footer.index_off as usize,
        )
    }

    pub(crate) fn mmap_bytes(&self) -> &[u8] {
        &self.mmap
    }
}

// ------------------------------------------------------------------------------------------------
// Footer / block / summary codecs
// ------------------------------------------------------------------------------------------------

pub(crate) fn encode_footer(footer: &Footer) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SST_FOOTER_SIZE);
    buf.extend_from_slice(&SST_MAGIC);
    buf.extend_from_slice(&SST_VERSION.to_le_bytes());
    buf.extend_from_slice(&footer.data_off.to_le_bytes());
    buf.extend_from_slice(&footer.index_off.to_le_bytes());
    buf.extend_from_slice(&footer.summary_off.to_le_bytes());
    buf.extend_from_slice(&footer.bloom_off.to_le_bytes());
    buf.extend_from_slice(&footer.record_count.to_le_bytes());

    let mut hasher = Crc32::new();
    hasher.update(&buf);
    let crc = hasher.finalize();
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

fn decode_footer(buf: &[u8]) -> Result<Footer, SstableError> {
    if buf.len() != SST_FOOTER_SIZE {
        return Err(SstableError::Internal("footer size mismatch".into()));
    }

    let mut hasher = Crc32::new();
    hasher.update(&buf[..SST_FOOTER_SIZE - 4]);
    let computed = hasher.finalize();

    let mut off = 0usize;
    let (magic, n) = <[u8; 4]>::decode_from(&buf[off..])?;
    off += n;
    let (version, n) = u32::decode_from(&buf[off..])?;
    off += n;
    let (data_off, n) = u64::decode_from(&buf[off..])?;
    off += n;
    let (index_off, n) = u64::decode_from(&buf[off..])?;
    off += n;
    let (summary_off, n) = u64::decode_from(&buf[off..])?;
    off += n;
    let (bloom_off, n) = u64::decode_from(&buf[off..])?;
    off += n;
    let (record_count, n) = u64::decode_from(&buf[off..])?;
    off += n;
    let (stored_crc, _) = u32::decode_from(&buf[off..])?;

    if computed != stored_crc {
        return Err(SstableError::ChecksumMismatch);
    }
    if magic != SST_MAGIC {
        return Err(SstableError::Internal("bad table magic".into()));
    }
    if version != SST_VERSION {
        return Err(SstableError::Internal(format!(
            "unsupported table version {version}"
        )));
    }

    Ok(Footer {
        data_off,
        index_off,
        summary_off,
        bloom_off,
        record_count,
    })
}

/// Verifies the checksummed block starting at `offset` and returns the
/// byte range of its content within the file.
fn checked_block(mmap: &Mmap, offset: u64) -> Result<(usize, usize), SstableError> {
    let start = offset as usize;
    if start + BLOCK_LEN_SIZE > mmap.len() {
        return Err(SstableError::Internal("block offset out of range".into()));
    }

    let mut len_bytes = [0u8; BLOCK_LEN_SIZE];
    len_bytes.copy_from_slice(&mmap[start..start + BLOCK_LEN_SIZE]);
    let content_len = u32::from_le_bytes(len_bytes) as usize;

    let content_start = start + BLOCK_LEN_SIZE;
    let content_end = content_start + content_len;
    if content_end + BLOCK_CRC_SIZE > mmap.len() {
        return Err(SstableError::Internal("block extends past file".into()));
    }

    let mut crc_bytes = [0u8; BLOCK_CRC_SIZE];
    crc_bytes.copy_from_slice(&mmap[content_end..content_end + BLOCK_CRC_SIZE]);
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let mut hasher = Crc32::new();
    hasher.update(&mmap[content_start..content_end]);
    if hasher.finalize() != stored_crc {
        return Err(SstableError::ChecksumMismatch);
    }

    Ok((content_start, content_end))
}

/// Decodes one index entry: `[key_len:8][key][data_offset:8]`.
///
/// Returns `(key, data_offset, bytes_consumed)`.
pub(crate) fn decode_index_entry(buf: &[u8]) -> Result<(&[u8], u64, usize), SstableError> {
    if buf.len() < 8 {
        return Err(SstableError::Internal("truncated index entry".into()));
    }
    let mut u64_bytes = [0u8; 8];
    u64_bytes.copy_from_slice(&buf[0..8]);
    let key_len = u64::from_le_bytes(u64_bytes) as usize;

    let total = 8 + key_len + 8;
    if buf.len() < total {
        return Err(SstableError::Internal("truncated index entry".into()));
    }
    let key = &buf[8..8 + key_len];
    u64_bytes.copy_from_slice(&buf[8 + key_len..total]);
    let data_offset = u64::from_le_bytes(u64_bytes);

    Ok((key, data_offset, total))
}

/// Decodes the summary region content.
fn decode_summary(buf: &[u8]) -> Result<TableSummary, SstableError> {
    let mut off = 0usize;

    let (min_key, n) = decode_length_prefixed_key(&buf[off..])?;
    off += n;
    let (max_key, n) = decode_length_prefixed_key(&buf[off..])?;
    off += n;

    let (entry_count, n) = u64::decode_from(&buf[off..])?;
    off += n;

    let mut entries = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        let (first_key, n) = decode_length_prefixed_key(&buf[off..])?;
        off += n;
        let (index_offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        entries.push(SummaryEntry {
            first_key,
            index_offset,
        });
    }

    Ok(TableSummary {
        min_key,
        max_key,
        entries,
    })
}

/// Decodes `[key_len:8][key]`, returning `(key, bytes_consumed)`.
fn decode_length_prefixed_key(buf: &[u8]) -> Result<(Vec<u8>, usize), SstableError> {
    if buf.len() < 8 {
        return Err(SstableError::Internal("truncated summary key".into()));
    }
    let mut u64_bytes = [0u8; 8];
    u64_bytes.copy_from_slice(&buf[0..8]);
    let key_len = u64::from_le_bytes(u64_bytes) as usize;
    if buf.len() < 8 + key_len {
        return Err(SstableError::Internal("truncated summary key".into()));
    }
    Ok((buf[8..8 + key_len].to_vec(), 8 + key_len))
}
