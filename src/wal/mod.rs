//! Segmented write-ahead log.
//!
//! Every mutation is appended to the current segment before it touches the
//! memtable, making acknowledged writes durable across crashes. Segments
//! are raw streams of records in the fixed layout of [`crate::record`]
//! (self-describing length fields, per-record CRC over the value bytes).
//!
//! # On-disk layout
//!
//! ```text
//! <dir>/wal_00001.log
//! <dir>/wal_00002.log      ← segments rotate at the size cap
//! <dir>/wal_00003.log      ← active segment, append-only
//! ```
//!
//! Segment names carry a zero-padded, monotonically increasing ordinal.
//!
//! # Recovery
//!
//! [`Wal::open`] replays all segments in ordinal order and hands the
//! recovered records back to the caller, which applies them to the
//! memtable exactly like live writes (without re-logging). The first
//! malformed or checksum-failing record within a segment ends that
//! segment's replay and the corrupt tail is truncated; later segments are
//! still replayed in full.
//!
//! # Durability policy
//!
//! `append` returns once the bytes are handed to the OS. The configured
//! [`SyncPolicy`] controls explicit fsyncs: after every append, only on
//! segment rotation (default), or never.

#[cfg(test)]
mod tests;

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::config::SyncPolicy;
use crate::record::Record;

const SEGMENT_PREFIX: &str = "wal_";
const SEGMENT_SUFFIX: &str = ".log";

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal consistency error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A segmented, append-only durability log.
#[derive(Debug)]
pub struct Wal {
    /// Directory holding the segment files.
    dir: PathBuf,

    /// Segment size cap in bytes.
    segment_cap: u64,

    /// Fsync policy.
    sync: SyncPolicy,

    /// Handle to the active (highest-ordinal) segment.
    active: File,

    /// Ordinal of the active segment.
    active_seq: u64,

    /// Current byte length of the active segment.
    active_len: u64,
}

impl Wal {
    /// Opens the WAL under `dir`, replaying any existing segments.
    ///
    /// Returns the log handle plus all recovered records in append order.
    /// Corrupt segment tails are truncated during replay.
    pub fn open(
        dir: impl AsRef<Path>,
        segment_cap: u64,
        sync: SyncPolicy,
    ) -> Result<(Self, Vec<Record>), WalError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let ordinals = list_segments(&dir)?;
        let mut recovered = Vec::new();

        for &seq in &ordinals {
            let path = segment_path(&dir, seq);
            replay_segment(&path, &mut recovered)?;
        }

        let active_seq = ordinals.last().copied().unwrap_or(1);
        let path = segment_path(&dir, active_seq);
        let active = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let active_len = active.metadata()?.len();

        info!(
            dir = %dir.display(),
            segments = ordinals.len().max(1),
            recovered = recovered.len(),
            active_seq,
            "WAL opened"
        );

        Ok((
            Self {
                dir,
                segment_cap,
                sync,
                active,
                active_seq,
                active_len,
            },
            recovered,
        ))
    }

    /// Appends one record to the active segment, rotating first when the
    /// write would push the segment past its cap.
    pub fn append(&mut self, record: &Record) -> Result<(), WalError> {
        let bytes = record.encode();

        if self.active_len > 0 && self.active_len + bytes.len() as u64 > self.segment_cap {
            self.rotate()?;
        }

        self.active.write_all(&bytes)?;
        self.active_len += bytes.len() as u64;

        if self.sync == SyncPolicy::Always {
            self.active.sync_all()?;
        }

        trace!(
            seq = self.active_seq,
            len = bytes.len(),
            "WAL record appended"
        );
        Ok(())
    }

    /// Seals the active segment and opens the next ordinal.
    pub fn rotate(&mut self) -> Result<u64, WalError> {
        if self.sync != SyncPolicy::Never {
            self.active.sync_all()?;
        }

        let next_seq = self
            .active_seq
            .checked_add(1)
            .ok_or_else(|| WalError::Internal("WAL ordinal overflow".into()))?;
        let path = segment_path(&self.dir, next_seq);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        self.active = file;
        self.active_seq = next_seq;
        self.active_len = 0;

        debug!(seq = next_seq, "WAL segment rotated");
        Ok(next_seq)
    }

    /// Called after a successful memtable flush: everything logged so far
    /// is now durable in an SSTable, so rotate to a fresh segment and
    /// delete every older one.
    pub fn remove_old_segments(&mut self) -> Result<(), WalError> {
        self.rotate()?;

        let mut removed = 0usize;
        for seq in list_segments(&self.dir)? {
            if seq < self.active_seq {
                fs::remove_file(segment_path(&self.dir, seq))?;
                removed += 1;
            }
        }

        info!(removed, active_seq = self.active_seq, "old WAL segments removed");
        Ok(())
    }

    /// Flushes the active segment to disk regardless of policy.
    pub fn sync(&self) -> Result<(), WalError> {
        self.active.sync_all()?;
        Ok(())
    }

    /// Ordinal of the active segment.
    pub fn active_seq(&self) -> u64 {
        self.active_seq
    }

    /// Number of segment files currently on disk.
    pub fn segment_count(&self) -> Result<usize, WalError> {
        Ok(list_segments(&self.dir)?.len())
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if self.sync != SyncPolicy::Never {
            if let Err(e) = self.active.sync_all() {
                warn!(seq = self.active_seq, error = %e, "WAL sync failed on drop");
            }
        }
    }
}

/// Builds `<dir>/wal_<seq:05>.log`.
fn segment_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("{SEGMENT_PREFIX}{seq:05}{SEGMENT_SUFFIX}"))
}

/// Lists segment ordinals under `dir`, ascending.
fn list_segments(dir: &Path) -> Result<Vec<u64>, WalError> {
    let mut ordinals = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(seq) = name
            .strip_prefix(SEGMENT_PREFIX)
            .and_then(|s| s.strip_suffix(SEGMENT_SUFFIX))
            .and_then(|s| s.parse::<u64>().ok())
        {
            ordinals.push(seq);
        }
    }
    ordinals.sort_unstable();
    Ok(ordinals)
}

/// Replays one segment into `out`, truncating the tail at the first
/// malformed or checksum-failing record.
fn replay_segment(path: &Path, out: &mut Vec<Record>) -> Result<(), WalError> {
    let bytes = fs::read(path)?;
    let mut offset = 0usize;
    let mut records = 0usize;

    while offset < bytes.len() {
        match Record::decode_verified(&bytes[offset..]) {
            Ok((record, consumed)) => {
                out.push(record);
                offset += consumed;
                records += 1;
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    offset,
                    error = %e,
                    "WAL segment corrupt; truncating tail"
                );
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(offset as u64)?;
                file.sync_all()?;
                break;
            }
        }
    }

    debug!(path = %path.display(), records, "WAL segment replayed");
    Ok(())
}
