//! Durable record of which SSTables exist at which levels.
//!
//! The manifest is the authority on table placement: a table file that the
//! manifest does not list is an orphan and gets garbage-collected at
//! startup, no matter how intact it looks. Readers never see a table
//! before its manifest entry lands on disk.
//!
//! # Durability
//!
//! Every update rewrites the whole file: encode to `manifest.new`, fsync,
//! then atomically rename over `manifest` and fsync the directory. A
//! crash leaves either the old or the new state, never a mix. The payload
//! ends in a CRC32; a manifest that fails its checksum is **fatal** — the
//! engine refuses to open rather than guess at table placement.


use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{info, warn};

use crate::encoding::{self, Decode, Encode, EncodingError};

const MANIFEST_FILENAME: &str = "manifest";
const MANIFEST_TMP_FILENAME: &str = "manifest.new";
const MANIFEST_MAGIC: [u8; 4] = *b"SMF1";
const MANIFEST_VERSION: u32 = 1;

/// Errors returned by manifest operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The manifest payload failed its checksum or structure checks.
    /// This is fatal — table placement cannot be trusted.
    #[error("manifest corrupt: {0}")]
    Corrupt(String),
}

/// Entry describing one table known to the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    /// Globally unique table ID, allocated monotonically.
    pub id: u64,

    /// Level the table belongs to.
    pub level: u32,

    /// Smallest key in the table.
    pub min_key: Vec<u8>,

    /// Largest key in the table.
    pub max_key: Vec<u8>,

    /// Number of records in the table.
    pub record_count: u64,

    /// On-disk size in bytes.
    pub file_size: u64,
}

impl Encode for TableEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.id.encode_to(buf)?;
        self.level.encode_to(buf)?;
        self.min_key.encode_to(buf)?;
        self.max_key.encode_to(buf)?;
        self.record_count.encode_to(buf)?;
        self.file_size.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for TableEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (id, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (level, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (min_key, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;
        let (max_key, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;
        let (record_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (file_size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                id,
                level,
                min_key,
                max_key,
                record_count,
                file_size,
            },
            off,
        ))
    }
}

/// In-memory manifest state: a monotonic ID counter plus per-level table
/// lists.
#[derive(Debug, Clone, PartialEq)]
struct ManifestData {
    next_table_id: u64,
    levels: Vec<Vec<TableEntry>>,
}

impl ManifestData {
    fn empty(max_level: usize) -> Self {
        Self {
            next_table_id: 1,
            levels: vec![Vec::new(); max_level + 1],
        }
    }
}

impl Encode for ManifestData {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.next_table_id.encode_to(buf)?;
        (self.levels.len() as u32).encode_to(buf)?;
        for level in &self.levels {
            encoding::encode_vec(level, buf)?;
        }
        Ok(())
    }
}

impl Decode for ManifestData {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (next_table_id, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (level_count, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let mut levels = Vec::with_capacity(level_count as usize);
        for _ in 0..level_count {
            let (entries, n) = encoding::decode_vec::<TableEntry>(&buf[off..])?;
            off += n;
            levels.push(entries);
        }
        Ok((
            Self {
                next_table_id,
                levels,
            },
            off,
        ))
    }
}

/// Persistent metadata manager for the LSM tree.
///
/// Lives under the engine's write lock; all mutation methods take
/// `&mut self` and become durable only when [`persist`](Manifest::persist)
/// succeeds.
#[derive(Debug)]
pub struct Manifest {
    /// Directory holding `manifest` / `manifest.new`.
    dir: PathBuf,

    data: ManifestData,
}

impl Manifest {
    /// Opens the manifest under `dir`, creating an empty one when no file
    /// exists. A present-but-corrupt manifest is a fatal error.
    pub fn open(dir: impl AsRef<Path>, max_level: usize) -> Result<Self, ManifestError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        // A leftover manifest.new means a crash mid-update; the rename
        // never happened, so the old file is authoritative.
        let tmp_path = dir.join(MANIFEST_TMP_FILENAME);
        if tmp_path.exists() {
            warn!(path = %tmp_path.display(), "removing interrupted manifest update");
            fs::remove_file(&tmp_path)?;
        }

        let path = dir.join(MANIFEST_FILENAME);
        let mut data = if path.exists() {
            Self::read_file(&path)?
        } else {
            ManifestData::empty(max_level)
        };

        // A deeper configured tree gains empty levels; existing entries
        // are never dropped.
        while data.levels.len() < max_level + 1 {
            data.levels.push(Vec::new());
        }

        info!(
            dir = %dir.display(),
            levels = data.levels.len(),
            tables = data.levels.iter().map(Vec::len).sum::<usize>(),
            "manifest opened"
        );

        Ok(Self { dir, data })
    }

    fn read_file(path: &Path) -> Result<ManifestData, ManifestError> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;

        if bytes.len() < 12 {
            return Err(ManifestError::Corrupt("file too small".into()));
        }

        let payload_end = bytes.len() - 4;
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&bytes[payload_end..]);
        let stored_crc = u32::from_le_bytes(crc_bytes);

        let mut hasher = Crc32::new();
        hasher.update(&bytes[..payload_end]);
        if hasher.finalize() != stored_crc {
            return Err(ManifestError::Corrupt("checksum mismatch".into()));
        }

        let mut off = 0;
        let (magic, n) = <[u8; 4]>::decode_from(&bytes[off..])?;
        off += n;
        let (version, n) = u32::decode_from(&bytes[off..])?;
        off += n;

        if magic != MANIFEST_MAGIC {
            return Err(ManifestError::Corrupt("bad magic".into()));
        }
        if version != MANIFEST_VERSION {
            return Err(ManifestError::Corrupt(format!(
                "unsupported version {version}"
            )));
        }

        let (data, _) = ManifestData::decode_from(&bytes[off..payload_end])?;
        Ok(data)
    }

    /// Allocates the next table ID.
    pub fn allocate_table_id(&mut self) -> u64 {
        let id = self.data.next_table_id;
        self.data.next_table_id += 1;
        id
    }

    /// Number of levels tracked (max level + 1).
    pub fn level_count(&self) -> usize {
        self.data.levels.len()
    }

    /// Table entries at `level`, in manifest order.
    pub fn level(&self, level: usize) -> &[TableEntry] {
        &self.data.levels[level]
    }

    /// Every table ID currently listed, across all levels.
    pub fn all_table_ids(&self) -> Vec<u64> {
        self.data
            .levels
            .iter()
            .flat_map(|level| level.iter().map(|entry| entry.id))
            .collect()
    }

    /// Adds one table to its level (used by memtable flushes).
    pub fn add_table(&mut self, entry: TableEntry) {
        let level = entry.level as usize;
        self.data.levels[level].push(entry);
    }

    /// Applies a compaction in one step: removes consumed tables, adds
    /// the outputs, and re-sorts affected levels ≥ 1 by min key.
    pub fn apply_compaction(&mut self, added: Vec<TableEntry>, removed: &[u64]) {
        for level in &mut self.data.levels {
            level.retain(|entry| !removed.contains(&entry.id));
        }
        for entry in added {
            let level = entry.level as usize;
            self.data.levels[level].push(entry);
        }
        for (idx, level) in self.data.levels.iter_mut().enumerate() {
            if idx >= 1 {
                level.sort_by(|a, b| a.min_key.cmp(&b.min_key));
            }
        }
    }

    /// Writes the manifest durably: encode with a trailing CRC32, write
    /// to `manifest.new`, fsync, rename over `manifest`, fsync the
    /// directory.
    pub fn persist(&self) -> Result<(), ManifestError> {
        let mut bytes = Vec::new();
        MANIFEST_MAGIC.encode_to(&mut bytes)?;
        MANIFEST_VERSION.encode_to(&mut bytes)?;
        self.data.encode_to(&mut bytes)?;

        let mut hasher = Crc32::new();
        hasher.update(&bytes);
        let crc = hasher.finalize();
        bytes.extend_from_slice(&crc.to_le_bytes());

        let tmp_path = self.dir.join(MANIFEST_TMP_FILENAME);
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }

        fs::rename(&tmp_path, self.dir.join(MANIFEST_FILENAME))?;
        File::open(&self.dir)?.sync_all()?;

        Ok(())
    }
}
