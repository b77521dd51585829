//! SSTable writer — builds a complete table file from a key-sorted
//! record stream in one pass.
//!
//! # Input requirements
//!
//! Records must arrive in strictly increasing key order — one record per
//! key. The memtable's flush iterator and the compaction merge both
//! guarantee this.
//!
//! # Atomicity
//!
//! 1. Write every region to `<path>.tmp`.
//! 2. Flush and `fsync`.
//! 3. Rename `<path>.tmp` → `<path>`.
//!
//! A crash can therefore never leave a half-written table under the final
//! name; leftover `.tmp` files are swept by the startup orphan scan.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crc32fast::Hasher as Crc32;
use tracing::debug;

use crate::bloom::BloomFilter;
use crate::encoding;
use crate::record::Record;

use super::{Footer, SstableError, encode_footer};

/// Description of a freshly built table, fed into the manifest.
#[derive(Debug, Clone)]
pub struct BuiltTable {
    /// Smallest key written.
    pub min_key: Vec<u8>,

    /// Largest key written.
    pub max_key: Vec<u8>,

    /// Number of records in the data region.
    pub record_count: u64,

    /// Final file size in bytes.
    pub file_size: u64,
}

/// One-shot writer for a single SSTable file.
pub struct TableBuilder {
    path: PathBuf,
    bloom_fp_rate: f64,
    summary_stride: usize,
}

impl TableBuilder {
    /// Creates a builder targeting `path`.
    pub fn new(path: impl AsRef<Path>, bloom_fp_rate: f64, summary_stride: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            bloom_fp_rate,
            summary_stride: summary_stride.max(1),
        }
    }

    /// Consumes a sorted record stream and writes the complete table.
    ///
    /// `expected_count` sizes the bloom filter; it should equal (or
    /// slightly exceed) the actual record count.
    pub fn build<'a>(
        self,
        records: impl Iterator<Item = &'a Record>,
        expected_count: usize,
    ) -> Result<BuiltTable, SstableError> {
        let tmp_path = self.path.with_extension("tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        let mut written: u64 = 0;

        let mut bloom = BloomFilter::new(expected_count.max(1), self.bloom_fp_rate);
        let mut index_entries: Vec<(Vec<u8>, u64)> = Vec::new();
        let mut min_key: Option<Vec<u8>> = None;
        let mut max_key: Vec<u8> = Vec::new();
        let mut record_count: u64 = 0;

        // 1. Data region — records back to back, offsets collected for
        //    the index.
        let mut encode_buf = Vec::new();
        for record in records {
            if let Some(last) = index_entries.last()
                && last.0.as_slice() >= record.key.as_slice()
            {
                return Err(SstableError::Internal(
                    "records must arrive in strictly increasing key order".into(),
                ));
            }

            encode_buf.clear();
            record.encode_to(&mut encode_buf);

            index_entries.push((record.key.clone(), written));
            bloom.insert(&record.key);

            if min_key.is_none() {
                min_key = Some(record.key.clone());
            }
            max_key = record.key.clone();
            record_count += 1;

            writer.write_all(&encode_buf)?;
            written += encode_buf.len() as u64;
        }

        let Some(min_key) = min_key else {
            // An empty table carries no information; callers skip the
            // build when nothing survives.
            drop(writer);
            let _ = fs::remove_file(&tmp_path);
            return Err(SstableError::Internal(
                "cannot build a table from an empty record stream".into(),
            ));
        };

        // 2. Index region.
        let mut index_bytes = Vec::new();
        let mut entry_offsets = Vec::with_capacity(index_entries.len());
        for (key, data_off) in &index_entries {
            entry_offsets.push(index_bytes.len() as u64);
            index_bytes.extend_from_slice(&(key.len() as u64).to_le_bytes());
            index_bytes.extend_from_slice(key);
            index_bytes.extend_from_slice(&data_off.to_le_bytes());
        }
        let index_off = written;
        written += write_block(&mut writer, &index_bytes)?;

        // 3. Summary region — min/max plus every Nth index entry.
        let summary_count = index_entries.len().div_ceil(self.summary_stride) as u64;
        let mut summary_bytes = Vec::new();
        summary_bytes.extend_from_slice(&(min_key.len() as u64).to_le_bytes());
        summary_bytes.extend_from_slice(&min_key);
        summary_bytes.extend_from_slice(&(max_key.len() as u64).to_le_bytes());
        summary_bytes.extend_from_slice(&max_key);
        summary_bytes.extend_from_slice(&summary_count.to_le_bytes());
        for (i, (key, _)) in index_entries.iter().enumerate() {
            if i % self.summary_stride != 0 {
                continue;
            }
            summary_bytes.extend_from_slice(&(key.len() as u64).to_le_bytes());
            summary_bytes.extend_from_slice(key);
            summary_bytes.extend_from_slice(&entry_offsets[i].to_le_bytes());
        }
        let summary_off = written;
        written += write_block(&mut writer, &summary_bytes)?;

        // 4. Bloom region.
        let bloom_bytes = encoding::encode_to_vec(&bloom)?;
        let bloom_off = written;
        written += write_block(&mut writer, &bloom_bytes)?;

        // 5. Footer.
        let footer = Footer {
            data_off: 0,
            index_off,
            summary_off,
            bloom_off,
            record_count,
        };
        let footer_bytes = encode_footer(&footer);
        writer.write_all(&footer_bytes)?;
        written += footer_bytes.len() as u64;

        writer.flush()?;
        let file: File = writer
            .into_inner()
            .map_err(|e| SstableError::Internal(format!("flush failed: {e}")))?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &self.path)?;

        debug!(
            path = %self.path.display(),
            records = record_count,
            bytes = written,
            "SSTable sealed"
        );

        Ok(BuiltTable {
            min_key,
            max_key,
            record_count,
            file_size: written,
        })
    }
}

/// Writes `[len:4][content][crc32:4]`, returning the total bytes written.
fn write_block(writer: &mut impl Write, content: &[u8]) -> Result<u64, SstableError> {
    let mut hasher = Crc32::new();
    hasher.update(content);
    let crc = hasher.finalize();

    writer.write_all(&(content.len() as u32).to_le_bytes())?;
    writer.write_all(content)?;
    writer.write_all(&crc.to_le_bytes())?;

    Ok((content.len() + super::BLOCK_LEN_SIZE + super::BLOCK_CRC_SIZE) as u64)
}
