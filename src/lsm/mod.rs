//! LSM level manager — tracks tables across levels, answers point reads
//! newest-first, and drives compaction.
//!
//! ## Level shape
//!
//! - **L0** holds one table per memtable flush; key ranges may overlap,
//!   so the search order within L0 is newest table first.
//! - **L1 … Lmax** hold non-overlapping runs sorted by min key; at most
//!   one table per level can contain any given key.
//!
//! ## Triggers
//!
//! L0 compacts into L1 when its *table count* exceeds its budget; a level
//! `n ≥ 1` compacts into `n+1` when its *aggregate byte size* exceeds
//! `level_size_base · factor^(n-1)`. The bottom level merges in place.
//!
//! ## Crash windows
//!
//! Compaction writes all its outputs before touching the manifest, then
//! commits the swap with one atomic manifest update, then deletes its
//! inputs. A crash between "outputs written" and "manifest updated"
//! leaves orphan files; [`LsmTree::open`] reconciles the filesystem
//! against the manifest and deletes anything unlisted.

pub mod compaction;

#[cfg(test)]
mod tests;

use std::{
    fs,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::manifest::{Manifest, ManifestError, TableEntry};
use crate::record::Record;
use crate::sstable::{BuiltTable, SsTable, SstableError, TableBuilder, TableState};

pub(crate) const SSTABLE_DIR: &str = "sstable";

/// Errors returned by the LSM manager.
#[derive(Debug, Error)]
pub enum LsmError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Manifest failure. Corruption is fatal; write failures bubble up
    /// so the engine can turn read-only.
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// SSTable failure.
    #[error("sstable error: {0}")]
    Sstable(#[from] SstableError),

    /// Structural invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

/// The leveled tree of on-disk tables.
pub struct LsmTree {
    data_dir: PathBuf,
    manifest: Manifest,
    /// Open table handles per level. L0 is ordered newest-first;
    /// levels ≥ 1 are ordered by min key.
    levels: Vec<Vec<Arc<SsTable>>>,
    config: EngineConfig,
}

impl LsmTree {
    /// Opens the tree under `data_dir`: loads the manifest, sweeps orphan
    /// files, and opens every listed table.
    pub fn open(data_dir: impl AsRef<Path>, config: &EngineConfig) -> Result<Self, LsmError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;

        let manifest = Manifest::open(&data_dir, config.max_level)?;

        sweep_orphans(&data_dir, &manifest)?;

        let mut levels: Vec<Vec<Arc<SsTable>>> =
            vec![Vec::new(); manifest.level_count().max(config.max_level + 1)];
        for level in 0..manifest.level_count() {
            for entry in manifest.level(level) {
                let path = table_path(&data_dir, entry.level as usize, entry.id);
                let mut table = SsTable::open(&path).map_err(|e| {
                    LsmError::Internal(format!(
                        "manifest lists table {} but it failed to open: {e}",
                        entry.id
                    ))
                })?;
                table.id = entry.id;
                table.level = entry.level as usize;
                table.set_state(TableState::Live);
                levels[level].push(Arc::new(table));
            }
        }

        // L0 answers newest-first; ids are monotonic, so highest id wins.
        levels[0].sort_by(|a, b| b.id.cmp(&a.id));
        for level in levels.iter_mut().skip(1) {
            level.sort_by(|a, b| a.min_key().cmp(b.min_key()));
        }

        info!(
            dir = %data_dir.display(),
            tables = levels.iter().map(Vec::len).sum::<usize>(),
            "LSM tree opened"
        );

        Ok(Self {
            data_dir,
            manifest,
            levels,
            config: config.clone(),
        })
    }

    /// Searches all levels newest-first. The first table that knows the
    /// key answers — tombstone or not.
    pub fn get(&self, key: &[u8]) -> Result<Option<Record>, LsmError> {
        // L0: overlapping ranges, newest table first.
        for table in &self.levels[0] {
            if table.state() != TableState::Live {
                continue;
            }
            if let Some(record) = table.get(key)? {
                return Ok(Some(record));
            }
        }

        // Deeper levels: disjoint ranges, at most one candidate each.
        for level in self.levels.iter().skip(1) {
            let pos = level.partition_point(|table| table.min_key() <= key);
            if pos == 0 {
                continue;
            }
            let table = &level[pos - 1];
            if table.state() != TableState::Live || !table.covers(key) {
                continue;
            }
            if let Some(record) = table.get(key)? {
                return Ok(Some(record));
            }
        }

        Ok(None)
    }

    /// Builds one L0 table from a key-sorted record stream and commits it
    /// to the manifest. The table only becomes visible to readers after
    /// the manifest entry is durable.
    pub fn flush_into_l0<'a>(
        &mut self,
        records: impl Iterator<Item = &'a Record>,
        count: usize,
    ) -> Result<(), LsmError> {
        let id = self.manifest.allocate_table_id();
        let path = table_path(&self.data_dir, 0, id);
        ensure_level_dir(&self.data_dir, 0)?;

        let built = TableBuilder::new(&path, self.config.bloom_fp_rate, self.config.summary_stride)
            .build(records, count)?;

        self.manifest.add_table(table_entry(id, 0, &built));
        self.manifest.persist()?;

        let mut table = SsTable::open(&path)?;
        table.id = id;
        table.level = 0;
        table.set_state(TableState::Live);
        self.levels[0].insert(0, Arc::new(table));

        info!(id, records = built.record_count, "memtable flushed to L0");
        Ok(())
    }

    /// Runs compactions until every level is back under budget.
    pub fn maybe_compact(&mut self) -> Result<(), LsmError> {
        loop {
            let Some(level) = self.find_over_budget_level() else {
                return Ok(());
            };
            debug!(level, "compaction triggered");
            self.compact_level(level)?;
        }
    }

    /// Forces every populated level down into the bottom level, then
    /// merges the bottom level into a single run.
    pub fn compact_to_bottom(&mut self) -> Result<(), LsmError> {
        for level in 0..self.config.max_level {
            if !self.levels[level].is_empty() {
                self.compact_level(level)?;
            }
        }
        if self.levels[self.config.max_level].len() > 1 {
            self.compact_level(self.config.max_level)?;
        }
        Ok(())
    }

    fn find_over_budget_level(&self) -> Option<usize> {
        if self.levels[0].len() > self.config.level_zero_table_budget {
            return Some(0);
        }
        for level in 1..=self.config.max_level {
            let size: u64 = self.levels[level].iter().map(|t| t.file_size()).sum();
            if size > self.config.level_size_budget(level) {
                return Some(level);
            }
        }
        None
    }

    /// Number of live tables at `level`.
    pub fn table_count(&self, level: usize) -> usize {
        self.levels[level].len()
    }

    /// Live table counts for every level, L0 first.
    pub fn tables_per_level(&self) -> Vec<usize> {
        self.levels.iter().map(Vec::len).collect()
    }

    /// Total number of records across all live tables (physical, not
    /// deduplicated).
    pub fn total_records(&self) -> u64 {
        self.levels
            .iter()
            .flatten()
            .map(|table| table.record_count())
            .sum()
    }

    /// All live records for `key` across every table (used by tests to
    /// check physical dedup after compaction).
    pub fn physical_versions(&self, key: &[u8]) -> Result<Vec<Record>, LsmError> {
        let mut versions = Vec::new();
        for table in self.levels.iter().flatten() {
            if let Some(record) = table.get(key)? {
                versions.push(record);
            }
        }
        Ok(versions)
    }

}

/// `<data>/sstable/L<level>/tbl_<id:05>.sst`
pub(crate) fn table_path(data_dir: &Path, level: usize, id: u64) -> PathBuf {
    data_dir
        .join(SSTABLE_DIR)
        .join(format!("L{level}"))
        .join(format!("tbl_{id:05}.sst"))
}

pub(crate) fn ensure_level_dir(data_dir: &Path, level: usize) -> Result<(), io::Error> {
    fs::create_dir_all(data_dir.join(SSTABLE_DIR).join(format!("L{level}")))
}

fn table_entry(id: u64, level: u32, built: &BuiltTable) -> TableEntry {
    TableEntry {
        id,
        level,
        min_key: built.min_key.clone(),
        max_key: built.max_key.clone(),
        record_count: built.record_count,
        file_size: built.file_size,
    }
}

/// Deletes any table or temp file the manifest does not list — leftovers
/// from a crash between "outputs written" and "manifest updated".
fn sweep_orphans(data_dir: &Path, manifest: &Manifest) -> Result<(), LsmError> {
    let sstable_root = data_dir.join(SSTABLE_DIR);
    if !sstable_root.exists() {
        return Ok(());
    }

    let listed = manifest.all_table_ids();

    for level_entry in fs::read_dir(&sstable_root)? {
        let level_dir = level_entry?.path();
        if !level_dir.is_dir() {
            continue;
        }
        for file_entry in fs::read_dir(&level_dir)? {
            let path = file_entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if name.ends_with(".tmp") {
                warn!(path = %path.display(), "removing interrupted table build");
                fs::remove_file(&path)?;
                continue;
            }

            let id = name
                .strip_prefix("tbl_")
                .and_then(|s| s.strip_suffix(".sst"))
                .and_then(|s| s.parse::<u64>().ok());
            match id {
                Some(id) if listed.contains(&id) => {}
                _ => {
                    warn!(path = %path.display(), "removing orphan table file");
                    fs::remove_file(&path)?;
                }
            }
        }
    }

    Ok(())
}
