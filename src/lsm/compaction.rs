//! Level compaction: k-way merge, version dedup, tombstone GC, and the
//! atomic table swap.
//!
//! ## Merge order
//!
//! Input streams are merged by `(key ASC, timestamp DESC, source ASC)`,
//! where source 0 is the newest input. The first record seen for a key is
//! therefore its newest version; every later one is discarded. Exact
//! timestamp ties resolve to the newer physical write (the lower level /
//! younger table).
//!
//! ## Tombstone GC
//!
//! A tombstone must outlive every older version of its key. Merging into
//! an intermediate level cannot prove that no older version hides below,
//! so tombstones are carried along. Only when the output lands at the
//! bottom level — the merge then covers every level below the
//! tombstone's source — are they dropped.
//!
//! ## Commit protocol
//!
//! 1. Write every output table (sealed via temp-file + rename).
//! 2. One atomic manifest update: inputs out, outputs in.
//! 3. Install the new handles, retire the inputs, delete their files.
//!
//! Crashing before step 2 leaves orphans for the startup sweep; crashing
//! after it leaves input files that the sweep also removes, because the
//! manifest no longer lists them.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs;
use std::sync::Arc;

use tracing::{debug, info};

use crate::record::Record;
use crate::sstable::{SsTable, TableBuilder, TableState};

use super::{LsmError, LsmTree, ensure_level_dir, table_path};
use crate::manifest::TableEntry;

impl LsmTree {
    /// Merges `level` into the one below it (or in place at the bottom
    /// level), leaving the target level's runs disjoint.
    pub(crate) fn compact_level(&mut self, level: usize) -> Result<(), LsmError> {
        let max_level = self.config.max_level;
        let target = if level == max_level { level } else { level + 1 };

        // Upper inputs: the whole level. In-place bottom merges need at
        // least two tables to be worth anything.
        let upper: Vec<Arc<SsTable>> = self.levels[level].clone();
        if upper.is_empty() || (level == target && upper.len() < 2) {
            return Ok(());
        }

        // Key span of the upper inputs decides which target tables ride
        // along; pulling the overlapping ones in is what keeps the target
        // level disjoint.
        let span_min = upper
            .iter()
            .map(|t| t.min_key().to_vec())
            .min()
            .unwrap_or_default();
        let span_max = upper
            .iter()
            .map(|t| t.max_key().to_vec())
            .max()
            .unwrap_or_default();

        let lower: Vec<Arc<SsTable>> = if target == level {
            Vec::new()
        } else {
            self.levels[target]
                .iter()
                .filter(|t| t.overlaps(&span_min, &span_max))
                .cloned()
                .collect()
        };

        // Newest-first input order: L0 is already stored newest-first,
        // and everything in `upper` is newer than anything in `lower`.
        let inputs: Vec<Arc<SsTable>> = upper.iter().chain(lower.iter()).cloned().collect();
        let input_ids: Vec<u64> = inputs.iter().map(|t| t.id).collect();
        let drop_tombstones = target == max_level;

        for table in &inputs {
            table.set_state(TableState::Retiring);
        }

        debug!(
            level,
            target,
            inputs = inputs.len(),
            drop_tombstones,
            "compaction merge started"
        );

        // 1. Merge, dedup, split into size-budgeted outputs.
        let iters = inputs.iter().map(|t| t.iter()).collect::<Vec<_>>();
        let merged = MergeIterator::new(iters);

        let file_budget = self.config.file_budget(target.max(1));
        let mut outputs: Vec<(u64, TableEntry)> = Vec::new();
        let mut chunk: Vec<Record> = Vec::new();
        let mut chunk_bytes: u64 = 0;
        let mut last_key: Option<Vec<u8>> = None;
        let mut dropped_versions: u64 = 0;
        let mut dropped_tombstones: u64 = 0;

        let mut seal_chunk = |tree: &mut LsmTree,
                              chunk: &mut Vec<Record>|
         -> Result<(), LsmError> {
            if chunk.is_empty() {
                return Ok(());
            }
            let id = tree.manifest.allocate_table_id();
            let path = table_path(&tree.data_dir, target, id);
            ensure_level_dir(&tree.data_dir, target)?;
            let built =
                TableBuilder::new(&path, tree.config.bloom_fp_rate, tree.config.summary_stride)
                    .build(chunk.iter(), chunk.len())?;
            outputs.push((
                id,
                TableEntry {
                    id,
                    level: target as u32,
                    min_key: built.min_key,
                    max_key: built.max_key,
                    record_count: built.record_count,
                    file_size: built.file_size,
                },
            ));
            chunk.clear();
            Ok(())
        };

        for record in merged {
            // First record per key is the newest version; skip the rest.
            if last_key.as_deref() == Some(record.key.as_slice()) {
                dropped_versions += 1;
                continue;
            }
            last_key = Some(record.key.clone());

            if record.tombstone && drop_tombstones {
                dropped_tombstones += 1;
                continue;
            }

            chunk_bytes += record.encoded_len() as u64;
            chunk.push(record);

            if chunk_bytes >= file_budget {
                seal_chunk(self, &mut chunk)?;
                chunk_bytes = 0;
            }
        }
        seal_chunk(self, &mut chunk)?;
        drop(seal_chunk);

        // 2. Atomic manifest swap.
        let added: Vec<TableEntry> = outputs.iter().map(|(_, entry)| entry.clone()).collect();
        self.manifest.apply_compaction(added, &input_ids);
        self.manifest.persist()?;

        // 3. Install outputs, retire inputs.
        let mut new_handles = Vec::with_capacity(outputs.len());
        for (id, _) in &outputs {
            let path = table_path(&self.data_dir, target, *id);
            let mut table = SsTable::open(&path)?;
            table.id = *id;
            table.level = target;
            table.set_state(TableState::Live);
            new_handles.push(Arc::new(table));
        }

        self.levels[level].retain(|t| !input_ids.contains(&t.id));
        self.levels[target].retain(|t| !input_ids.contains(&t.id));
        self.levels[target].extend(new_handles);
        self.levels[target].sort_by(|a, b| a.min_key().cmp(b.min_key()));

        for table in &inputs {
            if let Err(e) = fs::remove_file(table.path()) {
                tracing::warn!(id = table.id, error = %e, "failed to delete compacted table");
            }
            table.set_state(TableState::Deleted);
        }

        info!(
            level,
            target,
            inputs = input_ids.len(),
            outputs = outputs.len(),
            dropped_versions,
            dropped_tombstones,
            "compaction applied"
        );

        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// MergeIterator — heap-based k-way merge over table scans
// ------------------------------------------------------------------------------------------------

/// Merges several key-sorted record streams into one stream ordered by
/// `(key ASC, timestamp DESC, source ASC)`.
///
/// Sources must be passed newest-first: on exact timestamp ties the
/// record from the lower source index wins, which is how "later input
/// position / newer physical write" is encoded.
pub struct MergeIterator<I> {
    iters: Vec<I>,
    heap: BinaryHeap<HeapEntry>,
}

struct HeapEntry {
    record: Record,
    source: usize,
}

impl HeapEntry {
    /// `(key ASC, timestamp DESC, source ASC)`.
    fn ordering_key(&self, other: &Self) -> Ordering {
        self.record
            .key
            .cmp(&other.record.key)
            .then_with(|| other.record.timestamp.cmp(&self.record.timestamp))
            .then_with(|| self.source.cmp(&other.source))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse to pop the smallest first.
        self.ordering_key(other).reverse()
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.ordering_key(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl<I: Iterator<Item = Record>> MergeIterator<I> {
    /// Builds the merge over `iters`, newest source first.
    pub fn new(mut iters: Vec<I>) -> Self {
        let mut heap = BinaryHeap::new();
        for (source, iter) in iters.iter_mut().enumerate() {
            if let Some(record) = iter.next() {
                heap.push(HeapEntry { record, source });
            }
        }
        Self { iters, heap }
    }
}

impl<I: Iterator<Item = Record>> Iterator for MergeIterator<I> {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.heap.pop()?;
        if let Some(next) = self.iters[entry.source].next() {
            self.heap.push(HeapEntry {
                record: next,
                source: entry.source,
            });
        }
        Some(entry.record)
    }
}
