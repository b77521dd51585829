//! The engine facade — threads every operation through the pipeline.
//!
//! ## Write path
//!
//! `put` / `delete` / `edit` append to the WAL first (durability), then
//! update the memtable, then the read cache. When the memtable crosses
//! its flush trigger it is streamed into a new L0 SSTable, the WAL drops
//! its old segments, and the LSM manager compacts any level that went
//! over budget — synchronously, on the writing thread.
//!
//! ## Read path
//!
//! `get` consults the memtable (authoritative for tombstones), then the
//! LRU cache, then the SSTables newest-first across all levels. The first
//! definitive answer — value or tombstone — ends the search.
//!
//! ## Concurrency model
//!
//! All state sits behind one `Arc<RwLock<EngineInner>>`: writes take the
//! write lock, reads take the read lock. The read cache and the token
//! bucket use their own small mutexes so that reads can promote cache
//! entries without the write lock. SSTable files are immutable, so no
//! further locking guards them.
//!
//! ## Degraded mode
//!
//! A failed durability-critical write (WAL append, SSTable flush,
//! manifest update) flips the engine into **read-only** mode: reads keep
//! working, writes fail fast with [`EngineError::ReadOnly`].
//!
//! ## Admission control
//!
//! With a configured rate limit, every public operation takes one token
//! before entering the pipeline and fails with
//! [`EngineError::RateLimited`] when the bucket is empty.

#[cfg(test)]
mod tests;

use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use thiserror::Error;
use tracing::{info, warn};

use crate::cache::ReadCache;
use crate::config::{ConfigError, EngineConfig};
use crate::encoding;
use crate::lsm::{LsmError, LsmTree};
use crate::memtable::{Memtable, MemtableGet};
use crate::ratelimit::TokenBucket;
use crate::record::Record;
use crate::sketch::{CMS_PREFIX, CountMinSketch, HLL_PREFIX, HyperLogLog};
use crate::wal::{Wal, WalError};

const WAL_DIR: &str = "wal";
const DATA_DIR: &str = "data";

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid configuration; raised only by [`Engine::open`].
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// WAL failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// LSM / SSTable / manifest failure.
    #[error("LSM error: {0}")]
    Lsm(#[from] LsmError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The admission token bucket is empty; back off and retry.
    #[error("rate limited")]
    RateLimited,

    /// A durability-critical write failed earlier; the engine accepts
    /// reads only.
    #[error("engine is read-only after a write failure")]
    ReadOnly,

    /// Internal invariant violation (poisoned lock, empty key, …).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Snapshot of engine statistics returned by [`Engine::stats`].
#[derive(Debug)]
pub struct EngineStats {
    /// Entries currently buffered in the memtable.
    pub memtable_entries: usize,

    /// Entries currently held by the read cache.
    pub cache_entries: usize,

    /// Live table count per level, L0 first.
    pub tables_per_level: Vec<usize>,

    /// Whether the engine has degraded to read-only mode.
    pub read_only: bool,
}

struct EngineInner {
    config: EngineConfig,
    wal: Wal,
    memtable: Memtable,
    cache: Mutex<ReadCache>,
    lsm: LsmTree,
    limiter: Option<Mutex<TokenBucket>>,
    read_only: bool,
    root: PathBuf,
}

/// The storage engine handle.
///
/// Cheap to clone; all clones share the same underlying state.
pub struct Engine {
    inner: Arc<RwLock<EngineInner>>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Engine {
    /// Opens (or creates) an engine rooted at `path`.
    ///
    /// Validates the configuration, loads the manifest and tables, sweeps
    /// orphan files, replays the WAL into a fresh memtable, and flushes
    /// immediately if the replayed backlog already crosses the trigger.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let lsm = LsmTree::open(root.join(DATA_DIR), &config)?;
        let (wal, recovered) = Wal::open(
            root.join(WAL_DIR),
            config.wal_segment_cap,
            config.wal_sync,
        )?;

        let mut memtable = Memtable::new(
            config.memtable_max_entries,
            config.flush_trigger(),
            config.skiplist_max_height,
        );
        let recovered_count = recovered.len();
        for record in recovered {
            // Replayed exactly like a live write, minus the re-log.
            memtable.put(record);
        }

        let limiter = if config.rate_limit_per_sec > 0.0 {
            Some(Mutex::new(TokenBucket::new(
                config.rate_limit_per_sec,
                config.rate_limit_burst,
            )))
        } else {
            None
        };

        let mut inner = EngineInner {
            cache: Mutex::new(ReadCache::new(config.cache_capacity)),
            memtable,
            wal,
            lsm,
            limiter,
            read_only: false,
            root,
            config,
        };

        if inner.memtable.should_flush() {
            Self::flush_inner(&mut inner)?;
        }

        info!(
            root = %inner.root.display(),
            recovered = recovered_count,
            "engine opened"
        );

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
        })
    }

    /// Inserts or updates a key.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<(), EngineError> {
        let mut inner = self.write_lock()?;
        Self::admit(&inner)?;
        Self::write_record(&mut inner, key.as_bytes(), value.to_vec(), false, false)
    }

    /// Looks up a key.
    ///
    /// Returns `Ok(None)` for deleted or never-written keys.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, EngineError> {
        let inner = self.read_lock()?;
        Self::admit(&inner)?;
        Self::lookup(&inner, key.as_bytes())
    }

    /// Deletes a key.
    ///
    /// When the key lives in the memtable it is overwritten with a
    /// tombstone; when it only exists in an SSTable, a tombstone is
    /// pushed through the write path so it shadows the table entry until
    /// compaction drops both. With `probe_sketch_prefixes` enabled, the
    /// reserved `hll-` / `cms-` variants are tried as well.
    ///
    /// Returns `Ok(true)` when something was deleted.
    pub fn delete(&self, key: &str) -> Result<bool, EngineError> {
        let mut inner = self.write_lock()?;
        Self::admit(&inner)?;
        if inner.read_only {
            return Err(EngineError::ReadOnly);
        }

        let mut candidates: Vec<Vec<u8>> = vec![key.as_bytes().to_vec()];
        if inner.config.probe_sketch_prefixes {
            candidates.push(format!("{HLL_PREFIX}{key}").into_bytes());
            candidates.push(format!("{CMS_PREFIX}{key}").into_bytes());
        }

        // A live memtable entry is overwritten with a tombstone in place.
        for candidate in &candidates {
            if inner.memtable.contains_live(candidate) {
                Self::write_record(&mut inner, candidate, Vec::new(), true, false)?;
                return Ok(true);
            }
        }

        // Otherwise the tombstone must still enter the write path, so it
        // travels through flushes and shadows whatever the tables hold.
        for candidate in &candidates {
            if Self::lookup(&inner, candidate)?.is_some() {
                Self::write_record(&mut inner, candidate, Vec::new(), true, false)?;
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Updates a key that is expected to exist.
    ///
    /// Identical to [`put`](Engine::put), except that the flush check is
    /// skipped when the key is already buffered — overwriting an entry
    /// cannot grow the memtable.
    pub fn edit(&self, key: &str, value: &[u8]) -> Result<(), EngineError> {
        let mut inner = self.write_lock()?;
        Self::admit(&inner)?;
        let buffered = inner.memtable.contains(key.as_bytes());
        Self::write_record(&mut inner, key.as_bytes(), value.to_vec(), false, buffered)
    }

    /// Renders the value under `key` as a human-readable string,
    /// dispatching on the reserved sketch prefixes.
    pub fn get_as_string(&self, key: &str) -> Result<String, EngineError> {
        let inner = self.read_lock()?;
        Self::admit(&inner)?;

        if let Some(value) = Self::lookup(&inner, key.as_bytes())? {
            return Ok(String::from_utf8_lossy(&value).into_owned());
        }

        let hll_key = format!("{HLL_PREFIX}{key}");
        if let Some(blob) = Self::lookup(&inner, hll_key.as_bytes())? {
            return Ok(match encoding::decode_from_slice::<HyperLogLog>(&blob) {
                Ok((hll, _)) => {
                    format!("hll sketch, estimated cardinality: {:.2}", hll.estimate())
                }
                Err(_) => format!("malformed hll sketch under {hll_key:?}"),
            });
        }

        let cms_key = format!("{CMS_PREFIX}{key}");
        if let Some(blob) = Self::lookup(&inner, cms_key.as_bytes())? {
            return Ok(match encoding::decode_from_slice::<CountMinSketch>(&blob) {
                Ok((cms, _)) => format!("cms sketch ({}x{})", cms.width(), cms.depth()),
                Err(_) => format!("malformed cms sketch under {cms_key:?}"),
            });
        }

        Ok(format!("no value found for key {key:?}"))
    }

    /// Forces a memtable flush. A no-op when the memtable is empty.
    pub fn flush(&self) -> Result<(), EngineError> {
        let mut inner = self.write_lock()?;
        Self::flush_inner(&mut inner)
    }

    /// Forces a full compaction of every level down to the bottom.
    pub fn compact(&self) -> Result<(), EngineError> {
        let mut inner = self.write_lock()?;
        let result = inner.lsm.compact_to_bottom();
        Self::note_write_failure(&mut inner, &result);
        result.map_err(Into::into)
    }

    /// Returns a snapshot of engine statistics.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let inner = self.read_lock()?;
        let cache_entries = Self::cache_lock(&inner)?.len();
        Ok(EngineStats {
            memtable_entries: inner.memtable.len(),
            cache_entries,
            tables_per_level: inner.lsm.tables_per_level(),
            read_only: inner.read_only,
        })
    }

    /// Gracefully shuts down: flushes the memtable, syncs the WAL, and
    /// fsyncs the data directories.
    pub fn close(&self) -> Result<(), EngineError> {
        let mut inner = self.write_lock()?;
        Self::flush_inner(&mut inner)?;
        inner.wal.sync()?;

        for dir in [
            inner.root.clone(),
            inner.root.join(WAL_DIR),
            inner.root.join(DATA_DIR),
        ] {
            if let Ok(handle) = File::open(&dir) {
                handle.sync_all()?;
            }
        }

        info!(root = %inner.root.display(), "engine closed");
        Ok(())
    }

    // --------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------

    fn write_lock(&self) -> Result<std::sync::RwLockWriteGuard<'_, EngineInner>, EngineError> {
        self.inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))
    }

    fn read_lock(&self) -> Result<std::sync::RwLockReadGuard<'_, EngineInner>, EngineError> {
        self.inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))
    }

    fn cache_lock(inner: &EngineInner) -> Result<MutexGuard<'_, ReadCache>, EngineError> {
        inner
            .cache
            .lock()
            .map_err(|_| EngineError::Internal("cache mutex poisoned".into()))
    }

    /// Takes one admission token, failing fast when the bucket is empty.
    fn admit(inner: &EngineInner) -> Result<(), EngineError> {
        let Some(limiter) = &inner.limiter else {
            return Ok(());
        };
        let mut bucket = limiter
            .lock()
            .map_err(|_| EngineError::Internal("limiter mutex poisoned".into()))?;
        if bucket.try_acquire() {
            Ok(())
        } else {
            Err(EngineError::RateLimited)
        }
    }

    /// Timestamps are assigned here, at WAL time; append order defines
    /// the authoritative timeline.
    fn now_nanos() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }

    /// The write pipeline: WAL append, memtable insert, cache touch,
    /// conditional flush + compaction.
    fn write_record(
        inner: &mut EngineInner,
        key: &[u8],
        value: Vec<u8>,
        tombstone: bool,
        bypass_flush_check: bool,
    ) -> Result<(), EngineError> {
        if inner.read_only {
            return Err(EngineError::ReadOnly);
        }
        if key.is_empty() {
            return Err(EngineError::Internal("key must not be empty".into()));
        }

        let timestamp = Self::now_nanos();
        let record = if tombstone {
            Record::tombstone(key.to_vec(), timestamp)
        } else {
            Record::new(key.to_vec(), value, timestamp)
        };

        if let Err(e) = inner.wal.append(&record) {
            warn!(error = %e, "WAL append failed; entering read-only mode");
            inner.read_only = true;
            return Err(e.into());
        }

        {
            let mut cache = Self::cache_lock(inner)?;
            if tombstone {
                cache.invalidate(&record.key);
            } else {
                cache.touch(&record.key, &record.value);
            }
        }

        inner.memtable.put(record);

        if !bypass_flush_check && inner.memtable.should_flush() {
            Self::flush_inner(inner)?;
        }

        Ok(())
    }

    /// Streams the memtable into a new L0 table, truncates the WAL, and
    /// lets the LSM manager rebalance. No-op on an empty memtable.
    fn flush_inner(inner: &mut EngineInner) -> Result<(), EngineError> {
        if inner.memtable.is_empty() {
            return Ok(());
        }

        let count = inner.memtable.len();
        let flush = inner
            .lsm
            .flush_into_l0(inner.memtable.iter_for_flush(), count);
        Self::note_write_failure(inner, &flush);
        flush?;

        // The memtable contents are durable in the new table; the log
        // segments covering them can go.
        if let Err(e) = inner.wal.remove_old_segments() {
            warn!(error = %e, "WAL truncation failed; entering read-only mode");
            inner.read_only = true;
            return Err(e.into());
        }

        inner.memtable.clear();

        let compaction = inner.lsm.maybe_compact();
        Self::note_write_failure(inner, &compaction);
        compaction?;

        Ok(())
    }

    /// Flips the engine read-only when a durability-critical operation
    /// failed.
    fn note_write_failure<T>(inner: &mut EngineInner, result: &Result<T, LsmError>) {
        if let Err(e) = result {
            warn!(error = %e, "durability-critical write failed; entering read-only mode");
            inner.read_only = true;
        }
    }

    /// The read pipeline: memtable → cache → SSTables newest-first.
    fn lookup(inner: &EngineInner, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        match inner.memtable.get(key) {
            MemtableGet::Found(value) => {
                Self::cache_lock(inner)?.touch(key, &value);
                return Ok(Some(value));
            }
            MemtableGet::Tombstone => return Ok(None),
            MemtableGet::NotFound => {}
        }

        if let Some(value) = Self::cache_lock(inner)?.get(key) {
            return Ok(Some(value));
        }

        match inner.lsm.get(key)? {
            Some(record) if record.tombstone => Ok(None),
            Some(record) => {
                Self::cache_lock(inner)?.touch(key, &record.value);
                Ok(Some(record.value))
            }
            None => Ok(None),
        }
    }
}
