//! Engine configuration and startup validation.

use thiserror::Error;

/// When the WAL hands its buffers to the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// `fsync` after every append. Slowest, strongest.
    Always,

    /// `fsync` when a segment rotates (and on close).
    #[default]
    OnRotate,

    /// Never `fsync` explicitly; rely on the OS.
    Never,
}

/// Configuration for an [`Engine`](crate::engine::Engine) instance.
///
/// Validated once at [`Engine::open`](crate::engine::Engine::open);
/// invalid values abort initialization.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of entries the memtable may hold.
    pub memtable_max_entries: usize,

    /// Fraction of `memtable_max_entries` at which a flush is triggered,
    /// in `(0, 1]`.
    pub memtable_flush_threshold: f64,

    /// Maximum tower height of the memtable's skip list.
    pub skiplist_max_height: usize,

    /// WAL segment size cap in bytes; a segment rotates when an append
    /// would push it past this.
    pub wal_segment_cap: u64,

    /// WAL fsync policy.
    pub wal_sync: SyncPolicy,

    /// Read cache capacity in entries.
    pub cache_capacity: usize,

    /// Deepest level of the tree. Levels are numbered `0..=max_level`.
    pub max_level: usize,

    /// Number of tables L0 may hold before compacting into L1.
    pub level_zero_table_budget: usize,

    /// Aggregate byte budget of L1. Level `n` gets
    /// `level_size_base * level_size_factor^(n-1)`.
    pub level_size_base: u64,

    /// Geometric growth factor between level budgets.
    pub level_size_factor: u64,

    /// Per-file output budget at L1, scaled by `level_size_factor` for
    /// deeper levels. Compaction splits its output at this size.
    pub table_file_budget: u64,

    /// Target false-positive rate for each SSTable's bloom filter.
    pub bloom_fp_rate: f64,

    /// Summary stride: one sparse-index entry per this many index
    /// entries.
    pub summary_stride: usize,

    /// Token-bucket refill rate in operations per second.
    /// `0.0` disables admission control.
    pub rate_limit_per_sec: f64,

    /// Token-bucket burst size (bucket capacity).
    pub rate_limit_burst: usize,

    /// Whether `delete(k)` also probes the reserved sketch prefixes
    /// (`hll-k`, `cms-k`) when `k` itself is absent.
    pub probe_sketch_prefixes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memtable_max_entries: 1024,
            memtable_flush_threshold: 0.8,
            skiplist_max_height: 12,
            wal_segment_cap: 1024 * 1024,
            wal_sync: SyncPolicy::OnRotate,
            cache_capacity: 128,
            max_level: 3,
            level_zero_table_budget: 4,
            level_size_base: 8 * 1024 * 1024,
            level_size_factor: 10,
            table_file_budget: 2 * 1024 * 1024,
            bloom_fp_rate: 0.01,
            summary_stride: 16,
            rate_limit_per_sec: 0.0,
            rate_limit_burst: 0,
            probe_sketch_prefixes: true,
        }
    }
}

/// Startup-only configuration failure. Aborts [`Engine::open`](crate::engine::Engine::open).
#[derive(Debug, Error)]
#[error("invalid configuration: {field} {reason}")]
pub struct ConfigError {
    /// The offending field.
    pub field: &'static str,

    /// Why the value was rejected.
    pub reason: String,
}

impl ConfigError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl EngineConfig {
    /// Validates every field, returning the first offender.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memtable_max_entries == 0 {
            return Err(ConfigError::new("memtable_max_entries", "must be > 0"));
        }
        if !(self.memtable_flush_threshold > 0.0 && self.memtable_flush_threshold <= 1.0) {
            return Err(ConfigError::new(
                "memtable_flush_threshold",
                "must be in (0, 1]",
            ));
        }
        if self.skiplist_max_height == 0 {
            return Err(ConfigError::new("skiplist_max_height", "must be > 0"));
        }
        if self.wal_segment_cap == 0 {
            return Err(ConfigError::new("wal_segment_cap", "must be > 0"));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::new("cache_capacity", "must be > 0"));
        }
        if self.max_level == 0 {
            return Err(ConfigError::new("max_level", "must be ≥ 1"));
        }
        if self.level_zero_table_budget == 0 {
            return Err(ConfigError::new("level_zero_table_budget", "must be > 0"));
        }
        if self.level_size_base == 0 {
            return Err(ConfigError::new("level_size_base", "must be > 0"));
        }
        if self.level_size_factor < 2 {
            return Err(ConfigError::new("level_size_factor", "must be ≥ 2"));
        }
        if self.table_file_budget == 0 {
            return Err(ConfigError::new("table_file_budget", "must be > 0"));
        }
        if !(self.bloom_fp_rate > 0.0 && self.bloom_fp_rate < 1.0) {
            return Err(ConfigError::new("bloom_fp_rate", "must be in (0, 1)"));
        }
        if self.summary_stride == 0 {
            return Err(ConfigError::new("summary_stride", "must be > 0"));
        }
        if self.rate_limit_per_sec < 0.0 {
            return Err(ConfigError::new("rate_limit_per_sec", "must be ≥ 0"));
        }
        if self.rate_limit_per_sec > 0.0 && self.rate_limit_burst == 0 {
            return Err(ConfigError::new(
                "rate_limit_burst",
                "must be > 0 when rate limiting is enabled",
            ));
        }
        Ok(())
    }

    /// Entry count at which the memtable flushes.
    pub(crate) fn flush_trigger(&self) -> usize {
        let trigger = (self.memtable_max_entries as f64 * self.memtable_flush_threshold).ceil();
        (trigger as usize).clamp(1, self.memtable_max_entries)
    }

    /// Aggregate byte budget of level `n` (`n ≥ 1`).
    pub(crate) fn level_size_budget(&self, level: usize) -> u64 {
        debug_assert!(level >= 1);
        self.level_size_base
            .saturating_mul(self.level_size_factor.saturating_pow(level as u32 - 1))
    }

    /// Per-file output budget when compacting into level `n` (`n ≥ 1`).
    pub(crate) fn file_budget(&self, level: usize) -> u64 {
        debug_assert!(level >= 1);
        self.table_file_budget
            .saturating_mul(self.level_size_factor.saturating_pow(level as u32 - 1))
    }
}
