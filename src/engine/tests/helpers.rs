use crate::config::EngineConfig;
use crate::engine::Engine;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing controlled by `RUST_LOG`. Safe to call repeatedly —
/// only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Large memtable: nothing flushes unless the test asks for it.
pub fn memtable_only_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        memtable_max_entries: 64 * 1024,
        memtable_flush_threshold: 1.0,
        ..EngineConfig::default()
    }
}

/// Small memtable: flushes after 16 entries, generous level budgets so
/// compaction stays manual.
pub fn small_memtable_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        memtable_max_entries: 16,
        memtable_flush_threshold: 1.0,
        level_zero_table_budget: 1000,
        ..EngineConfig::default()
    }
}

/// Tight budgets everywhere: flushes and compactions happen organically.
pub fn churn_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        memtable_max_entries: 16,
        memtable_flush_threshold: 1.0,
        level_zero_table_budget: 2,
        level_size_base: 16 * 1024,
        level_size_factor: 4,
        table_file_budget: 4 * 1024,
        max_level: 2,
        ..EngineConfig::default()
    }
}

/// Open an engine and load `count` keyed values through the write path.
pub fn engine_with_keys(path: &Path, config: EngineConfig, count: usize) -> Engine {
    let engine = Engine::open(path, config).expect("open");
    for i in 0..count {
        let key = format!("key-{i:05}");
        let value = format!("value-{i:05}");
        engine.put(&key, value.as_bytes()).expect("put");
    }
    engine
}
