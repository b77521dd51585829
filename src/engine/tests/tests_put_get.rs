use tempfile::TempDir;

use crate::engine::Engine;
use crate::engine::tests::helpers::*;

#[test]
fn put_then_get() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

    engine.put("a", b"1").unwrap();
    engine.put("b", b"2").unwrap();

    assert_eq!(engine.get("a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get("b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(engine.get("c").unwrap(), None);
}

#[test]
fn consecutive_writes_latest_wins() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

    engine.put("k", b"v1").unwrap();
    engine.put("k", b"v2").unwrap();
    engine.put("k", b"v3").unwrap();

    assert_eq!(engine.get("k").unwrap(), Some(b"v3".to_vec()));
}

#[test]
fn reads_cross_the_flush_boundary() {
    let tmp = TempDir::new().unwrap();
    let engine = engine_with_keys(tmp.path(), small_memtable_config(), 100);

    let stats = engine.stats().unwrap();
    assert!(stats.tables_per_level[0] > 0, "expected flushed tables");

    for i in 0..100 {
        let key = format!("key-{i:05}");
        let expected = format!("value-{i:05}").into_bytes();
        assert_eq!(engine.get(&key).unwrap(), Some(expected), "key {i}");
    }
}

#[test]
fn overwrites_across_flushes_keep_newest() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), small_memtable_config()).unwrap();

    for round in 0..3 {
        for i in 0..20 {
            let value = format!("round-{round}");
            engine.put(&format!("key-{i:02}"), value.as_bytes()).unwrap();
        }
    }

    for i in 0..20 {
        assert_eq!(
            engine.get(&format!("key-{i:02}")).unwrap(),
            Some(b"round-2".to_vec())
        );
    }
}

#[test]
fn edit_updates_value() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

    engine.put("k", b"original").unwrap();
    engine.edit("k", b"patched").unwrap();

    assert_eq!(engine.get("k").unwrap(), Some(b"patched".to_vec()));
}

#[test]
fn edit_of_buffered_key_skips_the_flush_check() {
    let tmp = TempDir::new().unwrap();
    let config = crate::config::EngineConfig {
        memtable_max_entries: 4,
        memtable_flush_threshold: 1.0,
        ..memtable_only_config()
    };
    let engine = Engine::open(tmp.path(), config).unwrap();

    engine.put("a", b"1").unwrap();
    engine.put("b", b"2").unwrap();
    engine.put("c", b"3").unwrap();

    // Overwriting a buffered key cannot grow the memtable, so even at
    // the trigger boundary no flush happens.
    engine.edit("a", b"1'").unwrap();
    let stats = engine.stats().unwrap();
    assert_eq!(stats.tables_per_level.iter().sum::<usize>(), 0);

    // A fresh key crosses the trigger and flushes.
    engine.put("d", b"4").unwrap();
    let stats = engine.stats().unwrap();
    assert_eq!(stats.tables_per_level[0], 1);
    assert_eq!(stats.memtable_entries, 0);
}

#[test]
fn edit_of_unknown_key_behaves_like_put() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

    engine.edit("fresh", b"value").unwrap();
    assert_eq!(engine.get("fresh").unwrap(), Some(b"value".to_vec()));
}

#[test]
fn empty_key_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();
    assert!(engine.put("", b"v").is_err());
}

#[test]
fn empty_value_round_trips() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

    engine.put("empty", b"").unwrap();
    assert_eq!(engine.get("empty").unwrap(), Some(Vec::new()));
}

#[test]
fn flush_of_empty_memtable_is_a_noop() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

    engine.flush().unwrap();
    engine.flush().unwrap();

    let stats = engine.stats().unwrap();
    assert_eq!(stats.tables_per_level.iter().sum::<usize>(), 0);
}

#[test]
fn stats_reflect_state() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

    engine.put("a", b"1").unwrap();
    engine.put("b", b"2").unwrap();
    engine.get("a").unwrap();

    let stats = engine.stats().unwrap();
    assert_eq!(stats.memtable_entries, 2);
    assert!(stats.cache_entries >= 1);
    assert!(!stats.read_only);
}
