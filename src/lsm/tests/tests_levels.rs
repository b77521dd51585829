use std::fs;

use tempfile::TempDir;

use crate::config::EngineConfig;
use crate::lsm::LsmTree;
use crate::record::Record;

pub(super) fn small_tree_config() -> EngineConfig {
    EngineConfig {
        level_zero_table_budget: 2,
        level_size_base: 10_000,
        level_size_factor: 10,
        table_file_budget: 4 * 1024,
        max_level: 2,
        summary_stride: 4,
        ..EngineConfig::default()
    }
}

pub(super) fn batch(start: usize, count: usize, timestamp: u64) -> Vec<Record> {
    (start..start + count)
        .map(|i| {
            Record::new(
                format!("key-{i:05}").into_bytes(),
                format!("value-{i:05}@{timestamp}").into_bytes(),
                timestamp,
            )
        })
        .collect()
}

pub(super) fn flush(tree: &mut LsmTree, records: &[Record]) {
    tree.flush_into_l0(records.iter(), records.len()).unwrap();
}

#[test]
fn each_flush_creates_one_l0_table() {
    let tmp = TempDir::new().unwrap();
    let mut tree = LsmTree::open(tmp.path(), &small_tree_config()).unwrap();

    for round in 0..2 {
        flush(&mut tree, &batch(0, 20, round));
    }

    assert_eq!(tree.table_count(0), 2);
    assert_eq!(tree.tables_per_level(), vec![2, 0, 0]);
}

#[test]
fn overlapping_l0_tables_answer_newest_first() {
    let tmp = TempDir::new().unwrap();
    let mut tree = LsmTree::open(tmp.path(), &small_tree_config()).unwrap();

    flush(&mut tree, &batch(0, 10, 1));
    flush(&mut tree, &batch(0, 10, 2));

    let record = tree.get(b"key-00003").unwrap().unwrap();
    assert_eq!(record.timestamp, 2);
    assert_eq!(record.value, b"value-00003@2");
}

#[test]
fn reads_fall_through_to_deeper_levels() {
    let tmp = TempDir::new().unwrap();
    let config = small_tree_config();
    let mut tree = LsmTree::open(tmp.path(), &config).unwrap();

    // Push a batch down to L1, then add a disjoint L0 batch.
    flush(&mut tree, &batch(0, 20, 1));
    tree.compact_level(0).unwrap();
    assert_eq!(tree.table_count(0), 0);
    assert!(tree.table_count(1) >= 1);

    flush(&mut tree, &batch(100, 10, 2));

    // L0-resident key.
    assert_eq!(tree.get(b"key-00105").unwrap().unwrap().timestamp, 2);
    // L1-resident key.
    assert_eq!(tree.get(b"key-00005").unwrap().unwrap().timestamp, 1);
    // Absent key.
    assert!(tree.get(b"key-99999").unwrap().is_none());
}

#[test]
fn reopen_restores_all_levels() {
    let tmp = TempDir::new().unwrap();
    let config = small_tree_config();
    {
        let mut tree = LsmTree::open(tmp.path(), &config).unwrap();
        flush(&mut tree, &batch(0, 30, 1));
        tree.compact_level(0).unwrap();
        flush(&mut tree, &batch(50, 10, 2));
    }

    let tree = LsmTree::open(tmp.path(), &config).unwrap();
    assert_eq!(tree.get(b"key-00010").unwrap().unwrap().timestamp, 1);
    assert_eq!(tree.get(b"key-00055").unwrap().unwrap().timestamp, 2);
}

#[test]
fn orphan_tables_are_swept_at_open() {
    let tmp = TempDir::new().unwrap();
    let config = small_tree_config();
    {
        let mut tree = LsmTree::open(tmp.path(), &config).unwrap();
        flush(&mut tree, &batch(0, 10, 1));
    }

    // Drop an orphan table file and an interrupted build next to the
    // legitimate one.
    let l0_dir = tmp.path().join("sstable").join("L0");
    fs::write(l0_dir.join("tbl_09999.sst"), b"pretend table").unwrap();
    fs::write(l0_dir.join("tbl_09998.tmp"), b"half-written").unwrap();

    let tree = LsmTree::open(tmp.path(), &config).unwrap();
    assert_eq!(tree.table_count(0), 1);
    assert!(!l0_dir.join("tbl_09999.sst").exists());
    assert!(!l0_dir.join("tbl_09998.tmp").exists());

    // The legitimate table still answers.
    assert!(tree.get(b"key-00000").unwrap().is_some());
}

#[test]
fn tombstone_records_are_surfaced_not_hidden() {
    let tmp = TempDir::new().unwrap();
    let mut tree = LsmTree::open(tmp.path(), &small_tree_config()).unwrap();

    let mut records = batch(0, 5, 1);
    records[2] = Record::tombstone(records[2].key.clone(), 1);
    flush(&mut tree, &records);

    let found = tree.get(b"key-00002").unwrap().unwrap();
    assert!(found.tombstone);
}
