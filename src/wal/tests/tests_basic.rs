use tempfile::TempDir;

use crate::config::SyncPolicy;
use crate::record::Record;
use crate::wal::Wal;

fn record(key: &str, value: &str, timestamp: u64) -> Record {
    Record::new(key.as_bytes().to_vec(), value.as_bytes().to_vec(), timestamp)
}

#[test]
fn open_empty_directory_recovers_nothing() {
    let tmp = TempDir::new().unwrap();
    let (wal, recovered) = Wal::open(tmp.path(), 1024 * 1024, SyncPolicy::OnRotate).unwrap();
    assert!(recovered.is_empty());
    assert_eq!(wal.active_seq(), 1);
}

#[test]
fn append_then_reopen_replays_in_order() {
    let tmp = TempDir::new().unwrap();
    let inserted: Vec<Record> = (0..10)
        .map(|i| record(&format!("key-{i}"), &format!("value-{i}"), i))
        .collect();

    {
        let (mut wal, _) = Wal::open(tmp.path(), 1024 * 1024, SyncPolicy::OnRotate).unwrap();
        for r in &inserted {
            wal.append(r).unwrap();
        }
    }

    let (_, recovered) = Wal::open(tmp.path(), 1024 * 1024, SyncPolicy::OnRotate).unwrap();
    assert_eq!(recovered, inserted);
}

#[test]
fn tombstones_survive_replay() {
    let tmp = TempDir::new().unwrap();
    {
        let (mut wal, _) = Wal::open(tmp.path(), 1024 * 1024, SyncPolicy::Always).unwrap();
        wal.append(&record("k", "v", 1)).unwrap();
        wal.append(&Record::tombstone(b"k".to_vec(), 2)).unwrap();
    }

    let (_, recovered) = Wal::open(tmp.path(), 1024 * 1024, SyncPolicy::OnRotate).unwrap();
    assert_eq!(recovered.len(), 2);
    assert!(!recovered[0].tombstone);
    assert!(recovered[1].tombstone);
    assert!(recovered[1].value.is_empty());
}

#[test]
fn remove_old_segments_leaves_only_active() {
    let tmp = TempDir::new().unwrap();
    let (mut wal, _) = Wal::open(tmp.path(), 1024 * 1024, SyncPolicy::OnRotate).unwrap();
    for i in 0..5 {
        wal.append(&record(&format!("k{i}"), "v", i)).unwrap();
    }

    wal.remove_old_segments().unwrap();
    assert_eq!(wal.segment_count().unwrap(), 1);

    // Nothing replays after the cut.
    drop(wal);
    let (_, recovered) = Wal::open(tmp.path(), 1024 * 1024, SyncPolicy::OnRotate).unwrap();
    assert!(recovered.is_empty());
}

#[test]
fn appends_after_segment_removal_are_durable() {
    let tmp = TempDir::new().unwrap();
    {
        let (mut wal, _) = Wal::open(tmp.path(), 1024 * 1024, SyncPolicy::OnRotate).unwrap();
        wal.append(&record("old", "x", 1)).unwrap();
        wal.remove_old_segments().unwrap();
        wal.append(&record("new", "y", 2)).unwrap();
    }

    let (_, recovered) = Wal::open(tmp.path(), 1024 * 1024, SyncPolicy::OnRotate).unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].key, b"new");
}
