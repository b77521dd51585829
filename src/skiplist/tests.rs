use std::collections::BTreeMap;

use crate::record::Record;
use crate::skiplist::SkipList;

fn record(key: &str, value: &str, timestamp: u64) -> Record {
    Record::new(key.as_bytes().to_vec(), value.as_bytes().to_vec(), timestamp)
}

#[test]
fn insert_and_find() {
    let mut list = SkipList::with_rng_seed(12, 1);
    assert!(list.insert_or_update(record("b", "2", 1)));
    assert!(list.insert_or_update(record("a", "1", 2)));
    assert!(list.insert_or_update(record("c", "3", 3)));

    assert_eq!(list.len(), 3);
    assert_eq!(list.find(b"a").unwrap().value, b"1");
    assert_eq!(list.find(b"b").unwrap().value, b"2");
    assert_eq!(list.find(b"c").unwrap().value, b"3");
    assert!(list.find(b"d").is_none());
}

#[test]
fn update_overwrites_in_place() {
    let mut list = SkipList::with_rng_seed(12, 2);
    assert!(list.insert_or_update(record("k", "old", 1)));
    assert!(!list.insert_or_update(record("k", "new", 2)));

    assert_eq!(list.len(), 1);
    let found = list.find(b"k").unwrap();
    assert_eq!(found.value, b"new");
    assert_eq!(found.timestamp, 2);
}

#[test]
fn remove_unlinks_entry() {
    let mut list = SkipList::with_rng_seed(12, 3);
    for key in ["a", "b", "c", "d"] {
        list.insert_or_update(record(key, key, 1));
    }

    let removed = list.remove(b"b").unwrap();
    assert_eq!(removed.key, b"b");
    assert_eq!(list.len(), 3);
    assert!(list.find(b"b").is_none());
    assert!(list.remove(b"b").is_none());

    // The remaining chain stays ordered and intact.
    let keys: Vec<&[u8]> = list.iter().map(|r| r.key.as_slice()).collect();
    assert_eq!(keys, vec![b"a".as_slice(), b"c", b"d"]);
}

#[test]
fn iteration_is_key_ordered() {
    let mut list = SkipList::with_rng_seed(12, 4);
    for key in ["zebra", "apple", "mango", "banana", "cherry"] {
        list.insert_or_update(record(key, "v", 1));
    }

    let keys: Vec<Vec<u8>> = list.iter().map(|r| r.key.clone()).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}

#[test]
fn ordering_is_bytewise() {
    let mut list = SkipList::with_rng_seed(12, 5);
    list.insert_or_update(Record::new(vec![0x00, 0x01], b"a".to_vec(), 1));
    list.insert_or_update(Record::new(vec![0x00], b"b".to_vec(), 1));
    list.insert_or_update(Record::new(vec![0xFF], b"c".to_vec(), 1));

    let keys: Vec<Vec<u8>> = list.iter().map(|r| r.key.clone()).collect();
    assert_eq!(keys, vec![vec![0x00], vec![0x00, 0x01], vec![0xFF]]);
}

#[test]
fn tombstone_records_are_stored_like_any_update() {
    let mut list = SkipList::with_rng_seed(12, 6);
    list.insert_or_update(record("k", "v", 1));
    list.insert_or_update(Record::tombstone(b"k".to_vec(), 2));

    let found = list.find(b"k").unwrap();
    assert!(found.tombstone);
    assert!(found.value.is_empty());
    assert_eq!(list.len(), 1);
}

#[test]
fn clear_resets_to_empty() {
    let mut list = SkipList::with_rng_seed(12, 7);
    for i in 0..50u32 {
        list.insert_or_update(record(&format!("k{i:03}"), "v", 1));
    }
    list.clear();
    assert!(list.is_empty());
    assert!(list.find(b"k000").is_none());
    assert_eq!(list.iter().count(), 0);

    // Usable again after clearing.
    list.insert_or_update(record("fresh", "v", 9));
    assert_eq!(list.len(), 1);
}

#[test]
fn behaves_like_reference_map_under_random_ops() {
    let mut list = SkipList::with_rng_seed(8, 0xDECAF);
    let mut reference: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

    // Deterministic op mix driven by an LCG.
    let mut state = 12345u64;
    for step in 0..2000u64 {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let key = format!("key-{:03}", state % 200).into_bytes();
        match state % 4 {
            0 => {
                list.remove(&key);
                reference.remove(&key);
            }
            _ => {
                let value = format!("value-{step}").into_bytes();
                list.insert_or_update(Record::new(key.clone(), value.clone(), step));
                reference.insert(key, value);
            }
        }
    }

    assert_eq!(list.len(), reference.len());
    let list_pairs: Vec<(Vec<u8>, Vec<u8>)> =
        list.iter().map(|r| (r.key.clone(), r.value.clone())).collect();
    let reference_pairs: Vec<(Vec<u8>, Vec<u8>)> = reference.into_iter().collect();
    assert_eq!(list_pairs, reference_pairs);
}

#[test]
fn height_cap_of_one_degenerates_to_linked_list() {
    let mut list = SkipList::with_rng_seed(1, 8);
    for i in (0..100u32).rev() {
        list.insert_or_update(record(&format!("{i:03}"), "v", 1));
    }
    assert_eq!(list.len(), 100);
    let keys: Vec<Vec<u8>> = list.iter().map(|r| r.key.clone()).collect();
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
}
