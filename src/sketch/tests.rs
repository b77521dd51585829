use crate::encoding::{decode_from_slice, encode_to_vec};
use crate::sketch::{CountMinSketch, HyperLogLog};

#[test]
fn hll_estimates_distinct_count_within_tolerance() {
    let mut hll = HyperLogLog::with_seed(12, 42);
    let n = 10_000usize;
    for i in 0..n {
        hll.add(format!("user-{i}").as_bytes());
    }

    let estimate = hll.estimate();
    let error = (estimate - n as f64).abs() / n as f64;
    // 2^12 registers → ~1.6% standard error; allow a wide margin.
    assert!(error < 0.10, "estimate {estimate} off by {error}");
}

#[test]
fn hll_ignores_duplicates() {
    let mut hll = HyperLogLog::with_seed(12, 7);
    for _ in 0..1000 {
        hll.add(b"same-item");
    }
    let estimate = hll.estimate();
    assert!(estimate >= 0.5 && estimate < 3.0, "estimate {estimate}");
}

#[test]
fn hll_round_trip_preserves_estimate() {
    let mut hll = HyperLogLog::with_seed(10, 1234);
    for i in 0..5000 {
        hll.add(format!("item-{i}").as_bytes());
    }

    let bytes = encode_to_vec(&hll).unwrap();
    let (reloaded, consumed) = decode_from_slice::<HyperLogLog>(&bytes).unwrap();
    assert_eq!(consumed, bytes.len());
    assert_eq!(reloaded.estimate(), hll.estimate());
    assert_eq!(reloaded.register_count(), 1 << 10);
}

#[test]
fn hll_reload_continues_with_same_seed() {
    let mut hll = HyperLogLog::with_seed(10, 99);
    for i in 0..1000 {
        hll.add(format!("a-{i}").as_bytes());
    }

    let bytes = encode_to_vec(&hll).unwrap();
    let (mut reloaded, _) = decode_from_slice::<HyperLogLog>(&bytes).unwrap();

    // Adding the same items again must not move the estimate: with the
    // persisted seed, every item lands in the same register.
    let before = reloaded.estimate();
    for i in 0..1000 {
        reloaded.add(format!("a-{i}").as_bytes());
    }
    assert_eq!(reloaded.estimate(), before);
}

#[test]
fn hll_malformed_blob_is_rejected() {
    let hll = HyperLogLog::with_seed(8, 1);
    let mut bytes = encode_to_vec(&hll).unwrap();
    bytes[0] = 3; // precision below the valid range
    assert!(decode_from_slice::<HyperLogLog>(&bytes).is_err());
}

#[test]
fn cms_never_undercounts() {
    let mut cms = CountMinSketch::with_seed(0.01, 0.01, 5);
    for i in 0..200u32 {
        let key = format!("key-{}", i % 20);
        cms.add(key.as_bytes());
    }

    // Every key was added exactly 10 times.
    for i in 0..20u32 {
        let count = cms.count(format!("key-{i}").as_bytes());
        assert!(count >= 10, "undercounted: {count}");
    }
}

#[test]
fn cms_unseen_items_count_near_zero() {
    let mut cms = CountMinSketch::with_seed(0.001, 0.01, 6);
    for i in 0..100u32 {
        cms.add(format!("present-{i}").as_bytes());
    }
    // With width ≈ 2719 and 100 insertions, collisions are unlikely.
    let ghost = cms.count(b"never-added");
    assert!(ghost <= 1, "ghost count {ghost}");
}

#[test]
fn cms_round_trip_preserves_counts() {
    let mut cms = CountMinSketch::with_seed(0.01, 0.05, 77);
    for i in 0..500u32 {
        cms.add(format!("k-{}", i % 50).as_bytes());
    }

    let bytes = encode_to_vec(&cms).unwrap();
    let (reloaded, consumed) = decode_from_slice::<CountMinSketch>(&bytes).unwrap();
    assert_eq!(consumed, bytes.len());
    assert_eq!(reloaded.width(), cms.width());
    assert_eq!(reloaded.depth(), cms.depth());

    for i in 0..50u32 {
        let key = format!("k-{i}");
        assert_eq!(reloaded.count(key.as_bytes()), cms.count(key.as_bytes()));
    }
}

#[test]
fn cms_dimensions_follow_formulas() {
    // w = ⌈e / 0.01⌉ = 272, d = ⌈ln(1 / 0.01)⌉ = 5.
    let cms = CountMinSketch::with_seed(0.01, 0.01, 1);
    assert_eq!(cms.width(), 272);
    assert_eq!(cms.depth(), 5);
}
