//! Seeded bloom filter for SSTable point lookups.
//!
//! Each SSTable carries one filter built from its keys. A negative answer
//! is definitive (no false negatives); a positive answer may be wrong at
//! roughly the configured false-positive rate.
//!
//! Sizing follows the standard derivation: for `n` expected elements and
//! target rate `p`,
//!
//! ```text
//! m = ⌈n · |ln p| / (ln 2)²⌉        bits
//! k = ⌈(m / n) · ln 2⌉             hash functions
//! ```
//!
//! The `k` hash functions are instances of a 32-bit FNV-1a variant, each
//! perturbed by `seed + i`. The seed is drawn from the clock at build time
//! and **persisted with the filter**, so a reloaded filter reproduces the
//! exact bit positions of the one that was written.


use std::time::{SystemTime, UNIX_EPOCH};

use bit_vec::BitVec;

use crate::encoding::{Decode, Encode, EncodingError};

/// A bloom filter over byte-string keys.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    /// Bit array of size `m`.
    bits: BitVec,

    /// Number of bits.
    m: u64,

    /// Number of hash functions.
    k: u32,

    /// Hash seed, persisted so reload reproduces membership.
    seed: u64,
}

impl BloomFilter {
    /// Creates a filter sized for `expected_items` at the given target
    /// false-positive rate, with a clock-derived seed.
    pub fn new(expected_items: usize, fp_rate: f64) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E37_79B9_7F4A_7C15);
        Self::with_seed(expected_items, fp_rate, seed)
    }

    /// Creates a filter with an explicit seed.
    pub fn with_seed(expected_items: usize, fp_rate: f64, seed: u64) -> Self {
        let n = expected_items.max(1);
        let m = Self::optimal_bits(n, fp_rate);
        let k = Self::optimal_hashes(n, m);
        Self {
            bits: BitVec::from_elem(m as usize, false),
            m,
            k,
            seed,
        }
    }

    /// `m = ⌈n · |ln p| / (ln 2)²⌉`, floored at 8 bits.
    fn optimal_bits(n: usize, p: f64) -> u64 {
        let bits = (n as f64 * p.ln().abs() / std::f64::consts::LN_2.powi(2)).ceil();
        (bits as u64).max(8)
    }

    /// `k = ⌈(m / n) · ln 2⌉`, floored at 1.
    fn optimal_hashes(n: usize, m: u64) -> u32 {
        let k = ((m as f64 / n as f64) * std::f64::consts::LN_2).ceil();
        (k as u32).max(1)
    }

    /// Sets the `k` bits for `key`.
    pub fn insert(&mut self, key: &[u8]) {
        for i in 0..self.k {
            let idx = self.bit_index(key, i);
            self.bits.set(idx, true);
        }
    }

    /// Returns `false` iff any of the `k` bits for `key` is unset — i.e.
    /// `false` means "definitely absent", `true` means "maybe present".
    pub fn may_contain(&self, key: &[u8]) -> bool {
        (0..self.k).all(|i| self.bits.get(self.bit_index(key, i)).unwrap_or(false))
    }

    fn bit_index(&self, key: &[u8], i: u32) -> usize {
        let hash = seeded_fnv1a32((self.seed as u32).wrapping_add(i), key);
        (u64::from(hash) % self.m) as usize
    }

    /// Number of bits in the filter.
    pub fn num_bits(&self) -> u64 {
        self.m
    }

    /// Number of hash functions.
    pub fn num_hashes(&self) -> u32 {
        self.k
    }

    /// The persisted hash seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

// ------------------------------------------------------------------------------------------------
// Serialization: [seed u64][m u64][k u32][bits Vec<u8>]
// ------------------------------------------------------------------------------------------------

impl Encode for BloomFilter {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.seed.encode_to(buf)?;
        self.m.encode_to(buf)?;
        self.k.encode_to(buf)?;
        self.bits.to_bytes().encode_to(buf)?;
        Ok(())
    }
}

impl Decode for BloomFilter {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (seed, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (m, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (k, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (bytes, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;

        if m == 0 || k == 0 || bytes.len() as u64 * 8 < m {
            return Err(EncodingError::LengthOverflow(format!(
                "bloom filter dimensions inconsistent (m={m}, k={k}, {} bit bytes)",
                bytes.len()
            )));
        }

        let mut bits = BitVec::from_bytes(&bytes);
        bits.truncate(m as usize);

        Ok((Self { bits, m, k, seed }, off))
    }
}

// ------------------------------------------------------------------------------------------------
// Seeded 32-bit FNV-1a — shared with the sketch module
// ------------------------------------------------------------------------------------------------

const FNV32_OFFSET: u32 = 0x811C_9DC5;
const FNV32_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a with the seed folded into the offset basis.
pub(crate) fn seeded_fnv1a32(seed: u32, data: &[u8]) -> u32 {
    let mut hash = FNV32_OFFSET ^ seed.wrapping_mul(0x9E37_79B9);
    for &byte in data {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV32_PRIME);
    }
    hash
}

/// 64-bit hash assembled from two independent 32-bit FNV-1a passes.
///
/// Used by the sketch module, which needs more than 32 bits of spread.
pub(crate) fn seeded_fnv1a64(seed: u64, data: &[u8]) -> u64 {
    let low = seeded_fnv1a32(seed as u32, data);
    let high = seeded_fnv1a32((seed >> 32) as u32 ^ 0xA5A5_A5A5, data);
    (u64::from(high) << 32) | u64::from(low)
}
