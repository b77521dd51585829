//! Probabilistic sketches stored as values behind reserved key prefixes.
//!
//! The engine itself treats `hll-*` and `cms-*` keys as ordinary
//! byte-valued records; only the user-facing decoder
//! ([`Engine::get_as_string`](crate::engine::Engine::get_as_string))
//! interprets the blobs. Both sketches persist their hash seed inside the
//! serialized form, so an estimate computed after reload matches the one
//! computed before.

#[cfg(test)]
mod tests;

use std::time::{SystemTime, UNIX_EPOCH};

use crate::bloom::seeded_fnv1a64;
use crate::encoding::{Decode, Encode, EncodingError};

/// Key prefix marking serialized [`HyperLogLog`] values.
pub const HLL_PREFIX: &str = "hll-";

/// Key prefix marking serialized [`CountMinSketch`] values.
pub const CMS_PREFIX: &str = "cms-";

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x517C_C1B7_2722_0A95)
}

// ------------------------------------------------------------------------------------------------
// HyperLogLog
// ------------------------------------------------------------------------------------------------

/// HyperLogLog cardinality estimator.
///
/// Uses `m = 2^precision` one-byte registers; relative error is roughly
/// `1.04 / √m`.
#[derive(Debug, Clone)]
pub struct HyperLogLog {
    precision: u8,
    seed: u64,
    registers: Vec<u8>,
}

impl HyperLogLog {
    /// Creates an estimator with `2^precision` registers (`precision`
    /// clamped to `4..=16`) and a clock-derived seed.
    pub fn new(precision: u8) -> Self {
        Self::with_seed(precision, clock_seed())
    }

    /// Creates an estimator with an explicit seed.
    pub fn with_seed(precision: u8, seed: u64) -> Self {
        let precision = precision.clamp(4, 16);
        Self {
            precision,
            seed,
            registers: vec![0u8; 1 << precision],
        }
    }

    /// Observes one item.
    pub fn add(&mut self, item: &[u8]) {
        let hash = seeded_fnv1a64(self.seed, item);
        let index = (hash >> (64 - self.precision)) as usize;
        let remainder = hash << self.precision;
        // Rank: position of the leftmost 1-bit in the remaining bits.
        let rank = (remainder.leading_zeros() + 1).min(64 - u32::from(self.precision)) as u8;
        if rank > self.registers[index] {
            self.registers[index] = rank;
        }
    }

    /// Estimated number of distinct items observed.
    pub fn estimate(&self) -> f64 {
        let m = self.registers.len() as f64;
        let alpha = match self.registers.len() {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m),
        };

        let sum: f64 = self
            .registers
            .iter()
            .map(|&r| 2f64.powi(-i32::from(r)))
            .sum();
        let raw = alpha * m * m / sum;

        // Small-range correction: fall back to linear counting while
        // empty registers remain.
        let zeros = self.registers.iter().filter(|&&r| r == 0).count();
        if raw <= 2.5 * m && zeros > 0 {
            m * (m / zeros as f64).ln()
        } else {
            raw
        }
    }

    /// Number of registers.
    pub fn register_count(&self) -> usize {
        self.registers.len()
    }
}

impl Encode for HyperLogLog {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.precision.encode_to(buf)?;
        self.seed.encode_to(buf)?;
        self.registers.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for HyperLogLog {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (precision, n) = u8::decode_from(&buf[off..])?;
        off += n;
        let (seed, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (registers, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;

        if !(4..=16).contains(&precision) || registers.len() != 1usize << precision {
            return Err(EncodingError::LengthOverflow(format!(
                "HLL register count {} does not match precision {precision}",
                registers.len()
            )));
        }

        Ok((
            Self {
                precision,
                seed,
                registers,
            },
            off,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Count-Min sketch
// ------------------------------------------------------------------------------------------------

/// Count-Min frequency sketch.
///
/// Width derives from the additive error bound `epsilon` and depth from
/// the failure probability `delta`: `w = ⌈e / ε⌉`, `d = ⌈ln(1 / δ)⌉`.
/// Estimates never undercount.
#[derive(Debug, Clone)]
pub struct CountMinSketch {
    width: u32,
    depth: u32,
    seed: u64,
    counters: Vec<u64>,
}

impl CountMinSketch {
    /// Creates a sketch for the given error bound and failure
    /// probability, with a clock-derived seed.
    pub fn new(epsilon: f64, delta: f64) -> Self {
        Self::with_seed(epsilon, delta, clock_seed())
    }

    /// Creates a sketch with an explicit seed.
    pub fn with_seed(epsilon: f64, delta: f64, seed: u64) -> Self {
        let epsilon = epsilon.clamp(1e-6, 1.0);
        let delta = delta.clamp(1e-9, 0.5);
        let width = (std::f64::consts::E / epsilon).ceil() as u32;
        let depth = ((1.0 / delta).ln().ceil() as u32).max(1);
        Self {
            width,
            depth,
            seed,
            counters: vec![0u64; width as usize * depth as usize],
        }
    }

    /// Records one occurrence of `item`.
    pub fn add(&mut self, item: &[u8]) {
        for row in 0..self.depth {
            let idx = self.cell(row, item);
            self.counters[idx] = self.counters[idx].saturating_add(1);
        }
    }

    /// Estimated occurrence count — the minimum across rows.
    pub fn count(&self, item: &[u8]) -> u64 {
        (0..self.depth)
            .map(|row| self.counters[self.cell(row, item)])
            .min()
            .unwrap_or(0)
    }

    fn cell(&self, row: u32, item: &[u8]) -> usize {
        let hash = seeded_fnv1a64(self.seed.wrapping_add(u64::from(row)), item);
        row as usize * self.width as usize + (hash % u64::from(self.width)) as usize
    }

    /// Sketch width (columns per row).
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Sketch depth (number of rows).
    pub fn depth(&self) -> u32 {
        self.depth
    }
}

impl Encode for CountMinSketch {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.width.encode_to(buf)?;
        self.depth.encode_to(buf)?;
        self.seed.encode_to(buf)?;
        (self.counters.len() as u32).encode_to(buf)?;
        for counter in &self.counters {
            counter.encode_to(buf)?;
        }
        Ok(())
    }
}

impl Decode for CountMinSketch {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (width, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (depth, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (seed, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (count, n) = u32::decode_from(&buf[off..])?;
        off += n;

        if width == 0 || depth == 0 || u64::from(count) != u64::from(width) * u64::from(depth) {
            return Err(EncodingError::LengthOverflow(format!(
                "CMS counter count {count} does not match {width}x{depth}"
            )));
        }

        let mut counters = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (value, n) = u64::decode_from(&buf[off..])?;
            off += n;
            counters.push(value);
        }

        Ok((
            Self {
                width,
                depth,
                seed,
                counters,
            },
            off,
        ))
    }
}
