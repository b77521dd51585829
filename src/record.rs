//! The durable record — the single unit of data shared by the WAL,
//! the memtable, and SSTable data regions.
//!
//! # On-disk layout
//!
//! Every persisted record uses one fixed, little-endian layout:
//!
//! ```text
//! [crc32:4][timestamp:8][tombstone:1][key_len:8][value_len:8][key][value]
//! ```
//!
//! - `crc32` — CRC32 (IEEE) computed over the **value bytes only**.
//! - `timestamp` — nanoseconds since UNIX epoch, assigned at WAL time.
//! - `tombstone` — `0x00` or `0x01`. Tombstones carry a zero-length value.
//! - `key_len` / `value_len` — byte lengths of the trailing payloads.
//!
//! This layout is deliberately *not* routed through [`crate::encoding`]:
//! it is the engine's wire format and must stay byte-stable on its own.
//!
//! # Corruption handling
//!
//! [`Record::decode`] only fails on truncation or absurd length fields; it
//! reports checksum validity separately so that callers can choose their
//! policy. SSTable readers discard the one bad record and continue; WAL
//! recovery stops replaying the segment and truncates its tail.

use crc32fast::Hasher as Crc32;
use thiserror::Error;

/// Fixed header size preceding the key and value payloads.
pub const RECORD_HEADER_SIZE: usize = 4 + 8 + 1 + 8 + 8;

/// Upper bound on a single key or value accepted during decoding
/// (256 MiB). Length fields above this are treated as corruption.
pub const MAX_PAYLOAD_LEN: u64 = 256 * 1024 * 1024;

/// Errors produced while decoding a persisted record.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The buffer ended before the full record was read.
    #[error("truncated record (need {needed} bytes, have {available})")]
    Truncated {
        /// Bytes required to finish decoding.
        needed: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// A length field exceeded [`MAX_PAYLOAD_LEN`] or the tombstone byte
    /// was neither `0x00` nor `0x01`.
    #[error("malformed record: {0}")]
    Malformed(String),

    /// The stored CRC32 did not match the value bytes.
    #[error("record checksum mismatch")]
    ChecksumMismatch,
}

/// A single logical write: key, value, write instant, and tombstone flag.
///
/// Keys are UTF-8 strings at the engine API; below the facade they are
/// opaque byte sequences ordered lexicographically. Physical layers may
/// hold several records for one key — the newest timestamp wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Key bytes.
    pub key: Vec<u8>,

    /// Value bytes. Always empty when `tombstone` is set.
    pub value: Vec<u8>,

    /// Write instant in nanoseconds since UNIX epoch.
    pub timestamp: u64,

    /// Whether this record deletes the key.
    pub tombstone: bool,
}

/// Outcome of [`Record::decode`]: the record, the bytes consumed, and
/// whether the stored checksum matched the value bytes.
#[derive(Debug)]
pub struct DecodedRecord {
    /// The decoded record.
    pub record: Record,

    /// Total encoded length, including header and payloads.
    pub consumed: usize,

    /// `true` iff the stored CRC32 matched the value bytes.
    pub checksum_ok: bool,
}

impl Record {
    /// Creates a live record.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, timestamp: u64) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            timestamp,
            tombstone: false,
        }
    }

    /// Creates a tombstone for `key`. Tombstones carry an empty value.
    pub fn tombstone(key: impl Into<Vec<u8>>, timestamp: u64) -> Self {
        Self {
            key: key.into(),
            value: Vec::new(),
            timestamp,
            tombstone: true,
        }
    }

    /// CRC32 over the value bytes.
    pub fn checksum(&self) -> u32 {
        let mut hasher = Crc32::new();
        hasher.update(&self.value);
        hasher.finalize()
    }

    /// Total encoded size of this record in bytes.
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.key.len() + self.value.len()
    }

    /// Appends the encoded record to `buf`.
    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.reserve(self.encoded_len());
        buf.extend_from_slice(&self.checksum().to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.push(u8::from(self.tombstone));
        buf.extend_from_slice(&(self.key.len() as u64).to_le_bytes());
        buf.extend_from_slice(&(self.value.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
    }

    /// Encodes the record into a freshly-allocated buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_to(&mut buf);
        buf
    }

    /// Decodes one record from the start of `buf` without enforcing the
    /// checksum. Truncation and malformed length fields still fail.
    pub fn decode(buf: &[u8]) -> Result<DecodedRecord, RecordError> {
        if buf.len() < RECORD_HEADER_SIZE {
            return Err(RecordError::Truncated {
                needed: RECORD_HEADER_SIZE,
                available: buf.len(),
            });
        }

        let mut u32_bytes = [0u8; 4];
        let mut u64_bytes = [0u8; 8];

        u32_bytes.copy_from_slice(&buf[0..4]);
        let stored_crc = u32::from_le_bytes(u32_bytes);

        u64_bytes.copy_from_slice(&buf[4..12]);
        let timestamp = u64::from_le_bytes(u64_bytes);

        let tombstone = match buf[12] {
            0x00 => false,
            0x01 => true,
            other => {
                return Err(RecordError::Malformed(format!(
                    "tombstone byte 0x{other:02X}"
                )));
            }
        };

        u64_bytes.copy_from_slice(&buf[13..21]);
        let key_len = u64::from_le_bytes(u64_bytes);

        u64_bytes.copy_from_slice(&buf[21..29]);
        let value_len = u64::from_le_bytes(u64_bytes);

        if key_len > MAX_PAYLOAD_LEN || value_len > MAX_PAYLOAD_LEN {
            return Err(RecordError::Malformed(format!(
                "length fields out of range (key {key_len}, value {value_len})"
            )));
        }

        let key_len = key_len as usize;
        let value_len = value_len as usize;
        let total = RECORD_HEADER_SIZE + key_len + value_len;

        if buf.len() < total {
            return Err(RecordError::Truncated {
                needed: total,
                available: buf.len(),
            });
        }

        let key = buf[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + key_len].to_vec();
        let value = buf[RECORD_HEADER_SIZE + key_len..total].to_vec();

        let record = Record {
            key,
            value,
            timestamp,
            tombstone,
        };
        let checksum_ok = record.checksum() == stored_crc;

        Ok(DecodedRecord {
            record,
            consumed: total,
            checksum_ok,
        })
    }

    /// Decodes one record and enforces the checksum.
    ///
    /// Returns `(record, bytes_consumed)`. Used by WAL replay, where a
    /// mismatch ends the segment.
    pub fn decode_verified(buf: &[u8]) -> Result<(Record, usize), RecordError> {
        let decoded = Self::decode(buf)?;
        if !decoded.checksum_ok {
            return Err(RecordError::ChecksumMismatch);
        }
        Ok((decoded.record, decoded.consumed))
    }
}
