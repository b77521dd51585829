//! # StratumDB
//!
//! An embeddable, persistent key-value storage engine built on a **leveled
//! Log-Structured Merge tree (LSM-tree)**. Designed for fast writes, cheap
//! point reads, and crash-safe operation.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                      Engine                            │
//! │  ┌────────────┐   ┌───────────┐   ┌────────────────┐   │
//! │  │ Memtable   │   │  Read     │   │  SSTables      │   │
//! │  │ (skip list)│   │  cache    │   │  L0 … Lmax     │   │
//! │  │ + WAL      │   │  (LRU)    │   │  (on disk)     │   │
//! │  └─────┬──────┘   └───────────┘   └───────┬────────┘   │
//! │        │  flush                           │            │
//! │        └──────────► L0 ─── compaction ────┘            │
//! │                                                        │
//! │  ┌──────────────────────────────────────────────────┐  │
//! │  │        Manifest (write-new-then-rename)          │  │
//! │  └──────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Facade — open, put, get, delete, edit, flush, compact |
//! | [`memtable`] | Skip-list-backed in-memory write buffer |
//! | [`skiplist`] | Probabilistic ordered map used by the memtable |
//! | [`wal`] | Segmented, CRC-protected write-ahead log |
//! | [`sstable`] | Immutable, sorted on-disk tables with bloom filter and summary |
//! | [`bloom`] | Seeded bloom filter serialized alongside each table |
//! | [`lsm`] | Level bookkeeping, compaction triggers, k-way merge |
//! | [`manifest`] | Durable record of which tables live at which levels |
//! | [`cache`] | LRU hot-key accelerator |
//! | [`ratelimit`] | Token-bucket admission control |
//! | [`sketch`] | HyperLogLog / Count-Min blobs behind reserved key prefixes |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation is persisted to a WAL segment
//!   before being acknowledged; recovery replays segments in order and
//!   truncates corrupt tails.
//! - **Leveled compaction** — each flush produces one L0 table; overflowing
//!   levels merge downward, keeping levels ≥ 1 disjoint by key range.
//! - **Tombstone semantics** — deletes shadow older versions until a merge
//!   into the bottom level drops them for good.
//! - **Bloom filter lookups** — each SSTable carries a seeded bloom filter
//!   that reproduces its membership after reload.
//! - **Record-level CRC32 integrity** — every persisted record carries a
//!   checksum over its value bytes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stratumdb::{Engine, EngineConfig};
//!
//! let engine = Engine::open("/tmp/my_db", EngineConfig::default()).unwrap();
//!
//! engine.put("hello", b"world").unwrap();
//! assert_eq!(engine.get("hello").unwrap(), Some(b"world".to_vec()));
//!
//! engine.delete("hello").unwrap();
//! assert_eq!(engine.get("hello").unwrap(), None);
//!
//! engine.close().unwrap();
//! ```

pub mod bloom;
pub mod cache;
pub mod config;
pub mod encoding;
pub mod engine;
pub mod lsm;
pub mod manifest;
pub mod memtable;
pub mod ratelimit;
pub mod record;
pub mod sketch;
pub mod skiplist;
pub mod sstable;
pub mod wal;

pub use config::{ConfigError, EngineConfig, SyncPolicy};
pub use engine::{Engine, EngineError, EngineStats};
pub use record::Record;
