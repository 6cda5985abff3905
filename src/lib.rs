//! Storage core of a log-structured, persistent key-value engine backed by
//! a zoned block device.
//!
//! Zoned devices are written strictly sequentially per zone and reclaimed
//! in whole-zone resets. The core organizes them as circular sequential
//! logs and provides:
//!
//! - [`commit`]: a fragmenting, CRC-protected, block-aligned record codec
//!   for appending variable-length payloads and reading them back under
//!   concurrent readers,
//! - [`l0`]: the L0 SSTable log manager staging flushed memtables, with a
//!   bounded reader pool, an optional deferred-flush worker and whole-zone
//!   tail reclamation,
//! - [`sstable`]: table metadata, builders, iterators and lane dispatch,
//! - [`manifest`]: the version edit codec for manifest deltas,
//! - [`device`]: the zone log collaborator trait plus an in-memory device.
//!
//! The memtable, write-ahead log, manifest log placement and everything
//! above L0 are external collaborators consumed through these interfaces.

pub mod commit;
pub mod config;
pub mod device;
pub mod encoding;
pub mod error;
pub mod keys;
pub mod l0;
pub mod manifest;
pub mod memtable;
pub mod sstable;

pub use config::StoreConfig;
pub use device::{DeviceInfo, MemZoneLog, ZoneLog};
pub use error::Error;
pub use l0::L0Log;
pub use memtable::Memtable;
pub use sstable::TableManager;
