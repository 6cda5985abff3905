//! SSTable zone metadata.
//!
//! A [`TableMeta`] records one table's identity, key range and physical
//! placement. L0 tables always occupy a single contiguous LBA run inside
//! one lane's circular log; LN tables may be fragmented across up to
//! [`MAX_LN_REGIONS`] zone regions.

use crate::error::Result;
use crate::keys::InternalKey;
use crate::Error;

/// Maximum `(lba, size)` region pairs an LN table may span.
pub const MAX_LN_REGIONS: usize = 8;

/// Physical placement of a table, tagged by level class.
#[derive(Debug, Clone, PartialEq)]
pub enum TableLocation {
    /// Single contiguous run in one of the parallel L0 logs.
    L0 { lba: u64, log_number: u8 },
    /// Up to [`MAX_LN_REGIONS`] `(lba, size)` region tuples.
    LN { regions: Vec<(u64, u64)> },
}

/// Metadata describing one SSTable.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMeta {
    /// Monotonically assigned table number.
    pub number: u64,
    /// Physical placement.
    pub location: TableLocation,
    /// Entry count of the table.
    pub entries: u64,
    /// Total LBAs occupied.
    pub lba_count: u64,
    /// Smallest internal key in the table.
    pub smallest: InternalKey,
    /// Largest internal key in the table.
    pub largest: InternalKey,
}

impl Default for TableMeta {
    fn default() -> Self {
        Self {
            number: 0,
            location: TableLocation::L0 {
                lba: 0,
                log_number: 0,
            },
            entries: 0,
            lba_count: 0,
            smallest: InternalKey::default(),
            largest: InternalKey::default(),
        }
    }
}

impl TableMeta {
    /// The L0 run's starting LBA; corrupt if this is an LN table.
    pub fn l0_lba(&self) -> Result<u64> {
        match &self.location {
            TableLocation::L0 { lba, .. } => Ok(*lba),
            TableLocation::LN { .. } => Err(Error::Corruption(format!(
                "table {} is not an L0 table",
                self.number
            ))),
        }
    }

    /// The L0 lane this table was written to; corrupt if an LN table.
    pub fn log_number(&self) -> Result<u8> {
        match &self.location {
            TableLocation::L0 { log_number, .. } => Ok(*log_number),
            TableLocation::LN { .. } => Err(Error::Corruption(format!(
                "table {} is not an L0 table",
                self.number
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::ValueKind;

    #[test]
    fn test_default_is_l0() {
        let meta = TableMeta::default();
        assert_eq!(meta.l0_lba().unwrap(), 0);
        assert_eq!(meta.log_number().unwrap(), 0);
    }

    #[test]
    fn test_ln_location_rejected_for_l0_accessors() {
        let meta = TableMeta {
            location: TableLocation::LN {
                regions: vec![(64, 32), (256, 16)],
            },
            ..TableMeta::default()
        };
        assert!(matches!(meta.l0_lba(), Err(Error::Corruption(_))));
        assert!(matches!(meta.log_number(), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_key_range_fields() {
        let meta = TableMeta {
            smallest: InternalKey::new(b"aaa", 1, ValueKind::Value),
            largest: InternalKey::new(b"zzz", 9, ValueKind::Value),
            ..TableMeta::default()
        };
        assert_eq!(meta.smallest.user_key(), b"aaa");
        assert_eq!(meta.largest.user_key(), b"zzz");
    }
}
