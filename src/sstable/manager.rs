//! Lane dispatch over the parallel L0 logs.
//!
//! The manager owns one [`L0Log`] per lane, each over a disjoint zone
//! range, and routes table operations by the location tag on the meta.
//! Deletions are distributed per lane by log number so each lane's tail
//! reclamation sees only its own victims, in on-log order.

use crate::config::StoreConfig;
use crate::device::{DeviceInfo, MemZoneLog, ZoneLog};
use crate::error::Result;
use crate::l0::L0Log;
use crate::memtable::Memtable;
use crate::Error;

use super::{Diagnostics, EntryStatus, SsTable, TableIterator, TableMeta};

/// Minimum zones each lane's circular log needs to function.
pub const MIN_LANE_ZONES: u64 = 5;

/// Routes SSTable operations across the parallel L0 lanes.
pub struct TableManager<L: ZoneLog> {
    lanes: Vec<L0Log<L>>,
}

impl TableManager<MemZoneLog> {
    /// Builds a manager over an in-memory device, dividing the zones of
    /// `[min_zone, max_zone)` evenly across the configured lanes. The last
    /// lane absorbs the division remainder.
    pub fn memory(
        info: DeviceInfo,
        min_zone: u64,
        max_zone: u64,
        config: &StoreConfig,
    ) -> Result<Self> {
        let lane_count = config.l0_lanes as u64;
        let num_zones = max_zone.saturating_sub(min_zone);
        if lane_count == 0 || min_zone > max_zone || num_zones < lane_count * MIN_LANE_ZONES {
            tracing::error!(
                num_zones,
                lane_count,
                "table manager: not enough zones assigned"
            );
            return Err(Error::InvalidArgument(format!(
                "{num_zones} zones cannot host {lane_count} lanes of at least {MIN_LANE_ZONES}"
            )));
        }

        let zone_step = num_zones / lane_count;
        let mut zone_head = min_zone;
        let mut lanes = Vec::with_capacity(config.l0_lanes as usize);
        for lane in 0..config.l0_lanes {
            let end = if lane == config.l0_lanes - 1 {
                max_zone
            } else {
                zone_head + zone_step
            };
            let log = MemZoneLog::new(info, zone_head, end)?;
            lanes.push(L0Log::new(log, lane, config));
            zone_head = end;
        }
        if zone_head != max_zone {
            return Err(Error::InvalidArgument(format!(
                "zone division error: {zone_head} != {max_zone}"
            )));
        }
        Ok(Self { lanes })
    }
}

impl<L: ZoneLog> TableManager<L> {
    /// Builds a manager from pre-constructed lanes, e.g. over a real device.
    pub fn new(lanes: Vec<L0Log<L>>) -> Result<Self> {
        if lanes.is_empty() {
            return Err(Error::InvalidArgument("no lanes given".to_string()));
        }
        Ok(Self { lanes })
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn lane(&self, lane: u8) -> Result<&L0Log<L>> {
        self.lanes
            .get(lane as usize)
            .ok_or_else(|| Error::InvalidArgument(format!("lane {lane} out of range")))
    }

    fn lane_for(&self, meta: &TableMeta) -> Result<&L0Log<L>> {
        self.lane(meta.log_number()?)
    }

    /// Flushes a memtable into one lane's circular log.
    pub fn flush_memtable(
        &self,
        mem: &Memtable,
        metas: &mut Vec<TableMeta>,
        lane: u8,
    ) -> Result<()> {
        self.lane(lane)?.flush_memtable(mem, metas)
    }

    pub fn read_table(&self, meta: &TableMeta) -> Result<Vec<u8>> {
        self.lane_for(meta)?.read_table(meta)
    }

    pub fn new_iterator(&self, meta: &TableMeta) -> Result<TableIterator> {
        self.lane_for(meta)?.new_iterator(meta)
    }

    pub fn get(
        &self,
        user_key: &[u8],
        meta: &TableMeta,
    ) -> Result<(EntryStatus, Option<Vec<u8>>)> {
        self.lane_for(meta)?.get(user_key, meta)
    }

    /// Tries to reclaim the given L0 victims, distributing them to their
    /// lanes. Victims that cannot be reclaimed yet are pushed to
    /// `remaining`.
    pub fn delete_l0_tables(
        &self,
        victims: &[TableMeta],
        remaining: &mut Vec<TableMeta>,
    ) -> Result<()> {
        // Nothing to distribute on a single lane.
        if self.lanes.len() == 1 {
            let result = self.lanes[0].try_invalidate(victims, remaining);
            if result.is_err() {
                tracing::error!("table manager: resetting tables of the L0-0 log failed");
            }
            return result;
        }
        for (lane, log) in self.lanes.iter().enumerate() {
            let mut lane_victims = Vec::new();
            for meta in victims {
                if meta.log_number()? as usize == lane {
                    lane_victims.push(meta.clone());
                }
            }
            if lane_victims.is_empty() {
                continue;
            }
            if let Err(e) = log.try_invalidate(&lane_victims, remaining) {
                tracing::error!(lane, "table manager: resetting tables of an L0 log failed");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Recovers every lane's device pointers.
    pub fn recover(&self) -> Result<()> {
        for (lane, log) in self.lanes.iter().enumerate() {
            if let Err(e) = log.recover() {
                tracing::error!(lane, "table manager: cannot recover an L0 log");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Whether every lane can absorb `size` more bytes.
    pub fn enough_space(&self, size: u64) -> bool {
        self.lanes.iter().all(|lane| lane.enough_space(size))
    }

    /// Free bytes remaining in one lane.
    pub fn space_remaining(&self, lane: u8) -> Result<u64> {
        Ok(self.lane(lane)?.space_available())
    }

    /// Used fraction of one lane's block range.
    pub fn fraction_filled(&self, lane: u8) -> Result<f64> {
        let lane = self.lane(lane)?;
        let info = *lane.log().info();
        let total = lane.log().max_lba() - lane.log().min_lba();
        let available = lane.space_available() / info.lba_size;
        Ok((total - available) as f64 / total as f64)
    }

    /// Total bytes occupied by the given tables.
    pub fn bytes_in_level(&self, metas: &[TableMeta]) -> u64 {
        let lba_size = self.lanes[0].log().info().lba_size;
        metas.iter().map(|m| m.lba_count * lba_size).sum()
    }

    /// Binary search for the first table whose largest user key is not
    /// below `user_key`. `metas` must be sorted by key range.
    pub fn find_table_index(metas: &[TableMeta], user_key: &[u8]) -> usize {
        let mut left = 0usize;
        let mut right = metas.len();
        while left < right {
            let mid = (left + right) / 2;
            if metas[mid].largest.user_key() < user_key {
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        right
    }

    pub fn diagnostics(&self) -> Vec<Diagnostics> {
        self.lanes.iter().map(|lane| lane.diagnostics()).collect()
    }
}
