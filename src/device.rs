//! Zone device abstraction.
//!
//! A zoned block device is partitioned into fixed-size zones that are
//! written strictly sequentially from a write pointer and reclaimed by
//! resetting whole zones. The storage core consumes it through the
//! [`ZoneLog`] trait: a circular sequential log over a contiguous range of
//! zones with an append head and a reclaim tail.
//!
//! ```text
//!        min_lba                                      max_lba
//!        |  zone 0   |  zone 1   |  zone 2   |  zone 3   |
//!        +-----------+-----------+-----------+-----------+
//!   .....|###########|######.....|...........|###########|.....
//!                           ^                 ^
//!                       write_head        write_tail
//! ```
//!
//! Addresses are absolute LBAs in `[min_lba, max_lba)`; arithmetic that
//! crosses `max_lba` wraps back to `min_lba` via [`ZoneLog::wrapped_addr`].
//!
//! [`MemZoneLog`] implements the trait over an in-memory arena. It backs
//! the unit tests and doubles as a simulation backend; a driver for a real
//! NVMe ZNS device would implement the same trait.

use std::sync::Mutex;

use crate::error::Result;
use crate::Error;

/// Immutable device geometry, fixed at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Bytes per logical block address, a power of two.
    pub lba_size: u64,
    /// Usable LBAs per zone.
    pub zone_cap: u64,
    /// Maximum bytes per single append command.
    pub zasl: u64,
    /// Maximum data transfer size for one IO.
    pub mdts: u64,
}

impl DeviceInfo {
    pub fn new(lba_size: u64, zone_cap: u64, zasl: u64, mdts: u64) -> Result<Self> {
        if lba_size < 512 || !lba_size.is_power_of_two() {
            return Err(Error::InvalidArgument(format!(
                "lba_size must be a power of two of at least 512, got {lba_size}"
            )));
        }
        if zone_cap == 0 {
            return Err(Error::InvalidArgument("zone_cap must be nonzero".to_string()));
        }
        Ok(Self {
            lba_size,
            zone_cap,
            zasl,
            mdts,
        })
    }
}

/// A circular sequential log over a range of zones.
///
/// All methods take `&self`; implementations supply their own interior
/// mutability so one log can serve an appender and multiple readers at
/// once. Reads are partitioned by `reader_slot`, one preallocated device
/// queue per slot.
pub trait ZoneLog: Send + Sync {
    /// Device geometry this log was opened with.
    fn info(&self) -> &DeviceInfo;

    /// First LBA of the log's range.
    fn min_lba(&self) -> u64;

    /// One past the last LBA of the log's range.
    fn max_lba(&self) -> u64;

    /// Appends `data` at the write head, zero-padded to a whole number of
    /// LBAs. Returns the number of LBAs written.
    fn append(&self, data: &[u8]) -> Result<u64>;

    /// Ranged read starting at `lba` into `buf`, whose length must be a
    /// whole number of LBAs. `reader_slot` selects the device queue.
    fn read(&self, lba: u64, buf: &mut [u8], reader_slot: usize) -> Result<()>;

    /// Whether at least `bytes` of free space remain.
    fn space_left(&self, bytes: u64) -> bool {
        self.space_available() * self.info().lba_size >= bytes
    }

    /// Free LBAs remaining.
    fn space_available(&self) -> u64;

    /// Current append position.
    fn write_head(&self) -> u64;

    /// Oldest live position; reclamation starts here.
    fn write_tail(&self) -> u64;

    /// Resets the whole zones covering `[from, to)` and advances the tail.
    /// `from` must equal the current tail and `to - from` must be a whole
    /// multiple of the zone capacity.
    fn consume_tail(&self, from: u64, to: u64) -> Result<()>;

    /// Wraps `x` into the log's LBA range.
    fn wrapped_addr(&self, x: u64) -> u64;

    /// Reconstructs head and tail from device state at startup.
    fn recover_pointers(&self) -> Result<()>;
}

struct LogState {
    data: Vec<u8>,
    write_head: u64,
    write_tail: u64,
    used_lbas: u64,
}

/// In-memory [`ZoneLog`] over `[min_zone, max_zone)` of an emulated device.
pub struct MemZoneLog {
    info: DeviceInfo,
    min_lba: u64,
    max_lba: u64,
    state: Mutex<LogState>,
}

impl MemZoneLog {
    pub fn new(info: DeviceInfo, min_zone: u64, max_zone: u64) -> Result<Self> {
        if min_zone >= max_zone {
            return Err(Error::InvalidArgument(format!(
                "empty zone range [{min_zone}, {max_zone})"
            )));
        }
        let min_lba = min_zone * info.zone_cap;
        let max_lba = max_zone * info.zone_cap;
        let bytes = (max_lba - min_lba) * info.lba_size;
        Ok(Self {
            info,
            min_lba,
            max_lba,
            state: Mutex::new(LogState {
                data: vec![0u8; bytes as usize],
                write_head: min_lba,
                write_tail: min_lba,
                used_lbas: 0,
            }),
        })
    }

    fn capacity_lbas(&self) -> u64 {
        self.max_lba - self.min_lba
    }

    /// Byte offset of `lba` within the arena.
    fn offset(&self, lba: u64) -> usize {
        ((lba - self.min_lba) * self.info.lba_size) as usize
    }
}

impl ZoneLog for MemZoneLog {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn min_lba(&self) -> u64 {
        self.min_lba
    }

    fn max_lba(&self) -> u64 {
        self.max_lba
    }

    fn append(&self, data: &[u8]) -> Result<u64> {
        let lba_size = self.info.lba_size;
        let lbas = (data.len() as u64).div_ceil(lba_size);
        let mut state = self.state.lock()?;
        if state.used_lbas + lbas > self.capacity_lbas() {
            return Err(Error::NoSpace);
        }

        let mut src = 0usize;
        let mut lba = state.write_head;
        for _ in 0..lbas {
            let off = self.offset(lba);
            let take = (data.len() - src).min(lba_size as usize);
            state.data[off..off + take].copy_from_slice(&data[src..src + take]);
            // Zero the padding of a partial trailing block.
            state.data[off + take..off + lba_size as usize].fill(0);
            src += take;
            lba = self.wrapped_addr(lba + 1);
        }

        state.write_head = lba;
        state.used_lbas += lbas;
        Ok(lbas)
    }

    fn read(&self, lba: u64, buf: &mut [u8], _reader_slot: usize) -> Result<()> {
        let lba_size = self.info.lba_size;
        if buf.len() as u64 % lba_size != 0 {
            return Err(Error::InvalidArgument(format!(
                "read length {} is not a whole number of LBAs",
                buf.len()
            )));
        }
        let lbas = buf.len() as u64 / lba_size;
        if lba < self.min_lba || lba >= self.max_lba || lbas > self.capacity_lbas() {
            return Err(Error::InvalidArgument(format!(
                "read of {lbas} LBAs at {lba} outside [{}, {})",
                self.min_lba, self.max_lba
            )));
        }

        let state = self.state.lock()?;
        let mut cur = lba;
        for i in 0..lbas as usize {
            let off = self.offset(cur);
            buf[i * lba_size as usize..(i + 1) * lba_size as usize]
                .copy_from_slice(&state.data[off..off + lba_size as usize]);
            cur = self.wrapped_addr(cur + 1);
        }
        Ok(())
    }

    fn space_available(&self) -> u64 {
        let state = self.state.lock().expect("zone log state poisoned");
        self.capacity_lbas() - state.used_lbas
    }

    fn write_head(&self) -> u64 {
        let state = self.state.lock().expect("zone log state poisoned");
        state.write_head
    }

    fn write_tail(&self) -> u64 {
        let state = self.state.lock().expect("zone log state poisoned");
        state.write_tail
    }

    fn consume_tail(&self, from: u64, to: u64) -> Result<()> {
        let zone_cap = self.info.zone_cap;
        let mut state = self.state.lock()?;
        if from != state.write_tail {
            return Err(Error::InvalidArgument(format!(
                "consume_tail from {from} does not match tail {}",
                state.write_tail
            )));
        }
        if to < from || (to - from) % zone_cap != 0 {
            return Err(Error::InvalidArgument(format!(
                "consume_tail range [{from}, {to}) is not whole zones"
            )));
        }
        let blocks = to - from;
        if blocks > state.used_lbas {
            return Err(Error::InvalidArgument(format!(
                "consume_tail of {blocks} LBAs exceeds {} in use",
                state.used_lbas
            )));
        }

        let mut lba = state.write_tail;
        for _ in 0..blocks {
            let off = self.offset(lba);
            state.data[off..off + self.info.lba_size as usize].fill(0);
            lba = self.wrapped_addr(lba + 1);
        }
        state.write_tail = lba;
        state.used_lbas -= blocks;
        Ok(())
    }

    fn wrapped_addr(&self, x: u64) -> u64 {
        self.min_lba + (x - self.min_lba) % self.capacity_lbas()
    }

    fn recover_pointers(&self) -> Result<()> {
        // The arena is the device; its pointers never go stale. A real
        // driver reissues zone reports here.
        Ok(())
    }
}

#[cfg(test)]
impl MemZoneLog {
    /// Fault-injection hook: overwrites raw bytes at `lba`, bypassing the
    /// append path entirely.
    pub(crate) fn corrupt(&self, lba: u64, data: &[u8]) {
        let mut state = self.state.lock().expect("zone log state poisoned");
        let off = self.offset(lba);
        state.data[off..off + data.len()].copy_from_slice(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_info() -> DeviceInfo {
        DeviceInfo::new(512, 8, 64 * 1024, 128 * 1024).expect("valid device info")
    }

    fn test_log() -> MemZoneLog {
        MemZoneLog::new(test_info(), 0, 4).expect("failed to create log")
    }

    #[test]
    fn test_info_validation() {
        assert!(DeviceInfo::new(500, 8, 0, 0).is_err());
        assert!(DeviceInfo::new(256, 8, 0, 0).is_err());
        assert!(DeviceInfo::new(512, 0, 0, 0).is_err());
        assert!(DeviceInfo::new(4096, 64, 0, 0).is_ok());
    }

    #[test]
    fn test_append_advances_head_by_whole_lbas() {
        let log = test_log();
        let lbas = log.append(&[0xAA; 700]).expect("append failed");
        assert_eq!(lbas, 2);
        assert_eq!(log.write_head(), 2);
        assert_eq!(log.write_tail(), 0);
        assert_eq!(log.space_available(), 30);
    }

    #[test]
    fn test_append_pads_with_zeroes() {
        let log = test_log();
        log.append(&[0xAA; 700]).expect("append failed");

        let mut buf = vec![0xFF; 1024];
        log.read(0, &mut buf, 0).expect("read failed");
        assert!(buf[..700].iter().all(|&b| b == 0xAA));
        assert!(buf[700..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_append_until_full() {
        let log = test_log();
        for _ in 0..32 {
            log.append(&[1u8; 512]).expect("append failed");
        }
        assert_eq!(log.space_available(), 0);
        assert_eq!(log.append(&[1u8; 512]), Err(Error::NoSpace));
    }

    #[test]
    fn test_read_rejects_partial_lba() {
        let log = test_log();
        log.append(&[1u8; 512]).expect("append failed");
        let mut buf = vec![0u8; 100];
        assert!(matches!(
            log.read(0, &mut buf, 0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_read_out_of_range() {
        let log = test_log();
        let mut buf = vec![0u8; 512];
        assert!(matches!(
            log.read(32, &mut buf, 0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_consume_tail_whole_zones_only() {
        let log = test_log();
        for _ in 0..16 {
            log.append(&[2u8; 512]).expect("append failed");
        }

        // Not a zone multiple.
        assert!(log.consume_tail(0, 5).is_err());
        // Not at the tail.
        assert!(log.consume_tail(8, 16).is_err());

        log.consume_tail(0, 8).expect("consume failed");
        assert_eq!(log.write_tail(), 8);
        assert_eq!(log.space_available(), 24);
    }

    #[test]
    fn test_consume_tail_zeroes_data() {
        let log = test_log();
        for _ in 0..8 {
            log.append(&[3u8; 512]).expect("append failed");
        }
        log.consume_tail(0, 8).expect("consume failed");

        let mut buf = vec![0xFF; 512];
        log.read(0, &mut buf, 0).expect("read failed");
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_wraparound_append_and_read() {
        let log = test_log();
        // Fill three zones, reclaim two, then wrap past the end.
        for _ in 0..24 {
            log.append(&[4u8; 512]).expect("append failed");
        }
        log.consume_tail(0, 16).expect("consume failed");

        let payload = vec![5u8; 512 * 12];
        let lbas = log.append(&payload).expect("append failed");
        assert_eq!(lbas, 12);
        // Head wrapped: 24 + 12 = 36 -> 4.
        assert_eq!(log.write_head(), 4);

        let mut buf = vec![0u8; 512 * 12];
        log.read(24, &mut buf, 0).expect("read failed");
        assert_eq!(buf, payload);
    }

    #[test]
    fn test_wrapped_addr() {
        let log = test_log();
        assert_eq!(log.wrapped_addr(0), 0);
        assert_eq!(log.wrapped_addr(31), 31);
        assert_eq!(log.wrapped_addr(32), 0);
        assert_eq!(log.wrapped_addr(40), 8);
    }

    #[test]
    fn test_min_zone_offset_range() {
        let info = test_info();
        let log = MemZoneLog::new(info, 2, 4).expect("failed to create log");
        assert_eq!(log.min_lba(), 16);
        assert_eq!(log.max_lba(), 32);
        assert_eq!(log.write_head(), 16);
        assert_eq!(log.wrapped_addr(32), 16);

        log.append(&[6u8; 512]).expect("append failed");
        let mut buf = vec![0u8; 512];
        log.read(16, &mut buf, 0).expect("read failed");
        assert!(buf.iter().all(|&b| b == 6));
    }
}
