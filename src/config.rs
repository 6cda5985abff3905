/// Configuration for the storage core.
///
/// Tunables cover the L0 circular logs, the commit codec and the flush
/// driver. Device geometry lives in [`crate::device::DeviceInfo`] and is
/// not configurable here.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of concurrent readers per L0 log (default: 4)
    pub l0_readers: usize,

    /// Number of parallel L0 circular logs (default: 1)
    pub l0_lanes: u8,

    /// Number of LSM levels, L0 up to LN (default: 6)
    pub level_count: u8,

    /// Retain the commit codec's write buffer between commits (default: false)
    pub keep_commit_buffer: bool,

    /// Hand SSTable writes to a background worker during flushes (default: true)
    pub defer_flush_writes: bool,

    /// Maximum SSTable writes queued on the deferred worker (default: 4)
    pub max_deferred_writes: usize,

    /// Target size of an L0 SSTable in bytes, rounded up to whole LBAs
    /// by the flush driver (default: 512MB)
    pub max_bytes_sstable_l0: u64,

    /// Use prefix-compressed SSTable encoding instead of the plain
    /// count-prefixed layout (default: true)
    pub use_table_encoding: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            l0_readers: 4,
            l0_lanes: 1,
            level_count: 6,
            keep_commit_buffer: false,
            defer_flush_writes: true,
            max_deferred_writes: 4,
            max_bytes_sstable_l0: 512 * 1024 * 1024,
            use_table_encoding: true,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the L0 reader pool size
    pub fn l0_readers(mut self, readers: usize) -> Self {
        self.l0_readers = readers;
        self
    }

    /// Set the number of parallel L0 logs
    pub fn l0_lanes(mut self, lanes: u8) -> Self {
        self.l0_lanes = lanes;
        self
    }

    /// Set the LSM level count
    pub fn level_count(mut self, levels: u8) -> Self {
        self.level_count = levels;
        self
    }

    /// Retain commit buffers between operations
    pub fn keep_commit_buffer(mut self, keep: bool) -> Self {
        self.keep_commit_buffer = keep;
        self
    }

    /// Enable or disable deferred SSTable writes during flushes
    pub fn defer_flush_writes(mut self, defer: bool) -> Self {
        self.defer_flush_writes = defer;
        self
    }

    /// Set the deferred write queue bound
    pub fn max_deferred_writes(mut self, max: usize) -> Self {
        self.max_deferred_writes = max;
        self
    }

    /// Set the L0 SSTable size target
    pub fn max_bytes_sstable_l0(mut self, bytes: u64) -> Self {
        self.max_bytes_sstable_l0 = bytes;
        self
    }

    /// Select the SSTable entry encoding
    pub fn use_table_encoding(mut self, encode: bool) -> Self {
        self.use_table_encoding = encode;
        self
    }
}
