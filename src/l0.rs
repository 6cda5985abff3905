//! L0 SSTable log manager.
//!
//! One `L0Log` owns one circular zone log and stages whole SSTables flushed
//! from the memtable. Writes are strictly sequential appends at the write
//! head; reads pull whole tables back into memory through a bounded pool of
//! reader slots; space is reclaimed only by resetting contiguous whole-zone
//! spans at the write tail.
//!
//! ```text
//!             tail                                   head
//!              v                                      v
//!  | zone 0   | zone 1   | zone 2   | zone 3   | zone 4   |
//!  +----------+----------+----------+----------+----------+
//!  |..........|##T4##T5##|#T6###T7##|##T8####..|..........|
//!  +----------+----------+----------+----------+----------+
//! ```
//!
//! # Concurrency
//!
//! At most `l0_readers` reads execute in parallel; a reader acquires a slot
//! from the counter array under the mutex, waiting on the condvar when all
//! are busy, and releases it with a signal-all. One flush driver runs at a
//! time per lane. When deferred writes are enabled the driver hands sealed
//! builders to a worker thread through a bounded FIFO mailbox and the
//! worker commits them in hand-off order; the first flush error is stored
//! on the mailbox and surfaced when the driver shuts the worker down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use crate::commit::grow_buffer;
use crate::config::StoreConfig;
use crate::device::ZoneLog;
use crate::encoding::get_fixed64;
use crate::error::Result;
use crate::keys::{InternalKey, ValueKind};
use crate::memtable::Memtable;
use crate::sstable::{
    Diagnostics, EntryStatus, SsTable, TableBuilder, TableIterator, TableLocation, TableMeta,
};
use crate::{errcorrupt, Error};

/// One circular L0 log: a lane of the L0 level.
pub struct L0Log<L: ZoneLog> {
    log: L,
    lane: u8,
    lba_size: u64,
    zone_cap: u64,
    defer_flush_writes: bool,
    max_deferred_writes: usize,
    max_bytes_sstable_l0: u64,
    use_table_encoding: bool,
    read_queue: Mutex<Vec<u32>>,
    reader_released: Condvar,
    appends: AtomicU64,
    reads: AtomicU64,
    zone_resets: AtomicU64,
}

/// Hand-off queue between the flush driver and the deferred-flush worker.
///
/// Single producer, single consumer: the driver pushes sealed builders and
/// sets `last` after the final one; the worker drains `queue[index]` in
/// order, records committed metas, and raises `done` on exit.
struct Mailbox<'l> {
    state: Mutex<MailboxState<'l>>,
    task_signal: Condvar,
}

struct MailboxState<'l> {
    queue: Vec<Option<TableBuilder<'l>>>,
    index: usize,
    last: bool,
    done: bool,
    metas: Vec<TableMeta>,
    error: Option<Error>,
}

impl<L: ZoneLog> L0Log<L> {
    pub fn new(log: L, lane: u8, config: &StoreConfig) -> Self {
        let info = *log.info();
        Self {
            log,
            lane,
            lba_size: info.lba_size,
            zone_cap: info.zone_cap,
            defer_flush_writes: config.defer_flush_writes,
            max_deferred_writes: config.max_deferred_writes,
            max_bytes_sstable_l0: config.max_bytes_sstable_l0,
            use_table_encoding: config.use_table_encoding,
            read_queue: Mutex::new(vec![0; config.l0_readers]),
            reader_released: Condvar::new(),
            appends: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            zone_resets: AtomicU64::new(0),
        }
    }

    pub fn lane(&self) -> u8 {
        self.lane
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    /// Claims a free reader slot, waiting while all are in use.
    pub fn acquire_reader(&self) -> Result<usize> {
        let mut queue = self.read_queue.lock()?;
        loop {
            if let Some(slot) = queue.iter().position(|&count| count == 0) {
                queue[slot] += 1;
                return Ok(slot);
            }
            queue = self.reader_released.wait(queue)?;
        }
    }

    /// Returns a slot to the pool and wakes all waiters.
    pub fn release_reader(&self, slot: usize) {
        let mut queue = self.read_queue.lock().expect("reader pool poisoned");
        assert!(
            slot < queue.len() && queue[slot] != 0,
            "released reader slot {slot} was not held"
        );
        queue[slot] = 0;
        self.reader_released.notify_all();
    }

    /// Point lookup of `user_key` in the table described by `meta`.
    pub fn get(
        &self,
        user_key: &[u8],
        meta: &TableMeta,
    ) -> Result<(EntryStatus, Option<Vec<u8>>)> {
        let mut iter = self.new_iterator(meta)?;
        match iter.seek(user_key) {
            Some((key, value)) if key.user_key() == user_key => match key.kind() {
                Some(ValueKind::Deletion) => Ok((EntryStatus::Deleted, None)),
                Some(ValueKind::Value) => Ok((EntryStatus::Found, Some(value))),
                None => {
                    tracing::error!(number = meta.number, "l0: corrupt key found");
                    Ok((EntryStatus::Found, Some(value)))
                }
            },
            _ => Ok((EntryStatus::NotFound, None)),
        }
    }

    /// Drives a memtable's entries into one or more SSTables on this lane.
    /// Produced metas are appended to `metas` in commit order with the lane
    /// stamped as their log number.
    pub fn flush_memtable(&self, mem: &Memtable, metas: &mut Vec<TableMeta>) -> Result<()> {
        if mem.is_empty() {
            tracing::error!("l0: no entries to flush");
            return errcorrupt!("no valid iterator in the memtable");
        }
        let start = metas.len();
        let mailbox = Mailbox {
            state: Mutex::new(MailboxState {
                queue: Vec::new(),
                index: 0,
                last: false,
                done: false,
                metas: Vec::new(),
                error: None,
            }),
            task_signal: Condvar::new(),
        };

        let result = std::thread::scope(|scope| {
            if self.defer_flush_writes {
                scope.spawn(|| self.drain_deferred(&mailbox));
            }

            let cap_lbas = self.max_bytes_sstable_l0.div_ceil(self.lba_size);
            let mut result = Ok(());
            let mut builder = self.new_builder(TableMeta::default());
            let mut seq = 0u64;

            for (key, value) in mem.iter() {
                seq += 1;
                let kind = match value {
                    Some(_) => ValueKind::Value,
                    None => ValueKind::Deletion,
                };
                let ikey = InternalKey::new(&key, seq, kind);
                let val = value.unwrap_or_default();
                if let Err(e) = builder.apply(&ikey, &val) {
                    result = Err(e);
                    break;
                }
                // Swap builders before a table would outgrow the L0 cap.
                let projected = builder.size() + builder.estimate_impact(&ikey, &val);
                if projected.div_ceil(self.lba_size) >= cap_lbas {
                    if let Err(e) = builder.finalise() {
                        result = Err(e);
                        break;
                    }
                    let full = std::mem::replace(
                        &mut builder,
                        self.new_builder(TableMeta::default()),
                    );
                    if let Err(e) = self.flush_sstable(full, &mailbox, metas) {
                        tracing::error!(error = %e, "l0: error flushing table");
                        result = Err(e);
                        break;
                    }
                }
            }

            // Write whatever the last builder still holds.
            if result.is_ok() && builder.size() > 0 {
                result = match builder.finalise() {
                    Ok(()) => self.flush_sstable(builder, &mailbox, metas),
                    Err(e) => Err(e),
                };
                if let Err(e) = &result {
                    tracing::error!(error = %e, "l0: error flushing table");
                }
            }

            if self.defer_flush_writes {
                let mut state = mailbox.state.lock().expect("deferred mailbox poisoned");
                state.last = true;
                mailbox.task_signal.notify_all();
                while !state.done {
                    state = mailbox
                        .task_signal
                        .wait(state)
                        .expect("deferred mailbox poisoned");
                }
                metas.append(&mut state.metas);
                if result.is_ok() {
                    if let Some(e) = state.error.take() {
                        result = Err(e);
                    }
                }
                tracing::debug!("deferred flush worker quit");
            }
            result
        });

        for meta in &mut metas[start..] {
            if let TableLocation::L0 { log_number, .. } = &mut meta.location {
                *log_number = self.lane;
            }
        }
        result
    }

    /// Hands a sealed builder off for writing: enqueued on the deferred
    /// worker when enabled, written inline otherwise.
    fn flush_sstable<'l>(
        &'l self,
        builder: TableBuilder<'l>,
        mailbox: &Mailbox<'l>,
        metas: &mut Vec<TableMeta>,
    ) -> Result<()> {
        if self.defer_flush_writes {
            // The worker's mailbox may be full; be polite and wait.
            let mut state = mailbox.state.lock()?;
            while state.queue.len() - state.index > self.max_deferred_writes {
                state = mailbox.task_signal.wait(state)?;
            }
            state.queue.push(Some(builder));
            mailbox.task_signal.notify_all();
            Ok(())
        } else {
            let mut builder = builder;
            let result = builder.flush();
            match result {
                Ok(()) => metas.push(builder.into_meta()),
                Err(ref e) => tracing::error!(error = %e, "l0: error writing table"),
            }
            result
        }
    }

    /// Deferred-flush worker loop: drains the mailbox FIFO until `last`.
    fn drain_deferred(&self, mailbox: &Mailbox<'_>) {
        loop {
            let mut state = mailbox.state.lock().expect("deferred mailbox poisoned");
            while state.index >= state.queue.len() {
                if state.last {
                    state.done = true;
                    mailbox.task_signal.notify_all();
                    return;
                }
                state = mailbox
                    .task_signal
                    .wait(state)
                    .expect("deferred mailbox poisoned");
            }
            let index = state.index;
            let task = state.queue[index].take();
            drop(state);

            let outcome = match task {
                None => {
                    tracing::error!("deferred flush: builder is missing");
                    Err(Error::Corruption("deferred flush task is missing".to_string()))
                }
                Some(mut builder) => match builder.flush() {
                    Ok(()) => Ok(builder.into_meta()),
                    Err(e) => Err(e),
                },
            };

            let mut state = mailbox.state.lock().expect("deferred mailbox poisoned");
            match outcome {
                Ok(meta) => state.metas.push(meta),
                Err(e) => {
                    tracing::error!(error = %e, "deferred flush: error writing table");
                    if state.error.is_none() {
                        state.error = Some(e);
                    }
                }
            }
            state.index += 1;
            mailbox.task_signal.notify_all();
        }
    }

    /// Reclaims the longest reclaimable whole-zone span at the write tail.
    ///
    /// `metas` must be the victims in on-log order, starting at the tail.
    /// Victims that cannot be physically reclaimed are returned through
    /// `remaining`; a partially reclaimed span leaves a synthetic remainder
    /// meta describing the surviving blocks.
    pub fn try_invalidate(
        &self,
        metas: &[TableMeta],
        remaining: &mut Vec<TableMeta>,
    ) -> Result<()> {
        if metas.is_empty() {
            return errcorrupt!("no tables to invalidate");
        }
        let first_lba = metas[0].l0_lba()?;

        // The victims must start exactly at the tail, else nothing can move.
        if self.log.write_tail() != first_lba {
            remaining.extend(metas.iter().cloned());
            return Ok(());
        }

        let mut mock = metas[0].clone();
        let mut prev_number = metas[0].number;
        let mut prev_end = first_lba + metas[0].lba_count;
        let mut blocks = first_lba % self.zone_cap + metas[0].lba_count;
        let mut upto = 0usize;
        let mut blocks_to_delete = 0u64;

        for (i, meta) in metas.iter().enumerate().skip(1) {
            let lba = meta.l0_lba()?;
            if prev_number == meta.number {
                tracing::error!(number = meta.number, "l0: reset of two tables with the same number");
                return errcorrupt!("tables with the same number detected");
            }
            if self.log.wrapped_addr(prev_end) != lba {
                break;
            }
            blocks += meta.lba_count;
            prev_number = meta.number;
            prev_end = lba + meta.lba_count;
            if blocks >= self.zone_cap {
                mock.number = meta.number;
                blocks_to_delete += blocks;
                upto = i + 1;
                blocks = 0;
            }
        }

        // Blocks past the last whole-zone boundary survive as a synthetic
        // remainder table at the new tail.
        if blocks_to_delete % self.zone_cap != 0 {
            let safe = (blocks_to_delete / self.zone_cap) * self.zone_cap;
            mock.lba_count = blocks_to_delete - safe;
            blocks_to_delete = safe;
            mock.location = TableLocation::L0 {
                lba: self.log.wrapped_addr(self.log.write_tail() + blocks_to_delete),
                log_number: self.lane,
            };
            remaining.push(mock);
        }

        let mut result = Ok(());
        if blocks_to_delete > 0 {
            let tail = self.log.write_tail();
            result = self.log.consume_tail(tail, tail + blocks_to_delete);
            match result {
                Ok(()) => {
                    self.zone_resets
                        .fetch_add(blocks_to_delete / self.zone_cap, Ordering::Relaxed);
                }
                Err(_) => tracing::error!("l0: failed resetting tail"),
            }
        }

        remaining.extend(metas[upto..].iter().cloned());
        result
    }
}

impl<L: ZoneLog> SsTable for L0Log<L> {
    fn read_table(&self, meta: &TableMeta) -> Result<Vec<u8>> {
        let lba = meta.l0_lba()?;
        let (min, max) = (self.log.min_lba(), self.log.max_lba());
        if lba < min || lba >= max || meta.lba_count > max - min {
            tracing::error!(number = meta.number, lba, "l0: invalid table metadata");
            return errcorrupt!("invalid metadata for table {}", meta.number);
        }

        let slot = self.acquire_reader()?;
        let mut data = Vec::new();
        if grow_buffer(&mut data, (meta.lba_count * self.lba_size) as usize).is_err() {
            self.release_reader(slot);
            return Err(Error::MemoryLimit);
        }
        let read = self.log.read(lba, &mut data, slot);
        self.release_reader(slot);

        if let Err(e) = read {
            tracing::error!(
                number = meta.number,
                lba,
                lba_count = meta.lba_count,
                "l0: failed reading table"
            );
            return Err(Error::IO(e.to_string()));
        }
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(data)
    }

    fn write_table(&self, content: &[u8], meta: &mut TableMeta) -> Result<()> {
        // The caller is expected to have checked for space beforehand.
        if !self.enough_space(content.len() as u64) {
            tracing::error!("l0: out of space");
            return Err(Error::NoSpace);
        }
        meta.location = TableLocation::L0 {
            lba: self.log.write_head(),
            log_number: self.lane,
        };
        meta.lba_count = self.log.append(content)?;
        self.appends.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn new_builder(&self, meta: TableMeta) -> TableBuilder<'_> {
        TableBuilder::new(self, meta, self.use_table_encoding)
    }

    fn new_iterator(&self, meta: &TableMeta) -> Result<TableIterator> {
        let data = self.read_table(meta)?;
        if self.use_table_encoding {
            let mut input = data.as_slice();
            let size = get_fixed64(&mut input).unwrap_or(0);
            let count = get_fixed64(&mut input).unwrap_or(0);
            if size == 0 || count == 0 {
                tracing::error!(size, count, "l0: reading corrupt table header");
            }
            Ok(TableIterator::encoded(data))
        } else {
            Ok(TableIterator::plain(data))
        }
    }

    fn invalidate(&self, meta: &TableMeta) -> Result<()> {
        let lba = meta.l0_lba()?;
        self.log.consume_tail(lba, lba + meta.lba_count)?;
        self.zone_resets
            .fetch_add(meta.lba_count / self.zone_cap, Ordering::Relaxed);
        Ok(())
    }

    fn recover(&self) -> Result<()> {
        self.log.recover_pointers()
    }

    fn enough_space(&self, size: u64) -> bool {
        self.log.space_left(size)
    }

    fn space_available(&self) -> u64 {
        self.log.space_available() * self.lba_size
    }

    fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            name: format!("L0-{}", self.lane),
            appends: self.appends.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            zone_resets: self.zone_resets.load(Ordering::Relaxed),
        }
    }
}
