//! SSTable builder: accumulates key-ordered entries in memory, then seals
//! them into the on-log table layout and hands the bytes to its table
//! store.
//!
//! Two entry layouts exist, selected at construction:
//!
//! ```text
//! plain:    [count:u32][ klen | vlen | key | value ]*
//! encoded:  [size:u64][count:u64][ shared | non_shared | vlen | key_delta | value ]*
//! ```
//!
//! The encoded layout prefix-compresses keys against their predecessor,
//! restarting from a full key every [`ENCODING_INTERVAL`] entries. Keys are
//! stored in internal-key form; lengths are LEB128 varints and the fixed
//! header fields are little-endian.

use crate::encoding::{put_fixed32, put_fixed64, put_varint32};
use crate::error::Result;
use crate::keys::InternalKey;
use crate::Error;

use super::{SsTable, TableMeta};

/// Entries between full-key restarts in the encoded layout.
pub const ENCODING_INTERVAL: u32 = 16;

/// Builds one SSTable and writes it through an [`SsTable`] store.
pub struct TableBuilder<'a> {
    sink: &'a dyn SsTable,
    meta: TableMeta,
    encode: bool,
    buffer: Vec<u8>,
    last_key: Vec<u8>,
    restart_counter: u32,
    finished: Option<Vec<u8>>,
}

impl<'a> TableBuilder<'a> {
    pub fn new(sink: &'a dyn SsTable, meta: TableMeta, encode: bool) -> Self {
        Self {
            sink,
            meta,
            encode,
            buffer: Vec::new(),
            last_key: Vec::new(),
            restart_counter: 0,
            finished: None,
        }
    }

    /// Appends one entry. Keys must arrive in ascending order; the meta's
    /// key range and entry count track what has been applied.
    pub fn apply(&mut self, key: &InternalKey, value: &[u8]) -> Result<()> {
        if self.finished.is_some() {
            return Err(Error::InvalidArgument(
                "apply on a finalised builder".to_string(),
            ));
        }
        let encoded_key = key.encode();
        if self.meta.entries == 0 {
            self.meta.smallest = key.clone();
        }
        self.meta.largest = key.clone();

        if self.encode {
            let shared = if self.restart_counter >= ENCODING_INTERVAL {
                self.restart_counter = 0;
                0
            } else {
                shared_prefix(&self.last_key, &encoded_key)
            };
            let non_shared = encoded_key.len() - shared;
            put_varint32(&mut self.buffer, shared as u32);
            put_varint32(&mut self.buffer, non_shared as u32);
            put_varint32(&mut self.buffer, value.len() as u32);
            self.buffer.extend_from_slice(&encoded_key[shared..]);
            self.buffer.extend_from_slice(value);
            self.restart_counter += 1;
        } else {
            put_varint32(&mut self.buffer, encoded_key.len() as u32);
            put_varint32(&mut self.buffer, value.len() as u32);
            self.buffer.extend_from_slice(&encoded_key);
            self.buffer.extend_from_slice(value);
        }

        self.last_key = encoded_key;
        self.meta.entries += 1;
        Ok(())
    }

    /// Upper bound on the bytes applying `(key, value)` would add.
    pub fn estimate_impact(&self, key: &InternalKey, value: &[u8]) -> u64 {
        // Three varints of at most five bytes each plus the full key form.
        (key.user_key().len() + 8 + value.len() + 15) as u64
    }

    /// Bytes of entry data buffered so far.
    pub fn size(&self) -> u64 {
        self.buffer.len() as u64
    }

    /// Seals the table: prepends the layout header. No further entries can
    /// be applied.
    pub fn finalise(&mut self) -> Result<()> {
        if self.finished.is_some() {
            return Err(Error::InvalidArgument(
                "finalise on a finalised builder".to_string(),
            ));
        }
        let mut content = Vec::with_capacity(self.buffer.len() + 16);
        if self.encode {
            put_fixed64(&mut content, self.buffer.len() as u64);
            put_fixed64(&mut content, self.meta.entries);
        } else {
            put_fixed32(&mut content, self.meta.entries as u32);
        }
        content.append(&mut self.buffer);
        self.finished = Some(content);
        Ok(())
    }

    /// Writes the sealed table through the store, recording the LBA run in
    /// the meta.
    pub fn flush(&mut self) -> Result<()> {
        let content = self.finished.as_ref().ok_or_else(|| {
            Error::InvalidArgument("flush on a builder that was not finalised".to_string())
        })?;
        self.sink.write_table(content, &mut self.meta)
    }

    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }

    pub fn into_meta(self) -> TableMeta {
        self.meta
    }
}

fn shared_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}
