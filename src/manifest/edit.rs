//! Version edit codec: the record-framed delta encoding used by the
//! manifest.
//!
//! An edit is a sequence of `(tag, payload)` fields from a closed tag set.
//! Integers are LEB128 varints, levels and region counts are single fixed
//! bytes, and internal keys are length-prefixed. An L0 table location is a
//! single LBA; an LN location is a region count followed by `(lba, size)`
//! pairs. Decoding rejects unknown tags, truncated fields, out-of-range
//! levels and trailing bytes.

use crate::encoding::{
    get_fixed8, get_length_prefixed, get_varint32, get_varint64, put_fixed8,
    put_length_prefixed, put_varint32, put_varint64,
};
use crate::error::Result;
use crate::keys::InternalKey;
use crate::sstable::{TableLocation, TableMeta, MAX_LN_REGIONS};
use crate::Error;

const TAG_COMPARATOR: u32 = 1;
const TAG_LAST_SEQUENCE: u32 = 2;
const TAG_NEXT_TABLE_NUMBER: u32 = 3;
const TAG_COMPACT_POINTER: u32 = 4;
const TAG_DELETED_RANGE: u32 = 5;
const TAG_DELETED_TABLE: u32 = 6;
const TAG_NEW_TABLE: u32 = 7;
const TAG_FRAGMENTED_DATA: u32 = 8;

/// A metadata delta applied to the manifest.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VersionEdit {
    pub comparator: Option<Vec<u8>>,
    pub last_sequence: Option<u64>,
    pub next_table_number: Option<u64>,
    pub compact_pointers: Vec<(u8, InternalKey)>,
    pub deleted_range: Option<(u64, u64)>,
    pub deleted_tables: Vec<(u8, TableMeta)>,
    pub new_tables: Vec<(u8, TableMeta)>,
    pub fragmented_data: Vec<(u8, Vec<u8>)>,
}

impl VersionEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Records a table added to `level`.
    pub fn add_table(&mut self, level: u8, meta: TableMeta) {
        self.new_tables.push((level, meta));
    }

    /// Records a table removed from `level`.
    pub fn remove_table(&mut self, level: u8, meta: TableMeta) {
        self.deleted_tables.push((level, meta));
    }

    pub fn set_last_sequence(&mut self, seq: u64) {
        self.last_sequence = Some(seq);
    }

    pub fn set_next_table_number(&mut self, number: u64) {
        self.next_table_number = Some(number);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dst = Vec::new();

        if let Some(comparator) = &self.comparator {
            put_varint32(&mut dst, TAG_COMPARATOR);
            put_length_prefixed(&mut dst, comparator);
        }
        if let Some(last_sequence) = self.last_sequence {
            put_varint32(&mut dst, TAG_LAST_SEQUENCE);
            put_varint64(&mut dst, last_sequence);
        }
        if let Some(number) = self.next_table_number {
            put_varint32(&mut dst, TAG_NEXT_TABLE_NUMBER);
            put_varint64(&mut dst, number);
        }
        for (level, key) in &self.compact_pointers {
            put_varint32(&mut dst, TAG_COMPACT_POINTER);
            put_fixed8(&mut dst, *level);
            put_length_prefixed(&mut dst, &key.encode());
        }
        if let Some((first, last)) = self.deleted_range {
            put_varint32(&mut dst, TAG_DELETED_RANGE);
            put_varint64(&mut dst, first);
            put_varint64(&mut dst, last);
        }
        for (level, meta) in &self.deleted_tables {
            put_varint32(&mut dst, TAG_DELETED_TABLE);
            encode_table(&mut dst, *level, meta);
        }
        for (level, meta) in &self.new_tables {
            put_varint32(&mut dst, TAG_NEW_TABLE);
            encode_table(&mut dst, *level, meta);
        }
        for (level, data) in &self.fragmented_data {
            put_varint32(&mut dst, TAG_FRAGMENTED_DATA);
            put_fixed8(&mut dst, *level);
            put_length_prefixed(&mut dst, data);
        }

        dst
    }

    /// Decodes an edit, validating levels against `level_count`.
    pub fn decode(src: &[u8], level_count: u8) -> Result<Self> {
        let mut edit = VersionEdit::default();
        let mut input = src;
        let mut msg: Option<&str> = None;

        while msg.is_none() && !input.is_empty() {
            let tag = match get_varint32(&mut input) {
                Some(tag) => tag,
                None => {
                    msg = Some("invalid tag");
                    break;
                }
            };
            match tag {
                TAG_COMPARATOR => match get_length_prefixed(&mut input) {
                    Some(name) => edit.comparator = Some(name.to_vec()),
                    None => msg = Some("comparator name"),
                },
                TAG_LAST_SEQUENCE => match get_varint64(&mut input) {
                    Some(seq) => edit.last_sequence = Some(seq),
                    None => msg = Some("last sequence number"),
                },
                TAG_NEXT_TABLE_NUMBER => match get_varint64(&mut input) {
                    Some(number) => edit.next_table_number = Some(number),
                    None => msg = Some("next table number"),
                },
                TAG_COMPACT_POINTER => {
                    match (get_level(&mut input, level_count), get_internal_key(&mut input)) {
                        (Some(level), Some(key)) => edit.compact_pointers.push((level, key)),
                        _ => msg = Some("compaction pointer"),
                    }
                }
                TAG_DELETED_RANGE => {
                    match (get_varint64(&mut input), get_varint64(&mut input)) {
                        (Some(first), Some(last)) => edit.deleted_range = Some((first, last)),
                        _ => msg = Some("deleted table range"),
                    }
                }
                TAG_DELETED_TABLE => match decode_table(&mut input, level_count) {
                    Some((level, meta)) => edit.deleted_tables.push((level, meta)),
                    None => msg = Some("deleted table entry"),
                },
                TAG_NEW_TABLE => match decode_table(&mut input, level_count) {
                    Some((level, meta)) => edit.new_tables.push((level, meta)),
                    None => msg = Some("new table entry"),
                },
                TAG_FRAGMENTED_DATA => {
                    match (get_level(&mut input, level_count), get_length_prefixed(&mut input)) {
                        (Some(level), Some(data)) => {
                            edit.fragmented_data.push((level, data.to_vec()))
                        }
                        _ => msg = Some("fragmented log"),
                    }
                }
                _ => msg = Some("unknown or unsupported tag"),
            }
        }

        match msg {
            Some(msg) => Err(Error::Corruption(format!("VersionEdit: {msg}"))),
            None => Ok(edit),
        }
    }
}

fn encode_table(dst: &mut Vec<u8>, level: u8, meta: &TableMeta) {
    put_fixed8(dst, level);
    put_varint64(dst, meta.number);
    match &meta.location {
        TableLocation::L0 { lba, .. } => {
            put_varint64(dst, *lba);
        }
        TableLocation::LN { regions } => {
            put_fixed8(dst, regions.len() as u8);
            for (lba, size) in regions {
                put_varint64(dst, *lba);
                put_varint64(dst, *size);
            }
        }
    }
    put_varint64(dst, meta.entries);
    put_varint64(dst, meta.lba_count);
    put_length_prefixed(dst, &meta.smallest.encode());
    put_length_prefixed(dst, &meta.largest.encode());
}

fn decode_table(input: &mut &[u8], level_count: u8) -> Option<(u8, TableMeta)> {
    let level = get_level(input, level_count)?;
    let mut meta = TableMeta {
        number: get_varint64(input)?,
        ..TableMeta::default()
    };
    if level == 0 {
        meta.location = TableLocation::L0 {
            lba: get_varint64(input)?,
            log_number: 0,
        };
    } else {
        let region_count = get_fixed8(input)? as usize;
        if region_count > MAX_LN_REGIONS {
            return None;
        }
        let mut regions = Vec::with_capacity(region_count);
        for _ in 0..region_count {
            regions.push((get_varint64(input)?, get_varint64(input)?));
        }
        meta.location = TableLocation::LN { regions };
    }
    meta.entries = get_varint64(input)?;
    meta.lba_count = get_varint64(input)?;
    meta.smallest = get_internal_key(input)?;
    meta.largest = get_internal_key(input)?;
    Some((level, meta))
}

fn get_level(input: &mut &[u8], level_count: u8) -> Option<u8> {
    let level = get_fixed8(input)?;
    if level < level_count {
        Some(level)
    } else {
        None
    }
}

fn get_internal_key(input: &mut &[u8]) -> Option<InternalKey> {
    let encoded = get_length_prefixed(input)?;
    InternalKey::decode(encoded).ok()
}
