//! Iterators over the in-memory image of one SSTable.
//!
//! Both layouts produced by [`super::TableBuilder`] are supported. The
//! iterator owns the table bytes (the read path pulls whole tables into
//! memory) and walks entries forward; `seek` is a linear scan from the
//! front, which is how L0 point lookups resolve.

use crate::encoding::{get_fixed32, get_fixed64, get_varint32};
use crate::keys::InternalKey;

/// Forward iterator over one table's entries.
pub struct TableIterator {
    data: Vec<u8>,
    encoded: bool,
    entry_start: usize,
    limit: usize,
    count: u64,
    pos: usize,
    remaining: u64,
    last_key: Vec<u8>,
}

impl TableIterator {
    /// Iterator over the plain `[count:u32][entries]` layout.
    pub fn plain(data: Vec<u8>) -> Self {
        let mut input = data.as_slice();
        let count = get_fixed32(&mut input).unwrap_or(0) as u64;
        let limit = data.len();
        Self {
            data,
            encoded: false,
            entry_start: 4,
            limit,
            count,
            pos: 4,
            remaining: count,
            last_key: Vec::new(),
        }
    }

    /// Iterator over the prefix-compressed `[size:u64][count:u64][entries]`
    /// layout. `size` bounds the entry region so trailing LBA padding is
    /// never parsed.
    pub fn encoded(data: Vec<u8>) -> Self {
        let mut input = data.as_slice();
        let size = get_fixed64(&mut input).unwrap_or(0);
        let count = get_fixed64(&mut input).unwrap_or(0);
        let limit = (16 + size as usize).min(data.len());
        Self {
            data,
            encoded: true,
            entry_start: 16,
            limit,
            count,
            pos: 16,
            remaining: count,
            last_key: Vec::new(),
        }
    }

    /// Entry count claimed by the table header.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn seek_to_first(&mut self) {
        self.pos = self.entry_start;
        self.remaining = self.count;
        self.last_key.clear();
    }

    /// Decodes the entry at the cursor. A truncated or malformed entry
    /// ends the iteration; the table image is never trusted past it.
    pub fn next_entry(&mut self) -> Option<(InternalKey, Vec<u8>)> {
        if self.remaining == 0 || self.pos >= self.limit || self.pos > self.data.len() {
            return None;
        }
        let mut input = &self.data[self.pos..self.limit];

        let (key_bytes, value) = if self.encoded {
            let shared = get_varint32(&mut input)? as usize;
            let non_shared = get_varint32(&mut input)? as usize;
            let vlen = get_varint32(&mut input)? as usize;
            if shared > self.last_key.len() || input.len() < non_shared + vlen {
                tracing::warn!(pos = self.pos, "corrupt encoded table entry");
                self.remaining = 0;
                return None;
            }
            let mut key = self.last_key[..shared].to_vec();
            key.extend_from_slice(&input[..non_shared]);
            let value = input[non_shared..non_shared + vlen].to_vec();
            input = &input[non_shared + vlen..];
            (key, value)
        } else {
            let klen = get_varint32(&mut input)? as usize;
            let vlen = get_varint32(&mut input)? as usize;
            if input.len() < klen + vlen {
                tracing::warn!(pos = self.pos, "corrupt table entry");
                self.remaining = 0;
                return None;
            }
            let key = input[..klen].to_vec();
            let value = input[klen..klen + vlen].to_vec();
            input = &input[klen + vlen..];
            (key, value)
        };

        self.pos = self.limit - input.len();
        self.remaining -= 1;
        self.last_key = key_bytes.clone();

        match InternalKey::decode(&key_bytes) {
            Ok(key) => Some((key, value)),
            Err(_) => {
                tracing::warn!(pos = self.pos, "corrupt internal key in table");
                self.remaining = 0;
                None
            }
        }
    }

    /// Positions at the first entry whose user key is `>= user_key` and
    /// returns it. Scans from the front.
    pub fn seek(&mut self, user_key: &[u8]) -> Option<(InternalKey, Vec<u8>)> {
        self.seek_to_first();
        while let Some((key, value)) = self.next_entry() {
            if key.user_key() >= user_key {
                return Some((key, value));
            }
        }
        None
    }
}

impl Iterator for TableIterator {
    type Item = (InternalKey, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{put_fixed32, put_varint32};
    use crate::keys::ValueKind;

    fn plain_table(entries: &[(&[u8], u64, &[u8])]) -> Vec<u8> {
        let mut data = Vec::new();
        put_fixed32(&mut data, entries.len() as u32);
        for (user_key, seq, value) in entries {
            let key = InternalKey::new(user_key, *seq, ValueKind::Value).encode();
            put_varint32(&mut data, key.len() as u32);
            put_varint32(&mut data, value.len() as u32);
            data.extend_from_slice(&key);
            data.extend_from_slice(value);
        }
        data
    }

    #[test]
    fn test_plain_iteration() {
        let data = plain_table(&[(b"a", 1, b"1"), (b"b", 2, b"2"), (b"c", 3, b"3")]);
        let iter = TableIterator::plain(data);
        let keys: Vec<_> = iter.map(|(k, _)| k.user_key().to_vec()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_empty_header_yields_nothing() {
        let mut iter = TableIterator::plain(Vec::new());
        assert!(iter.next_entry().is_none());
        assert_eq!(TableIterator::plain(Vec::new()).count(), 0);

        let mut iter = TableIterator::encoded(Vec::new());
        assert!(iter.next_entry().is_none());
        assert_eq!(TableIterator::encoded(Vec::new()).count(), 0);
    }

    #[test]
    fn test_seek() {
        let data = plain_table(&[(b"apple", 1, b"1"), (b"mango", 2, b"2"), (b"pear", 3, b"3")]);
        let mut iter = TableIterator::plain(data);

        let (key, value) = iter.seek(b"mango").expect("seek failed");
        assert_eq!(key.user_key(), b"mango");
        assert_eq!(value, b"2");

        // Between keys: lands on the next one.
        let (key, _) = iter.seek(b"nectarine").expect("seek failed");
        assert_eq!(key.user_key(), b"pear");

        assert!(iter.seek(b"zucchini").is_none());
    }

    #[test]
    fn test_truncated_entry_stops() {
        let mut data = plain_table(&[(b"a", 1, b"1"), (b"b", 2, b"2")]);
        data.truncate(data.len() - 5);
        let mut iter = TableIterator::plain(data);
        assert!(iter.next_entry().is_some());
        assert!(iter.next_entry().is_none());
    }
}
