//! In-memory sorted table, the iteration source for memtable flushes.
//!
//! Built on `crossbeam_skiplist::SkipMap` so concurrent writers and readers
//! never block each other, with atomic size tracking and a freeze flag.
//! Durability is the write-ahead log owner's concern; this structure only
//! feeds the flush driver a key-ordered iterator.

use crossbeam_skiplist::SkipMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::error::Result;
use crate::Error;

/// In-memory sorted key-value table. A `None` value is a tombstone.
#[derive(Debug)]
pub struct Memtable {
    data: SkipMap<Vec<u8>, Option<Vec<u8>>>,
    size: AtomicUsize,
    last_seq: AtomicU64,
    frozen: AtomicBool,
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

impl Memtable {
    pub fn new() -> Self {
        Self {
            data: SkipMap::new(),
            size: AtomicUsize::new(0),
            last_seq: AtomicU64::new(0),
            frozen: AtomicBool::new(false),
        }
    }

    /// Inserts or updates a key-value pair.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.insert(key, Some(value))
    }

    /// Inserts a tombstone for `key`.
    pub fn delete(&self, key: Vec<u8>) -> Result<()> {
        self.insert(key, None)
    }

    fn insert(&self, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<()> {
        if self.frozen.load(Ordering::SeqCst) {
            return Err(Error::InvalidArgument(
                "write to frozen memtable".to_string(),
            ));
        }
        let entry_size = key.len() + value.as_ref().map_or(0, |v| v.len());
        self.size.fetch_add(entry_size, Ordering::SeqCst);
        self.last_seq.fetch_add(1, Ordering::SeqCst);
        self.data.insert(key, value);
        Ok(())
    }

    /// Returns the value for `key`. `Some(None)` is a tombstone.
    pub fn get(&self, key: &[u8]) -> Option<Option<Vec<u8>>> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    /// Approximate bytes of key and value data held.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Highest sequence number assigned to an insert.
    pub fn last_seq(&self) -> u64 {
        self.last_seq.load(Ordering::SeqCst)
    }

    /// Marks the memtable read-only ahead of a flush.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    /// Key-ordered snapshot iteration over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (Vec<u8>, Option<Vec<u8>>)> + '_ {
        self.data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get() {
        let memtable = Memtable::new();
        memtable.put(b"key1".to_vec(), b"value1".to_vec()).unwrap();
        memtable.put(b"key2".to_vec(), b"value2".to_vec()).unwrap();

        assert_eq!(memtable.get(b"key1"), Some(Some(b"value1".to_vec())));
        assert_eq!(memtable.get(b"key2"), Some(Some(b"value2".to_vec())));
        assert_eq!(memtable.get(b"missing"), None);
        assert_eq!(memtable.len(), 2);
    }

    #[test]
    fn test_tombstone() {
        let memtable = Memtable::new();
        memtable.put(b"key".to_vec(), b"value".to_vec()).unwrap();
        memtable.delete(b"key".to_vec()).unwrap();
        assert_eq!(memtable.get(b"key"), Some(None));
    }

    #[test]
    fn test_iter_is_key_ordered() {
        let memtable = Memtable::new();
        memtable.put(b"cherry".to_vec(), b"3".to_vec()).unwrap();
        memtable.put(b"apple".to_vec(), b"1".to_vec()).unwrap();
        memtable.put(b"banana".to_vec(), b"2".to_vec()).unwrap();

        let keys: Vec<_> = memtable.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"apple".to_vec(), b"banana".to_vec(), b"cherry".to_vec()]);
    }

    #[test]
    fn test_size_tracking() {
        let memtable = Memtable::new();
        memtable.put(b"abc".to_vec(), b"defg".to_vec()).unwrap();
        assert_eq!(memtable.size(), 7);
        memtable.delete(b"xy".to_vec()).unwrap();
        assert_eq!(memtable.size(), 9);
    }

    #[test]
    fn test_frozen_rejects_writes() {
        let memtable = Memtable::new();
        memtable.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        memtable.freeze();
        assert!(memtable.is_frozen());
        assert!(memtable.put(b"b".to_vec(), b"2".to_vec()).is_err());
        assert_eq!(memtable.get(b"a"), Some(Some(b"1".to_vec())));
    }

    #[test]
    fn test_sequence_numbers_advance() {
        let memtable = Memtable::new();
        assert_eq!(memtable.last_seq(), 0);
        memtable.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        memtable.put(b"b".to_vec(), b"2".to_vec()).unwrap();
        assert_eq!(memtable.last_seq(), 2);
    }
}
