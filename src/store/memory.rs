//! # In-Memory Reference Store
//!
//! [`MemStore`] is the reference [`KeyValueStore`]: a sorted map guarded by a
//! mutex, with first-committer-wins optimistic concurrency.
//!
//! Every committed entry carries the sequence number of the commit that last
//! touched it; removed keys stay behind as stamped tombstones so later
//! commits can still detect that a concurrent delete overlapped their reads.
//! A transaction records its read footprint (point keys and scan prefixes)
//! and buffers writes in an overlay; commit re-checks the footprint and the
//! write set against entries stamped after the transaction began and applies
//! the overlay under a single lock.

use super::{KeyValueStore, StoreError, StoreTransaction};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Entry {
    /// Sequence number of the commit that wrote this entry.
    stamp: u64,
    /// `None` is a tombstone.
    value: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Inner {
    map: BTreeMap<Vec<u8>, Entry>,
    seq: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MemStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-tombstone) entries.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .map
            .values()
            .filter(|e| e.value.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemStore {
    type Txn<'a> = MemTransaction<'a>;

    fn begin(&self) -> MemTransaction<'_> {
        let begin_seq = self.inner.lock().seq;
        MemTransaction {
            store: self,
            begin_seq,
            reads: Vec::new(),
            writes: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
enum ReadFootprint {
    Key(Vec<u8>),
    Prefix(Vec<u8>),
}

impl ReadFootprint {
    fn covers(&self, key: &[u8]) -> bool {
        match self {
            ReadFootprint::Key(k) => k == key,
            ReadFootprint::Prefix(p) => key.starts_with(p),
        }
    }
}

#[derive(Debug)]
pub struct MemTransaction<'a> {
    store: &'a MemStore,
    begin_seq: u64,
    reads: Vec<ReadFootprint>,
    /// Buffered writes; `None` is a pending delete.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl StoreTransaction for MemTransaction<'_> {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        self.reads.push(ReadFootprint::Key(key.to_vec()));
        let inner = self.store.inner.lock();
        Ok(inner.map.get(key).and_then(|e| e.value.clone()))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.writes.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.writes.insert(key.to_vec(), None);
        Ok(())
    }

    fn scan_prefix(&mut self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.reads.push(ReadFootprint::Prefix(prefix.to_vec()));
        let inner = self.store.inner.lock();
        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = inner
            .map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect();
        for (k, v) in self.writes.range(prefix.to_vec()..) {
            if !k.starts_with(prefix) {
                break;
            }
            merged.insert(k.clone(), v.clone());
        }
        Ok(merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect())
    }

    fn commit(self) -> Result<(), StoreError> {
        let mut inner = self.store.inner.lock();

        // First committer wins: any entry stamped after we began that
        // overlaps our reads or writes invalidates this transaction.
        for (key, entry) in &inner.map {
            if entry.stamp <= self.begin_seq {
                continue;
            }
            let overlaps = self.writes.contains_key(key)
                || self.reads.iter().any(|r| r.covers(key));
            if overlaps {
                return Err(StoreError::Conflict { key: key.clone() });
            }
        }

        inner.seq += 1;
        let stamp = inner.seq;
        for (key, value) in self.writes {
            inner.map.insert(key, Entry { stamp, value });
        }
        Ok(())
    }

    fn rollback(self) {}
}
