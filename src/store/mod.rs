//! # Ordered Key-Value Store
//!
//! The physical store is a black box behind two traits: [`KeyValueStore`]
//! hands out transactions, [`StoreTransaction`] exposes point reads, writes,
//! and ordered prefix scans over sorted byte-string keys.
//!
//! Transactions are **optimistic**: reads and scans proceed without locks,
//! and `commit` fails with [`StoreError::Conflict`] when a concurrent
//! transaction committed a change that overlaps this transaction's read or
//! write footprint. Callers never handle conflicts directly; the transaction
//! driver retries the whole operation a bounded number of times.
//!
//! Store errors are a concrete [`StoreError`] rather than an opaque report
//! so the driver can recognize conflicts by downcast after the error has
//! been wrapped with context on its way up.

pub mod memory;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A concurrent commit overlapped this transaction's footprint. The
    /// operation is safe to retry from the beginning.
    #[error("optimistic conflict on key {key:02x?}")]
    Conflict { key: Vec<u8> },
    #[error("store backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// A transactional view over the store. Reads observe the snapshot taken at
/// `begin` plus this transaction's own writes.
pub trait StoreTransaction {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn remove(&mut self, key: &[u8]) -> Result<(), StoreError>;

    /// All live entries whose key starts with `prefix`, in ascending key
    /// order, with this transaction's own writes merged in.
    fn scan_prefix(&mut self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    fn commit(self) -> Result<(), StoreError>;

    fn rollback(self);
}

pub trait KeyValueStore {
    type Txn<'a>: StoreTransaction
    where
        Self: 'a;

    fn begin(&self) -> Self::Txn<'_>;
}

/// Bidirectional cursor over the result of a prefix scan.
#[derive(Debug)]
pub struct Cursor {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    // Next position a forward step would yield.
    pos: usize,
}

impl Cursor {
    pub fn new(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self { entries, pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Positions the cursor at the first entry with key >= `key`.
    pub fn seek(&mut self, key: &[u8]) {
        self.pos = self
            .entries
            .partition_point(|(k, _)| k.as_slice() < key);
    }

    pub fn next(&mut self) -> Option<(&[u8], &[u8])> {
        let entry = self.entries.get(self.pos)?;
        self.pos += 1;
        Some((&entry.0, &entry.1))
    }

    pub fn prev(&mut self) -> Option<(&[u8], &[u8])> {
        if self.pos == 0 {
            return None;
        }
        self.pos -= 1;
        let entry = &self.entries[self.pos];
        Some((&entry.0, &entry.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor() -> Cursor {
        Cursor::new(vec![
            (vec![1], vec![10]),
            (vec![3], vec![30]),
            (vec![5], vec![50]),
        ])
    }

    #[test]
    fn cursor_walks_both_directions() {
        let mut c = cursor();
        assert_eq!(c.next(), Some((&[1u8][..], &[10u8][..])));
        assert_eq!(c.next(), Some((&[3u8][..], &[30u8][..])));
        assert_eq!(c.prev(), Some((&[3u8][..], &[30u8][..])));
        assert_eq!(c.next(), Some((&[3u8][..], &[30u8][..])));
    }

    #[test]
    fn seek_lands_on_first_key_at_or_after() {
        let mut c = cursor();
        c.seek(&[2]);
        assert_eq!(c.next(), Some((&[3u8][..], &[30u8][..])));
        c.seek(&[9]);
        assert_eq!(c.next(), None);
        assert_eq!(c.prev(), Some((&[5u8][..], &[50u8][..])));
    }
}
