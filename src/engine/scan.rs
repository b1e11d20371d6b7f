//! # Scans
//!
//! All scans read a prefix of the ordered store through a [`Cursor`] and
//! attribute each entry to its table via the value envelope. A group scan
//! therefore yields a depth-first interleaving of the group's tables:
//! every row is immediately followed by its clustered descendants.

use super::keys::{find_row_hkey, group_prefix, group_prefix_for, hkey_from_index_key, index_prefix};
use super::row::{split_envelope, RowCodec};
use super::StorageEngine;
use crate::encoding::{encode_int, encode_value};
use crate::schema::catalog::Catalog;
use crate::schema::{GroupId, IndexId, TableId};
use crate::store::{Cursor, KeyValueStore, StoreTransaction};
use crate::types::Value;
use eyre::Result;

/// One row produced by a scan: owning table, hkey bytes, decoded values.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedRow {
    pub table: TableId,
    pub hkey: Vec<u8>,
    pub values: Vec<Value>,
}

impl<S: KeyValueStore, C: RowCodec> StorageEngine<S, C> {
    /// All rows of the group in hkey order: parents immediately followed by
    /// their descendant subtrees.
    pub fn group_scan_in<T: StoreTransaction>(
        &self,
        txn: &mut T,
        catalog: &Catalog,
        group: GroupId,
    ) -> Result<Vec<ScannedRow>> {
        let prefix = group_prefix(catalog.group(group)?.tree_name());
        let mut cursor = Cursor::new(txn.scan_prefix(&prefix)?);
        let mut out = Vec::with_capacity(cursor.len());
        while let Some((key, value)) = cursor.next() {
            let (tid, body) = split_envelope(value)?;
            let table = catalog.table(tid)?;
            out.push(ScannedRow {
                table: tid,
                hkey: key[prefix.len()..].to_vec(),
                values: self.codec.decode(table, body)?,
            });
        }
        Ok(out)
    }

    pub fn table_scan_in<T: StoreTransaction>(
        &self,
        txn: &mut T,
        catalog: &Catalog,
        table: TableId,
    ) -> Result<Vec<ScannedRow>> {
        let t = catalog.table(table)?;
        let group = t
            .group()
            .ok_or_else(|| eyre::eyre!("table '{}' is not assigned to a group", t.name()))?;
        let mut rows = self.group_scan_in(txn, catalog, group)?;
        rows.retain(|r| r.table == table);
        Ok(rows)
    }

    /// Fetches one row by primary key.
    pub fn fetch_in<T: StoreTransaction>(
        &self,
        txn: &mut T,
        catalog: &Catalog,
        table: TableId,
        pk_values: &[Value],
    ) -> Result<Option<Vec<Value>>> {
        let t = catalog.table(table)?;
        let Some(hkey) = find_row_hkey(txn, catalog, t, pk_values)? else {
            return Ok(None);
        };
        let mut key = group_prefix_for(catalog, t)?;
        key.extend_from_slice(&hkey);
        match txn.get(&key)? {
            Some(stored) => {
                let (_, body) = split_envelope(&stored)?;
                Ok(Some(self.codec.decode(t, body)?))
            }
            None => Ok(None),
        }
    }

    /// The clustered subtree below one row, excluding the row itself.
    pub fn descendants_in<T: StoreTransaction>(
        &self,
        txn: &mut T,
        catalog: &Catalog,
        table: TableId,
        pk_values: &[Value],
    ) -> Result<Vec<ScannedRow>> {
        let t = catalog.table(table)?;
        let hkey = find_row_hkey(txn, catalog, t, pk_values)?
            .ok_or_else(|| eyre::eyre!("no such record in table '{}'", t.name()))?;
        let prefix = group_prefix_for(catalog, t)?;
        let mut scan_key = prefix.clone();
        scan_key.extend_from_slice(&hkey);
        let mut out = Vec::new();
        for (key, value) in txn.scan_prefix(&scan_key)? {
            if key.len() == scan_key.len() {
                continue;
            }
            let (tid, body) = split_envelope(&value)?;
            let child = catalog.table(tid)?;
            out.push(ScannedRow {
                table: tid,
                hkey: key[prefix.len()..].to_vec(),
                values: self.codec.decode(child, body)?,
            });
        }
        Ok(out)
    }

    /// Rows of the index's leaf table whose indexed columns start with
    /// `prefix_values`, in index order. An hkey-equivalent index scans the
    /// group relation directly; a stored index rebuilds each row's hkey
    /// from the entry and fetches the row.
    pub fn index_scan_in<T: StoreTransaction>(
        &self,
        txn: &mut T,
        catalog: &Catalog,
        index: IndexId,
        prefix_values: &[Value],
    ) -> Result<Vec<ScannedRow>> {
        let idx = catalog.index(index)?;
        let leaf = catalog.table(idx.leaf_table())?;

        if idx.is_hkey_equivalent() {
            let hkey = leaf.hkey()?;
            let mut scan_key = group_prefix_for(catalog, leaf)?;
            let base = scan_key.len();
            encode_int(hkey.own_segment().ordinal as i64, &mut scan_key);
            for v in prefix_values {
                encode_value(v, &mut scan_key);
            }
            let mut out = Vec::new();
            for (key, value) in txn.scan_prefix(&scan_key)? {
                let (tid, body) = split_envelope(&value)?;
                if tid != leaf.id() {
                    // Descendants share the scanned key range.
                    continue;
                }
                out.push(ScannedRow {
                    table: tid,
                    hkey: key[base..].to_vec(),
                    values: self.codec.decode(leaf, body)?,
                });
            }
            return Ok(out);
        }

        let entry_prefix = index_prefix(idx.id());
        let mut scan_key = entry_prefix.clone();
        for v in prefix_values {
            encode_value(v, &mut scan_key);
        }
        let group_prefix = group_prefix_for(catalog, leaf)?;
        let mut cursor = Cursor::new(txn.scan_prefix(&scan_key)?);
        let mut hkeys = Vec::with_capacity(cursor.len());
        while let Some((key, _)) = cursor.next() {
            hkeys.push(hkey_from_index_key(idx, &key[entry_prefix.len()..])?);
        }
        let mut out = Vec::with_capacity(hkeys.len());
        for hkey in hkeys {
            let mut key = group_prefix.clone();
            key.extend_from_slice(&hkey);
            let stored = txn.get(&key)?.ok_or_else(|| {
                eyre::eyre!(
                    "index '{}' references a missing row in table '{}'",
                    idx.name(),
                    leaf.name()
                )
            })?;
            let (_, body) = split_envelope(&stored)?;
            out.push(ScannedRow {
                table: leaf.id(),
                hkey,
                values: self.codec.decode(leaf, body)?,
            });
        }
        Ok(out)
    }
}
