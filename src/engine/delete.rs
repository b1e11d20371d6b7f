//! # Delete and Truncate
//!
//! Deleting a row removes its entire clustered subtree: descendants live in
//! the row's key range, so the cascade is one prefix scan with no
//! per-table bookkeeping. Deleting a record that does not exist is an
//! error, matching the update path.
//!
//! Truncating a group clears the group relation and every index entry of
//! its member tables in bulk. Surrogate-key counters deliberately survive
//! both operations, so re-inserted rows never reuse a synthesized key.

use super::indexes::{index_prefix_entries, remove_index_entries};
use super::keys::{build_hkey, group_prefix, group_prefix_for};
use super::row::{split_envelope, Row, RowCodec};
use super::update::full_key_values;
use super::StorageEngine;
use crate::schema::catalog::Catalog;
use crate::schema::GroupId;
use crate::store::{KeyValueStore, StoreTransaction};
use eyre::{ensure, Result};
use tracing::trace;

impl<S: KeyValueStore, C: RowCodec> StorageEngine<S, C> {
    /// Deletes the identified row and its clustered descendants, returning
    /// the number of rows removed.
    pub fn delete_in<T: StoreTransaction>(
        &self,
        txn: &mut T,
        catalog: &Catalog,
        row: &Row,
    ) -> Result<usize> {
        ensure!(catalog.is_frozen(), "catalog is not frozen");
        let table = catalog.table(row.table())?;
        let values = full_key_values(table, row)?;
        let hkey_bytes = build_hkey(txn, catalog, table, &values)?;
        let prefix = group_prefix_for(catalog, table)?;
        let mut key = prefix.clone();
        key.extend_from_slice(&hkey_bytes);
        ensure!(
            txn.get(&key)?.is_some(),
            "no such record in table '{}'",
            table.name()
        );

        // The row and its whole subtree share the key prefix. Index entries
        // go first: flattening a descendant's group-index entry may fetch
        // ancestor rows, which must still be present.
        let doomed = txn.scan_prefix(&key)?;
        let label = format!("delete from table '{}'", table.name());
        for (seen, (k, v)) in doomed.iter().enumerate() {
            self.sweep_checkpoint(seen, &label)?;
            let (tid, body) = split_envelope(v)?;
            let t = catalog.table(tid)?;
            let vals = self.codec.decode(t, body)?;
            let hk = &k[prefix.len()..];
            remove_index_entries(txn, catalog, &self.codec, t, &vals, hk, None)?;
        }
        for (k, _) in &doomed {
            txn.remove(k)?;
        }
        let removed = doomed.len();
        trace!(table = table.name(), removed, "deleted row subtree");
        Ok(removed)
    }

    /// Removes every row of the group and every entry of its members'
    /// indexes, returning the number of rows removed.
    pub fn truncate_group_in<T: StoreTransaction>(
        &self,
        txn: &mut T,
        catalog: &Catalog,
        group: GroupId,
    ) -> Result<usize> {
        ensure!(catalog.is_frozen(), "catalog is not frozen");
        let group_def = catalog.group(group)?;
        let prefix = group_prefix(group_def.tree_name());
        let label = format!("truncate of group '{}'", group_def.tree_name());
        let mut seen = 0;
        let mut removed = 0;
        for (k, _) in txn.scan_prefix(&prefix)? {
            self.sweep_checkpoint(seen, &label)?;
            seen += 1;
            txn.remove(&k)?;
            removed += 1;
        }
        for tid in catalog.group_members(group) {
            let table = catalog.table(tid)?;
            for entry_prefix in index_prefix_entries(catalog, table) {
                for (k, _) in txn.scan_prefix(&entry_prefix)? {
                    self.sweep_checkpoint(seen, &label)?;
                    seen += 1;
                    txn.remove(&k)?;
                }
            }
        }
        trace!(group, removed, "truncated group");
        Ok(removed)
    }
}
