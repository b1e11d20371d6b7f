//! # Update Path
//!
//! Two regimes, split on whether the update touches a key-determining field
//! (a primary-key field or one sourced into the hkey):
//!
//! - **In place**: the row's key is stable, so the stored value is
//!   overwritten and only index entries whose composed values changed are
//!   rewritten.
//! - **Key-changing**: delete-then-reinsert under the new key. The row's
//!   descendants still reference the old key values through their foreign
//!   keys, which makes them ordinary orphans; they are moved to the orphan
//!   position those foreign keys synthesize. When the update kept the
//!   primary key (only a grouping foreign key changed), the reinsert's
//!   adoption sweep immediately re-keys them under the new position. A
//!   surrogate key is carried over verbatim, never regenerated.

use super::indexes::{
    check_unique_entry, index_entry_key, index_row_values, refresh_descendant_group_indexes,
    remove_index_entries, stored_indexes,
};
use super::keys::{build_hkey, child_visible_form, group_prefix_for};
use super::row::{split_envelope, wrap_envelope, Row, RowCodec};
use super::{validate_row, StorageEngine};
use crate::schema::catalog::Catalog;
use crate::schema::table::TableDef;
use crate::store::{KeyValueStore, StoreTransaction};
use crate::types::Value;
use eyre::{ensure, Result};
use tracing::trace;

impl<S: KeyValueStore, C: RowCodec> StorageEngine<S, C> {
    /// Updates the row identified by `old` to the values of `new` inside an
    /// existing transaction.
    pub fn update_in<T: StoreTransaction>(
        &self,
        txn: &mut T,
        catalog: &Catalog,
        old: &Row,
        new: &Row,
    ) -> Result<()> {
        ensure!(catalog.is_frozen(), "catalog is not frozen");
        ensure!(
            old.table() == new.table(),
            "update rows must target the same table"
        );
        let table = catalog.table(new.table())?;

        let old_full = full_key_values(table, old)?;
        let old_hkey = build_hkey(txn, catalog, table, &old_full)?;
        let prefix = group_prefix_for(catalog, table)?;
        let mut old_key = prefix.clone();
        old_key.extend_from_slice(&old_hkey);
        let stored = txn
            .get(&old_key)?
            .ok_or_else(|| eyre::eyre!("no such record in table '{}'", table.name()))?;
        let (_, body) = split_envelope(&stored)?;
        let stored_values = self.codec.decode(table, body)?;

        ensure!(
            new.values().len() == table.declared_column_count(),
            "row for table '{}' has {} values, expected {}",
            table.name(),
            new.values().len(),
            table.declared_column_count()
        );
        let mut new_values = new.values().to_vec();
        if table.has_surrogate_key() {
            // The synthesized key survives every update of the row.
            new_values.push(stored_values.last().cloned().unwrap_or(Value::Null));
        }
        validate_row(table, &new_values)?;

        let key_changed = table
            .hkey()?
            .key_determining_fields()
            .iter()
            .any(|&f| stored_values.get(f) != new_values.get(f));

        if !key_changed {
            self.update_in_place(txn, catalog, table, &old_key, &old_hkey, &stored_values, &new_values)
        } else {
            trace!(table = table.name(), "key-determining update, re-keying row");
            remove_index_entries(
                txn,
                catalog,
                &self.codec,
                table,
                &stored_values,
                &old_hkey,
                None,
            )?;
            txn.remove(&old_key)?;
            // Descendants become orphans of the old key values. Moving them
            // to the position their own foreign keys synthesize keeps them
            // reachable by a later adoption sweep.
            let orphan_prefix = child_visible_form(table, &stored_values)?;
            self.rekey_descendants(
                txn,
                catalog,
                table,
                &old_hkey,
                &orphan_prefix,
                Some((table.id(), Some(&stored_values))),
            )?;
            self.insert_full(txn, catalog, table, &new_values)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn update_in_place<T: StoreTransaction>(
        &self,
        txn: &mut T,
        catalog: &Catalog,
        table: &TableDef,
        key: &[u8],
        hkey_bytes: &[u8],
        old_values: &[Value],
        new_values: &[Value],
    ) -> Result<()> {
        for index in stored_indexes(catalog, table) {
            let old_row =
                index_row_values(txn, catalog, &self.codec, index, old_values, hkey_bytes, None)?;
            let new_row =
                index_row_values(txn, catalog, &self.codec, index, new_values, hkey_bytes, None)?;
            if old_row == new_row {
                continue;
            }
            txn.remove(&index_entry_key(index, &old_row))?;
            if index.is_unique() {
                check_unique_entry(txn, table, index, &new_row)?;
            }
            txn.put(&index_entry_key(index, &new_row), &[])?;
        }

        let body = self.codec.encode(table, new_values)?;
        txn.put(key, &wrap_envelope(table.id(), &body))?;
        trace!(table = table.name(), "updated row in place");

        // Group indexes flatten this row's fields into descendant entries.
        refresh_descendant_group_indexes(
            txn,
            catalog,
            &self.codec,
            table,
            hkey_bytes,
            Some((table.id(), Some(old_values))),
            None,
        )?;
        Ok(())
    }
}

/// Full stored-width values for a row that identifies an existing record.
/// Tables with a synthesized key require the caller to supply its value,
/// which only comes from a previously read row.
pub(crate) fn full_key_values(table: &TableDef, row: &Row) -> Result<Vec<Value>> {
    if table.has_surrogate_key() {
        ensure!(
            row.values().len() == table.columns().len(),
            "row for table '{}' must include its synthesized key value",
            table.name()
        );
    } else {
        ensure!(
            row.values().len() == table.declared_column_count(),
            "row for table '{}' has {} values, expected {}",
            table.name(),
            row.values().len(),
            table.declared_column_count()
        );
    }
    Ok(row.values().to_vec())
}
