//! # Insert Path
//!
//! An insert places the row under its parent's stored hkey when the parent
//! row exists, or at the synthesized orphan position when it does not. An
//! orphan is stored, indexed, and waits for its parent; it is never an
//! error. After the row and its index entries land, the insert sweeps the
//! row's child-visible orphan prefix and re-keys any descendants that were
//! inserted before it (adoption).

use super::indexes::{
    add_index_entries, check_unique_indexes, refresh_descendant_group_indexes,
    remove_index_entries,
};
use super::keys::{build_hkey, child_visible_form, group_prefix_for, next_surrogate};
use super::row::{split_envelope, wrap_envelope, Row, RowCodec};
use super::{validate_row, StorageEngine};
use crate::schema::catalog::Catalog;
use crate::schema::table::TableDef;
use crate::store::{KeyValueStore, StoreTransaction};
use crate::types::Value;
use eyre::{ensure, Result};
use tracing::trace;

impl<S: KeyValueStore, C: RowCodec> StorageEngine<S, C> {
    /// Validates and inserts one row inside an existing transaction.
    pub fn insert_in<T: StoreTransaction>(
        &self,
        txn: &mut T,
        catalog: &Catalog,
        row: &Row,
    ) -> Result<()> {
        ensure!(catalog.is_frozen(), "catalog is not frozen");
        let table = catalog.table(row.table())?;
        ensure!(
            row.values().len() == table.declared_column_count(),
            "row for table '{}' has {} values, expected {}",
            table.name(),
            row.values().len(),
            table.declared_column_count()
        );
        let mut values = row.values().to_vec();
        if table.has_surrogate_key() {
            values.push(Value::Int(next_surrogate(txn, table.id())?));
        }
        self.insert_full(txn, catalog, table, &values)
    }

    /// Inserts a row whose hidden columns are already populated. Used by the
    /// plain insert path and by key-changing updates, which must carry the
    /// original surrogate key instead of drawing a fresh one.
    pub(crate) fn insert_full<T: StoreTransaction>(
        &self,
        txn: &mut T,
        catalog: &Catalog,
        table: &TableDef,
        values: &[Value],
    ) -> Result<()> {
        validate_row(table, values)?;

        let hkey_bytes = build_hkey(txn, catalog, table, values)?;
        let prefix = group_prefix_for(catalog, table)?;
        let mut key = prefix.clone();
        key.extend_from_slice(&hkey_bytes);
        ensure!(
            txn.get(&key)?.is_none(),
            "duplicate key value violates primary key of table '{}'",
            table.name()
        );
        check_unique_indexes(txn, catalog, &self.codec, table, values, &hkey_bytes)?;

        let body = self.codec.encode(table, values)?;
        txn.put(&key, &wrap_envelope(table.id(), &body))?;
        add_index_entries(txn, catalog, &self.codec, table, values, &hkey_bytes)?;
        trace!(table = table.name(), key_len = key.len(), "inserted row");

        self.adopt_orphans(txn, catalog, table, values, &hkey_bytes)?;
        // Descendant group-index entries saw this row's fields as NULL.
        refresh_descendant_group_indexes(
            txn,
            catalog,
            &self.codec,
            table,
            &hkey_bytes,
            Some((table.id(), None)),
            None,
        )?;
        Ok(())
    }

    /// Re-keys descendants stored under this row's child-visible orphan
    /// prefix. The moved subtree keeps its suffix; only the ancestor prefix
    /// is rewritten, so orphans of deeper missing ancestors stay orphans but
    /// land in the right neighborhood.
    fn adopt_orphans<T: StoreTransaction>(
        &self,
        txn: &mut T,
        catalog: &Catalog,
        table: &TableDef,
        values: &[Value],
        hkey_bytes: &[u8],
    ) -> Result<()> {
        if table.child_joins().is_empty() {
            return Ok(());
        }
        let orphan_prefix = child_visible_form(table, values)?;
        if orphan_prefix == hkey_bytes {
            // Children can synthesize this row's full hkey themselves, so
            // they were never displaced.
            return Ok(());
        }
        let moved = self.rekey_descendants(
            txn,
            catalog,
            table,
            &orphan_prefix,
            hkey_bytes,
            Some((table.id(), None)),
        )?;
        if moved > 0 {
            trace!(table = table.name(), moved, "adopted orphans");
        }
        Ok(())
    }

    /// Moves every descendant stored under `old_prefix` to the same suffix
    /// under `new_prefix`, rebuilding each moved row's index entries.
    /// `old_override` describes the ancestor state their old entries were
    /// computed under. The passes are ordered so that branch flattening
    /// always sees a consistent store: all old entries are removed while the
    /// subtree still sits at its old position, then the rows move, then all
    /// new entries are computed against the moved subtree.
    pub(crate) fn rekey_descendants<T: StoreTransaction>(
        &self,
        txn: &mut T,
        catalog: &Catalog,
        ancestor: &TableDef,
        old_prefix: &[u8],
        new_prefix: &[u8],
        old_override: super::indexes::BranchOverride<'_>,
    ) -> Result<usize> {
        let group_prefix = group_prefix_for(catalog, ancestor)?;
        let mut scan_key = group_prefix.clone();
        scan_key.extend_from_slice(old_prefix);

        let label = format!("subtree re-key under table '{}'", ancestor.name());
        let mut moved = Vec::new();
        for (seen, (old_key, stored)) in txn.scan_prefix(&scan_key)?.into_iter().enumerate() {
            self.sweep_checkpoint(seen, &label)?;
            let suffix = &old_key[scan_key.len()..];
            if suffix.is_empty() {
                continue;
            }
            let (tid, body) = split_envelope(&stored)?;
            let moved_table = catalog.table(tid)?;
            let moved_values = self.codec.decode(moved_table, body)?;
            let old_hkey = old_key[group_prefix.len()..].to_vec();
            let mut new_hkey = new_prefix.to_vec();
            new_hkey.extend_from_slice(suffix);
            moved.push((old_key, stored, moved_table, moved_values, old_hkey, new_hkey));
        }

        for (_, _, table, values, old_hkey, _) in &moved {
            remove_index_entries(
                txn,
                catalog,
                &self.codec,
                table,
                values,
                old_hkey,
                old_override,
            )?;
        }
        if old_prefix != new_prefix {
            for (old_key, stored, _, _, _, new_hkey) in &moved {
                let mut new_key = group_prefix.clone();
                new_key.extend_from_slice(new_hkey);
                txn.remove(old_key)?;
                txn.put(&new_key, stored)?;
            }
        }
        for (_, _, table, values, _, new_hkey) in &moved {
            add_index_entries(txn, catalog, &self.codec, table, values, new_hkey)?;
        }
        Ok(moved.len())
    }
}
